// Stop condition checking for streamed generation

/// Result of stop condition check
#[derive(Debug, PartialEq, Eq)]
pub struct StopConditionResult {
    /// Whether generation should stop
    pub should_stop: bool,
    /// Bytes at the end of `response + new_token` that belong to the matched
    /// stop marker and must never be shown
    pub marker_len: usize,
    /// Bytes (at least 2) at the end that could be the start of a stop
    /// marker; hold them back until the next token settles it
    pub pending: usize,
    /// Stop marker that triggered the stop (for debugging)
    pub matched_token: Option<String>,
}

impl StopConditionResult {
    pub fn no_stop(pending: usize) -> Self {
        Self {
            should_stop: false,
            marker_len: 0,
            pending,
            matched_token: None,
        }
    }

    pub fn stop_at(marker_len: usize, matched: &str) -> Self {
        Self {
            should_stop: true,
            marker_len,
            pending: 0,
            matched_token: Some(matched.to_string()),
        }
    }
}

/// Largest char boundary of `s` that is `<= index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Check whether appending `new_token` to `response` completes a stop marker.
///
/// `response` must not already contain a marker (generation would have
/// stopped). A marker may span the boundary between `response` and
/// `new_token`; everything from the start of the marker on is reported in
/// `marker_len`. When no marker completes, `pending` is the length of the
/// longest suffix of two or more bytes that is a proper prefix of
/// some marker.
pub fn check_stop_conditions(
    response: &str,
    new_token: &str,
    stop_markers: &[&str],
) -> StopConditionResult {
    let test_response = format!("{response}{new_token}");

    let mut earliest: Option<(usize, &str)> = None;
    for &marker in stop_markers {
        if marker.is_empty() {
            continue;
        }

        // Only positions that reach into the new token can be new matches
        let start = floor_char_boundary(
            &test_response,
            response.len().saturating_sub(marker.len() - 1),
        );
        if let Some(pos) = test_response[start..].find(marker) {
            let pos = start + pos;
            if earliest.map_or(true, |(best, _)| pos < best) {
                earliest = Some((pos, marker));
            }
        }
    }

    if let Some((pos, marker)) = earliest {
        return StopConditionResult::stop_at(test_response.len() - pos, marker);
    }

    let mut pending = 0;
    for &marker in stop_markers {
        for i in (2..marker.len()).rev() {
            if i <= pending {
                break;
            }
            if marker.is_char_boundary(i) && test_response.ends_with(&marker[..i]) {
                pending = i;
                break;
            }
        }
    }

    StopConditionResult::no_stop(pending)
}
