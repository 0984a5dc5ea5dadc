//! Post-processing of raw generated text into a clean assistant reply.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Start of a user or system turn leaked past the assistant's reply.
    static ref LEAKED_TURN: Regex = Regex::new(r"<\|im_start\|>(?:user|system)").unwrap();
    /// Leading "Assistant:" labels with any surrounding whitespace.
    static ref LEADING_LABEL: Regex = Regex::new(r"^\s*(?:Assistant\s*:\s*)*").unwrap();
}

/// Reduce raw model output to the assistant's utterance.
///
/// Truncates at the first leaked user/system turn, strips a leading
/// `Assistant:` label and trims whitespace. Never fails; an empty result
/// tells the caller to consider a fallback. `clean_reply(clean_reply(x))`
/// equals `clean_reply(x)`.
pub fn clean_reply(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let cut = match LEAKED_TURN.find(raw) {
        Some(m) => &raw[..m.start()],
        None => raw,
    };

    LEADING_LABEL.replace(cut, "").trim().to_string()
}

/// [`clean_reply`] for output that may be absent.
pub fn clean_optional_reply(raw: Option<&str>) -> String {
    raw.map(clean_reply).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Generic form: "Hello there<|turn_start|>user\nignored" -> "Hello there",
    // with <|turn_start|> standing for ChatML's <|im_start|>.
    #[test]
    fn test_truncates_at_user_marker() {
        assert_eq!(
            clean_reply("Hello there<|im_start|>user\nignored"),
            "Hello there"
        );
    }

    #[test]
    fn test_truncates_at_first_of_user_or_system() {
        let raw = "Sure.<|im_start|>system\nx<|im_start|>user\ny";
        assert_eq!(clean_reply(raw), "Sure.");
    }

    #[test]
    fn test_assistant_marker_is_not_a_cut_point() {
        assert_eq!(
            clean_reply("A<|im_start|>assistant\nB"),
            "A<|im_start|>assistant\nB"
        );
    }

    #[test]
    fn test_strips_label() {
        assert_eq!(clean_reply("Assistant:   Hi!"), "Hi!");
        assert_eq!(clean_reply("  \n Assistant :Hi!  "), "Hi!");
    }

    #[test]
    fn test_label_only_in_leading_position() {
        assert_eq!(
            clean_reply("I am the Assistant: here"),
            "I am the Assistant: here"
        );
    }

    #[test]
    fn test_empty_and_absent_input() {
        assert_eq!(clean_reply(""), "");
        assert_eq!(clean_optional_reply(None), "");
        assert_eq!(clean_optional_reply(Some("  ok ")), "ok");
        assert_eq!(clean_reply("<|im_start|>user\nonly leak"), "");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "",
            "   ",
            "plain",
            "Assistant:   Hi!",
            "Assistant: Assistant: twice",
            "Hello there<|im_start|>user\nignored",
            "  Assistant:\n\n  spaced out  \n",
            "Assistant",
            "x<|im_start|>system",
            "<|im_end|> trailing",
        ];
        for s in samples {
            let once = clean_reply(s);
            assert_eq!(clean_reply(&once), once, "not idempotent for {s:?}");
        }
    }
}
