//! Sliding window of recent conversation turns.
//!
//! The buffer keeps at most `2 * window_size` turns, where one exchange is a
//! user turn followed by an assistant turn. Older turns are dropped first.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::error::ConversationError;

/// Speaker of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Name used inside prompt markers.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConversationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ConversationError::InvalidRole(other.to_string())),
        }
    }
}

/// One message attributed to the user or the assistant. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    text: String,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Bounded FIFO log of turns.
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    window_size: usize,
    turns: VecDeque<Turn>,
}

impl ConversationBuffer {
    /// Create a buffer retaining the last `window_size` exchanges.
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            turns: VecDeque::with_capacity(window_size.saturating_mul(2)),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Maximum number of turns held.
    pub fn capacity(&self) -> usize {
        self.window_size.saturating_mul(2)
    }

    /// Append a turn, evicting the oldest turns once over capacity.
    pub fn add_message(&mut self, role: Role, text: impl Into<String>) {
        self.turns.push_back(Turn::new(role, text));

        let capacity = self.capacity();
        let overflow = self.turns.len().saturating_sub(capacity);
        if overflow > 0 {
            self.turns.drain(..overflow);
            debug!("Evicted {overflow} turn(s), {} retained", self.turns.len());
        }
    }

    /// Append a turn whose role arrives as text, rejecting unknown roles.
    pub fn add_raw_message(
        &mut self,
        role: &str,
        text: impl Into<String>,
    ) -> Result<(), ConversationError> {
        let role = role.parse::<Role>()?;
        self.add_message(role, text);
        Ok(())
    }

    /// Snapshot of the retained turns, oldest first.
    pub fn get_history(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    /// Borrowing iterator over the retained turns, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl Default for ConversationBuffer {
    fn default() -> Self {
        Self::new(3)
    }
}
