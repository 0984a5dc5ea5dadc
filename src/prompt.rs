use crate::conversation::{Role, Turn};

/// Opening marker of a ChatML block; followed by the role name and a newline.
pub const TURN_START: &str = "<|im_start|>";
/// Closing marker of a ChatML block.
pub const TURN_END: &str = "<|im_end|>";

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer concisely and clearly. \
Your answer should be concise and factual. \
Use recent chat history.";

/// Build the ChatML prompt for the next assistant turn.
///
/// Layout: system block, one block per history turn (oldest first), the new
/// user message, then an open assistant block for the model to continue.
/// Text is inserted verbatim; marker-like substrings in user text are not
/// escaped.
pub fn build_prompt(history: &[Turn], user_message: &str) -> String {
    let mut p = String::new();

    push_block(&mut p, "system", SYSTEM_PROMPT);
    for turn in history {
        push_block(&mut p, turn.role().as_str(), turn.text());
    }
    push_block(&mut p, Role::User.as_str(), user_message);

    // Generation prompt
    p.push_str(TURN_START);
    p.push_str(Role::Assistant.as_str());
    p.push('\n');

    p
}

fn push_block(p: &mut String, role: &str, text: &str) {
    p.push_str(TURN_START);
    p.push_str(role);
    p.push('\n');
    p.push_str(text);
    p.push_str(TURN_END);
    p.push('\n');
}
