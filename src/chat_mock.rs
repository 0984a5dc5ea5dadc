// Scripted engine used when the crate is built without the `llama` feature.
// Replies are canned and deterministic so the chat loop can be tried
// without a model file.

use log::info;

use crate::error::GenerationError;
use crate::generation::{GenerationAdapter, GenerationRequest, ReplyStream};
use crate::prompt::{TURN_END, TURN_START};
use crate::settings::ChatSettings;

#[derive(Debug)]
pub struct ChatEngine {
    model_path: String,
}

impl ChatEngine {
    pub fn new(settings: &ChatSettings) -> Result<Self, GenerationError> {
        println!("Mock ChatEngine initialized (build with `--features llama` for real inference)");
        info!("Mock engine standing in for model {}", settings.model_path);
        Ok(Self {
            model_path: settings.model_path.clone(),
        })
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    fn respond_to(&self, user_message: &str) -> &'static str {
        match user_message.to_lowercase().as_str() {
            msg if msg.contains("hello") || msg.contains("hi") => {
                "Hello! I'm a mock assistant. How can I help you today?"
            }
            msg if msg.contains("help") => {
                "I'm running in mock mode. Rebuild with the llama feature and set MODEL_PATH to chat with a real model."
            }
            _ => "This is a mock response. The real model is only loaded when built with the llama feature.",
        }
    }
}

/// Text of the last user block in a ChatML prompt.
fn last_user_message(prompt: &str) -> &str {
    let opener = format!("{TURN_START}user\n");
    let Some(start) = prompt.rfind(&opener) else {
        return "";
    };
    let body = &prompt[start + opener.len()..];
    match body.find(TURN_END) {
        Some(end) => &body[..end],
        None => body,
    }
}

/// Split text into word chunks that keep their trailing whitespace.
fn word_chunks(text: &str, max_chunks: usize) -> Vec<String> {
    text.split_inclusive(' ')
        .take(max_chunks)
        .map(str::to_string)
        .collect()
}

impl GenerationAdapter for ChatEngine {
    fn stream(&self, request: &GenerationRequest) -> Result<ReplyStream, GenerationError> {
        let reply = self.respond_to(last_user_message(&request.prompt));
        let chunks = word_chunks(reply, request.max_new_tokens);

        ReplyStream::spawn(move |sink| {
            for chunk in chunks {
                if !sink.send(chunk) {
                    break;
                }
            }
            Ok(())
        })
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let reply = self.respond_to(last_user_message(&request.prompt));
        Ok(word_chunks(reply, request.max_new_tokens).concat())
    }
}
