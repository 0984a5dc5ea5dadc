//! Interactive chat loop.
//!
//! One user turn is fully processed (prompt, generation, cleanup, history
//! update) before the next line is read. Generation failures never end the
//! session: a failed or empty stream is followed by one non-streaming
//! fallback request, and whatever that yields (possibly nothing) is recorded
//! as the assistant turn.

use std::io::{self, BufRead, Write};

use anyhow::Context;
use log::{debug, info, warn};

use crate::conversation::{ConversationBuffer, Role};
use crate::error::GenerationError;
use crate::generation::{GenerationAdapter, GenerationRequest};
use crate::prompt::build_prompt;
use crate::reply::clean_reply;
use crate::settings::ChatSettings;

pub const EXIT_COMMAND: &str = "/exit";

const USER_PREFIX: &str = "User: ";
const BOT_PREFIX: &str = "Bot: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingInput,
    Generating,
    Finished,
}

/// What a line of input asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Exit,
    Ignore,
    Message(String),
}

/// Classify one raw input line.
pub fn classify_input(line: &str) -> InputAction {
    let trimmed = line.trim();
    if trimmed.eq_ignore_ascii_case(EXIT_COMMAND) {
        InputAction::Exit
    } else if trimmed.is_empty() {
        InputAction::Ignore
    } else {
        InputAction::Message(trimmed.to_string())
    }
}

/// Result of consuming a streamed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(String),
    Failed {
        partial: String,
        error: GenerationError,
    },
}

pub struct ChatSession<A> {
    adapter: A,
    buffer: ConversationBuffer,
    max_new_tokens: usize,
    state: SessionState,
}

impl<A: GenerationAdapter> ChatSession<A> {
    pub fn new(adapter: A, settings: &ChatSettings) -> Self {
        Self {
            adapter,
            buffer: ConversationBuffer::new(settings.window_size),
            max_new_tokens: settings.max_new_tokens,
            state: SessionState::AwaitingInput,
        }
    }

    pub fn buffer(&self) -> &ConversationBuffer {
        &self.buffer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Run the loop until the exit command or end of input.
    pub fn run<R, W>(&mut self, mut input: R, out: &mut W) -> anyhow::Result<()>
    where
        R: BufRead,
        W: Write,
    {
        writeln!(out, "\nChat session started. Type '{EXIT_COMMAND}' to quit.")?;
        writeln!(out, "{}", "-".repeat(50))?;
        info!("Chat session started (window {} exchanges)", self.buffer.window_size());

        let mut bytes = Vec::new();
        loop {
            self.state = SessionState::AwaitingInput;
            write!(out, "{USER_PREFIX}")?;
            out.flush()?;

            bytes.clear();
            let read = input
                .read_until(b'\n', &mut bytes)
                .context("Failed to read user input")?;
            if read == 0 {
                // End of input behaves like the exit command
                writeln!(out)?;
                info!("Input closed, ending session");
                break;
            }

            // Invalid UTF-8 is replaced rather than ending the session
            let line = String::from_utf8_lossy(&bytes);
            match classify_input(&line) {
                InputAction::Exit => break,
                InputAction::Ignore => continue,
                InputAction::Message(message) => {
                    self.respond(&message, out)
                        .context("Failed to write reply")?;
                }
            }
        }

        writeln!(out, "Exiting. Goodbye!")?;
        self.state = SessionState::Finished;
        info!("Chat session finished");
        Ok(())
    }

    /// Generate, display and record the reply to one user message.
    ///
    /// Returns the cleaned reply that was stored as the assistant turn.
    pub fn respond<W: Write>(&mut self, user_message: &str, out: &mut W) -> io::Result<String> {
        self.state = SessionState::Generating;

        let history = self.buffer.get_history();
        let prompt = build_prompt(&history, user_message);
        debug!(
            "Prompt built: {} bytes, {} history turn(s)",
            prompt.len(),
            history.len()
        );
        let request = GenerationRequest::new(prompt, self.max_new_tokens);

        write!(out, "{BOT_PREFIX}")?;
        out.flush()?;
        let outcome = self.stream_reply(&request, out)?;
        writeln!(out)?;

        let mut reply = match outcome {
            StreamOutcome::Completed(raw) => clean_reply(&raw),
            StreamOutcome::Failed { partial, error } => {
                warn!(
                    "Streaming failed after {} bytes: {error}; falling back",
                    partial.len()
                );
                String::new()
            }
        };

        if reply.is_empty() {
            reply = self.fallback_reply(&request);
            if reply.is_empty() {
                warn!("Empty reply recorded after fallback");
            } else {
                writeln!(out, "{BOT_PREFIX}{reply}")?;
            }
        }

        self.buffer.add_message(Role::User, user_message);
        self.buffer.add_message(Role::Assistant, reply.clone());
        self.state = SessionState::AwaitingInput;

        Ok(reply)
    }

    /// Display chunks as they arrive and collect the raw text.
    ///
    /// Only output errors are returned as `Err`; generation errors become
    /// [`StreamOutcome::Failed`].
    fn stream_reply<W: Write>(
        &self,
        request: &GenerationRequest,
        out: &mut W,
    ) -> io::Result<StreamOutcome> {
        let stream = match self.adapter.stream(request) {
            Ok(stream) => stream,
            Err(error) => {
                return Ok(StreamOutcome::Failed {
                    partial: String::new(),
                    error,
                })
            }
        };

        let mut raw = String::new();
        for chunk in stream {
            match chunk {
                Ok(chunk) => {
                    write!(out, "{chunk}")?;
                    out.flush()?;
                    raw.push_str(&chunk);
                }
                Err(error) => {
                    return Ok(StreamOutcome::Failed {
                        partial: raw,
                        error,
                    })
                }
            }
        }

        Ok(StreamOutcome::Completed(raw))
    }

    fn fallback_reply(&self, request: &GenerationRequest) -> String {
        info!("Requesting non-streaming fallback generation");
        match self.adapter.generate(request) {
            Ok(raw) => clean_reply(&raw),
            Err(e) => {
                warn!("Fallback generation failed: {e}");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ReplyStream;
    use std::cell::RefCell;

    #[test]
    fn test_classify_input() {
        assert_eq!(classify_input("/exit\n"), InputAction::Exit);
        assert_eq!(classify_input("  /EXIT "), InputAction::Exit);
        assert_eq!(classify_input("   \n"), InputAction::Ignore);
        assert_eq!(
            classify_input(" hello \n"),
            InputAction::Message("hello".to_string())
        );
        assert_eq!(
            classify_input("exit"),
            InputAction::Message("exit".to_string())
        );
    }

    /// Records prompts and answers from fixed scripts.
    struct Scripted {
        stream: fn() -> Result<ReplyStream, GenerationError>,
        fallback: Result<String, GenerationError>,
        prompts: RefCell<Vec<String>>,
        fallback_calls: RefCell<usize>,
    }

    impl Scripted {
        fn new(
            stream: fn() -> Result<ReplyStream, GenerationError>,
            fallback: Result<String, GenerationError>,
        ) -> Self {
            Self {
                stream,
                fallback,
                prompts: RefCell::new(Vec::new()),
                fallback_calls: RefCell::new(0),
            }
        }
    }

    impl GenerationAdapter for Scripted {
        fn stream(&self, request: &GenerationRequest) -> Result<ReplyStream, GenerationError> {
            assert!(request.deterministic);
            self.prompts.borrow_mut().push(request.prompt.clone());
            (self.stream)()
        }

        fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
            *self.fallback_calls.borrow_mut() += 1;
            self.fallback.clone()
        }
    }

    fn session(adapter: Scripted) -> ChatSession<Scripted> {
        ChatSession::new(adapter, &ChatSettings::default())
    }

    #[test]
    fn test_streamed_reply_is_cleaned_and_recorded() {
        let mut s = session(Scripted::new(
            || Ok(ReplyStream::from_chunks(["Assistant: ", "Hi ", "there", "<|im_start|>user\nmore"])),
            Ok("unused".to_string()),
        ));
        let mut out = Vec::new();

        let reply = s.respond("hello", &mut out).unwrap();

        assert_eq!(reply, "Hi there");
        assert_eq!(*s.adapter().fallback_calls.borrow(), 0);
        let history = s.buffer().get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role(), Role::User);
        assert_eq!(history[0].text(), "hello");
        assert_eq!(history[1].text(), "Hi there");
        assert_eq!(s.state(), SessionState::AwaitingInput);

        let shown = String::from_utf8(out).unwrap();
        assert!(shown.starts_with("Bot: Assistant: Hi there"));
    }

    #[test]
    fn test_stream_start_failure_uses_fallback() {
        let mut s = session(Scripted::new(
            || Err(GenerationError::Backend("no context".to_string())),
            Ok("Fallback answer".to_string()),
        ));
        let mut out = Vec::new();

        let reply = s.respond("question", &mut out).unwrap();

        assert_eq!(reply, "Fallback answer");
        assert_eq!(*s.adapter().fallback_calls.borrow(), 1);
        assert!(String::from_utf8(out).unwrap().contains("Bot: Fallback answer\n"));
    }

    #[test]
    fn test_mid_stream_failure_discards_partial() {
        let mut s = session(Scripted::new(
            || {
                Ok(ReplyStream::failing_after(
                    ["half an "],
                    GenerationError::StreamInterrupted("decode".to_string()),
                ))
            },
            Ok("whole answer".to_string()),
        ));
        let mut out = Vec::new();

        let reply = s.respond("question", &mut out).unwrap();

        assert_eq!(reply, "whole answer");
        assert_eq!(s.buffer().get_history()[1].text(), "whole answer");
    }

    #[test]
    fn test_empty_stream_uses_fallback() {
        let mut s = session(Scripted::new(
            || Ok(ReplyStream::from_chunks(["  ", "Assistant:"])),
            Ok("Assistant: recovered".to_string()),
        ));
        let mut out = Vec::new();

        assert_eq!(s.respond("q", &mut out).unwrap(), "recovered");
        assert_eq!(*s.adapter().fallback_calls.borrow(), 1);
    }

    #[test]
    fn test_failed_fallback_records_empty_reply() {
        let mut s = session(Scripted::new(
            || Ok(ReplyStream::from_chunks(Vec::<String>::new())),
            Err(GenerationError::EmptyOutput),
        ));
        let mut out = Vec::new();

        assert_eq!(s.respond("q", &mut out).unwrap(), "");
        let history = s.buffer().get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role(), Role::Assistant);
        assert_eq!(history[1].text(), "");
    }

    #[test]
    fn test_prompt_includes_previous_exchange() {
        let mut s = session(Scripted::new(
            || Ok(ReplyStream::from_chunks(["ok"])),
            Ok(String::new()),
        ));
        let mut out = Vec::new();

        s.respond("first", &mut out).unwrap();
        s.respond("second", &mut out).unwrap();

        let prompts = s.adapter().prompts.borrow();
        assert!(!prompts[0].contains("<|im_start|>assistant\nok<|im_end|>"));
        let first = prompts[1].find("<|im_start|>user\nfirst<|im_end|>").unwrap();
        let answer = prompts[1].find("<|im_start|>assistant\nok<|im_end|>").unwrap();
        let second = prompts[1].find("<|im_start|>user\nsecond<|im_end|>").unwrap();
        assert!(first < answer && answer < second);
    }

    #[test]
    fn test_run_until_exit() {
        let mut s = session(Scripted::new(
            || Ok(ReplyStream::from_chunks(["pong"])),
            Ok(String::new()),
        ));
        let input = io::Cursor::new("\n   \nping\n/Exit\nignored\n");
        let mut out = Vec::new();

        s.run(input, &mut out).unwrap();

        assert_eq!(s.state(), SessionState::Finished);
        assert_eq!(s.buffer().len(), 2);
        assert_eq!(s.adapter().prompts.borrow().len(), 1);
        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("Type '/exit' to quit."));
        assert!(shown.contains("Bot: pong\n"));
        assert!(shown.ends_with("Exiting. Goodbye!\n"));
    }

    #[test]
    fn test_run_survives_invalid_utf8_line() {
        let mut s = session(Scripted::new(
            || Ok(ReplyStream::from_chunks(["pong"])),
            Ok(String::new()),
        ));
        let mut out = Vec::new();

        s.run(io::Cursor::new(&b"\xff\xfe\nhello\n/exit\n"[..]), &mut out)
            .unwrap();

        assert_eq!(s.state(), SessionState::Finished);
        let history = s.buffer().get_history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].text(), "\u{FFFD}\u{FFFD}");
        assert_eq!(history[2].text(), "hello");
        assert_eq!(history[3].text(), "pong");
    }

    #[test]
    fn test_run_ends_on_eof() {
        let mut s = session(Scripted::new(
            || Ok(ReplyStream::from_chunks(["pong"])),
            Ok(String::new()),
        ));
        let mut out = Vec::new();

        s.run(io::Cursor::new("ping"), &mut out).unwrap();

        assert_eq!(s.state(), SessionState::Finished);
        assert_eq!(s.buffer().len(), 2);
    }
}
