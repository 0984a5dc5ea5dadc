//! Contract between the chat session and a text generation backend.
//!
//! A backend produces either a complete string or a [`ReplyStream`]: chunks
//! pushed by a producer thread over a crossbeam channel and consumed, in
//! order, by the session thread. The stream ends when the producer returns.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};

use crate::error::GenerationError;

/// Parameters for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_new_tokens: usize,
    /// Greedy decoding: the same prompt always yields the same text.
    pub deterministic: bool,
}

impl GenerationRequest {
    /// Deterministic request, the default for chat turns.
    pub fn new(prompt: impl Into<String>, max_new_tokens: usize) -> Self {
        Self {
            prompt: prompt.into(),
            max_new_tokens,
            deterministic: true,
        }
    }
}

/// A text generation backend.
pub trait GenerationAdapter {
    /// Start a streamed generation.
    fn stream(&self, request: &GenerationRequest) -> Result<ReplyStream, GenerationError>;

    /// Generate the complete continuation in one call.
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.stream(request)?.collect()
    }
}

enum StreamEvent {
    Chunk(String),
    Failed(GenerationError),
}

/// Producer side of a [`ReplyStream`].
pub struct ChunkSink {
    tx: Sender<StreamEvent>,
}

impl ChunkSink {
    /// Push a chunk to the consumer. Returns `false` once the consumer has
    /// dropped the stream; the producer should stop generating then.
    pub fn send(&self, chunk: impl Into<String>) -> bool {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return true;
        }
        self.tx.send(StreamEvent::Chunk(chunk)).is_ok()
    }
}

/// Finite, non-restartable sequence of generated text chunks.
///
/// Yields `Ok(chunk)` per chunk and at most one `Err` after which the stream
/// is exhausted.
pub struct ReplyStream {
    rx: Receiver<StreamEvent>,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

impl ReplyStream {
    /// Run `producer` on a background thread, streaming what it sends.
    ///
    /// An `Err` returned by the producer is delivered as the last item.
    pub fn spawn<F>(producer: F) -> Result<Self, GenerationError>
    where
        F: FnOnce(&ChunkSink) -> Result<(), GenerationError> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = thread::Builder::new()
            .name("generation".to_string())
            .spawn(move || {
                let sink = ChunkSink { tx };
                if let Err(e) = producer(&sink) {
                    error!("Generation worker failed: {e}");
                    let _ = sink.tx.send(StreamEvent::Failed(e));
                }
                debug!("Generation worker finished");
            })
            .map_err(|e| GenerationError::Backend(format!("Failed to spawn generation thread: {e}")))?;

        Ok(Self {
            rx,
            worker: Some(worker),
            finished: false,
        })
    }

    /// Stream over chunks that are already available.
    pub fn from_chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::preloaded(chunks, None)
    }

    /// Stream that yields `chunks` and then fails with `error`.
    pub fn failing_after<I, S>(chunks: I, error: GenerationError) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::preloaded(chunks, Some(error))
    }

    fn preloaded<I, S>(chunks: I, error: Option<GenerationError>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = ChunkSink { tx };
        for chunk in chunks {
            sink.send(chunk);
        }
        if let Some(e) = error {
            let _ = sink.tx.send(StreamEvent::Failed(e));
        }
        Self {
            rx,
            worker: None,
            finished: false,
        }
    }

    fn finish(&mut self) -> Option<GenerationError> {
        self.finished = true;
        match self.worker.take() {
            Some(handle) => handle.join().err().map(|_| GenerationError::WorkerPanicked),
            None => None,
        }
    }
}

impl Iterator for ReplyStream {
    type Item = Result<String, GenerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.rx.recv() {
            Ok(StreamEvent::Chunk(chunk)) => Some(Ok(chunk)),
            Ok(StreamEvent::Failed(e)) => {
                self.finish();
                Some(Err(e))
            }
            // All senders dropped: the producer returned or panicked
            Err(_) => self.finish().map(Err),
        }
    }
}

impl std::fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream")
            .field("threaded", &self.worker.is_some())
            .field("finished", &self.finished)
            .finish()
    }
}
