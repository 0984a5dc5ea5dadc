// llama.cpp backed engine. Loads one GGUF model for the process lifetime and
// creates a fresh context per generation.

use std::num::NonZeroU32;
use std::sync::Arc;

use llama_cpp_2::{
    context::params::LlamaContextParams,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::{params::LlamaModelParams, AddBos, LlamaModel, Special},
    sampling::LlamaSampler,
    send_logs_to_tracing, LogOptions,
};
use log::{debug, info, warn};

use crate::error::GenerationError;
use crate::generation::{GenerationAdapter, GenerationRequest, ReplyStream};
use crate::prompt::{TURN_END, TURN_START};
use crate::settings::ChatSettings;
use crate::stop_conditions::check_stop_conditions;

const STOP_MARKERS: &[&str] = &[TURN_END, TURN_START];

// Sampling used when a request is not deterministic
const TEMPERATURE: f32 = 0.7;
const SEED: u32 = 1234;

struct Loaded {
    backend: LlamaBackend,
    model: LlamaModel,
    context_size: u32,
}

pub struct ChatEngine {
    loaded: Arc<Loaded>,
    model_path: String,
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field("model_path", &self.model_path)
            .field("context_size", &self.loaded.context_size)
            .finish()
    }
}

impl ChatEngine {
    pub fn new(settings: &ChatSettings) -> Result<Self, GenerationError> {
        // Keep llama.cpp's own logging off the terminal
        send_logs_to_tracing(LogOptions::default());

        println!("Initializing model: {}...", settings.model_path);

        let backend = LlamaBackend::init()
            .map_err(|e| GenerationError::Backend(format!("Failed to init backend: {e}")))?;

        let model_params = LlamaModelParams::default();
        let model = LlamaModel::load_from_file(&backend, &settings.model_path, &model_params)
            .map_err(|e| {
                GenerationError::Backend(format!(
                    "Failed to load model from {}: {e}",
                    settings.model_path
                ))
            })?;

        println!("Model and tokenizer initialized successfully.");
        info!(
            "Loaded model {} (context {} tokens)",
            settings.model_path, settings.context_size
        );

        Ok(Self {
            loaded: Arc::new(Loaded {
                backend,
                model,
                context_size: settings.context_size,
            }),
            model_path: settings.model_path.clone(),
        })
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }
}

impl GenerationAdapter for ChatEngine {
    fn stream(&self, request: &GenerationRequest) -> Result<ReplyStream, GenerationError> {
        let loaded = Arc::clone(&self.loaded);
        let request = request.clone();

        ReplyStream::spawn(move |sink| {
            run_generation(&loaded, &request, &mut |piece| sink.send(piece)).map(|_| ())
        })
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut response = String::new();
        run_generation(&self.loaded, request, &mut |piece| {
            response.push_str(piece);
            true
        })?;
        Ok(response)
    }
}

fn backend_err(what: &str, e: impl std::fmt::Display) -> GenerationError {
    GenerationError::Backend(format!("{what}: {e}"))
}

fn create_sampler(deterministic: bool) -> LlamaSampler {
    if deterministic {
        LlamaSampler::greedy()
    } else {
        LlamaSampler::chain_simple([LlamaSampler::temp(TEMPERATURE), LlamaSampler::dist(SEED)])
    }
}

/// Decode up to `max_new_tokens` tokens after the prompt.
///
/// Visible text goes to `emit` as it settles; text that might begin a stop
/// marker is held back until the next token. Returns the number of tokens
/// generated. Stops early when `emit` returns `false`.
fn run_generation(
    loaded: &Loaded,
    request: &GenerationRequest,
    emit: &mut dyn FnMut(&str) -> bool,
) -> Result<usize, GenerationError> {
    let model = &loaded.model;

    let tokens = model
        .str_to_token(&request.prompt, AddBos::Never)
        .map_err(|e| backend_err("Tokenization failed", e))?;
    if tokens.is_empty() {
        return Err(GenerationError::Backend("Prompt produced no tokens".to_string()));
    }
    if tokens.len() >= loaded.context_size as usize {
        return Err(GenerationError::Backend(format!(
            "Prompt of {} tokens does not fit in a context of {}",
            tokens.len(),
            loaded.context_size
        )));
    }
    debug!("Prompt tokenized into {} tokens", tokens.len());

    let n_ctx = NonZeroU32::new(loaded.context_size)
        .ok_or_else(|| GenerationError::Backend("Context size must be positive".to_string()))?;
    let ctx_params = LlamaContextParams::default().with_n_ctx(Some(n_ctx));
    let mut context = model
        .new_context(&loaded.backend, ctx_params)
        .map_err(|e| backend_err("Context creation failed", e))?;

    let mut batch = LlamaBatch::new(tokens.len().max(512), 1);
    let last_index = tokens.len() - 1;
    for (i, &token) in tokens.iter().enumerate() {
        batch
            .add(token, i as i32, &[0], i == last_index)
            .map_err(|e| backend_err("Batch add failed", e))?;
    }
    context
        .decode(&mut batch)
        .map_err(|e| backend_err("Initial decode failed", e))?;

    let mut sampler = create_sampler(request.deterministic);
    let mut decoder = encoding_rs::UTF_8.new_decoder();
    let mut response = String::new();
    let mut emitted = 0;
    let mut token_pos = tokens.len() as i32;
    let budget = request
        .max_new_tokens
        .min(loaded.context_size as usize - tokens.len());
    let mut generated = 0;

    while generated < budget {
        let next_token = sampler.sample(&context, batch.n_tokens() - 1);
        generated += 1;

        if model.is_eog_token(next_token) {
            break;
        }

        let bytes = model
            .token_to_bytes(next_token, Special::Tokenize)
            .map_err(|e| GenerationError::StreamInterrupted(format!("Token conversion failed: {e}")))?;
        let capacity = decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len() * 3 + 4);
        let mut piece = String::with_capacity(capacity);
        let _ = decoder.decode_to_string(&bytes, &mut piece, false);

        let check = check_stop_conditions(&response, &piece, STOP_MARKERS);
        response.push_str(&piece);

        if check.should_stop {
            let visible_end = response.len() - check.marker_len;
            if visible_end > emitted {
                emit(&response[emitted..visible_end]);
            }
            debug!("Stopped at marker {:?}", check.matched_token);
            return Ok(generated);
        }

        let visible_end = response.len() - check.pending;
        if visible_end > emitted {
            if !emit(&response[emitted..visible_end]) {
                warn!("Consumer went away, stopping generation");
                return Ok(generated);
            }
            emitted = visible_end;
        }

        batch.clear();
        batch
            .add(next_token, token_pos, &[0], true)
            .map_err(|e| GenerationError::StreamInterrupted(format!("Batch add failed: {e}")))?;
        context
            .decode(&mut batch)
            .map_err(|e| GenerationError::StreamInterrupted(format!("Decode failed: {e}")))?;
        token_pos += 1;
    }

    response.push_str(&flush_decoder(&mut decoder));
    if response.len() > emitted {
        emit(&response[emitted..]);
    }
    Ok(generated)
}

/// Finish decoding; an incomplete trailing sequence becomes U+FFFD.
fn flush_decoder(decoder: &mut encoding_rs::Decoder) -> String {
    let capacity = decoder.max_utf8_buffer_length(0).unwrap_or(0).max(8);
    let mut tail = String::with_capacity(capacity);
    let _ = decoder.decode_to_string(&[], &mut tail, true);
    tail
}
