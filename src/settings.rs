use std::env;
use std::fs;
use std::str::FromStr;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Path of an optional JSON settings file.
pub const CONFIG_ENV: &str = "CHAT_CONFIG";

/// Runtime settings for a chat session.
///
/// Resolved from defaults, then the JSON file named by `CHAT_CONFIG`, then
/// individual environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Exchanges (user + assistant pairs) kept as history.
    pub window_size: usize,
    pub max_new_tokens: usize,
    pub model_path: String,
    pub context_size: u32,
    pub log_dir: String,
    pub log_level: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            window_size: 3,
            max_new_tokens: 256,
            model_path: "models/SmolLM2-360M-Instruct-Q8_0.gguf".to_string(),
            context_size: 4096,
            log_dir: "logs".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ChatSettings {
    /// Load settings from the process environment.
    ///
    /// Also returns the environment variables that were set but could not
    /// be parsed; those keep their previous value.
    pub fn load() -> Result<(Self, Vec<String>), SettingsError> {
        let mut settings = match env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        let ignored = settings.apply_env(|key| env::var(key).ok());
        Ok((settings, ignored))
    }

    /// Read a JSON settings file; missing keys keep their defaults.
    pub fn from_file(path: &str) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| SettingsError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Apply overrides from `lookup` (normally `std::env::var`).
    ///
    /// Returns the keys whose values failed to parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ignored = Vec::new();

        override_parsed(&lookup, "CHAT_WINDOW_SIZE", &mut self.window_size, &mut ignored);
        override_parsed(&lookup, "CHAT_MAX_NEW_TOKENS", &mut self.max_new_tokens, &mut ignored);
        override_parsed(&lookup, "LLAMA_CONTEXT_SIZE", &mut self.context_size, &mut ignored);

        if let Some(path) = lookup("MODEL_PATH").filter(|v| !v.trim().is_empty()) {
            self.model_path = path;
        }
        if let Some(dir) = lookup("CHAT_LOG_DIR").filter(|v| !v.trim().is_empty()) {
            self.log_dir = dir;
        }
        if let Some(level) = lookup("CHAT_LOG_LEVEL") {
            if LevelFilter::from_str(level.trim()).is_ok() {
                self.log_level = level.trim().to_string();
            } else {
                ignored.push("CHAT_LOG_LEVEL".to_string());
            }
        }

        ignored
    }

    /// Root log level; unknown names fall back to `Info`.
    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, target: &mut T, ignored: &mut Vec<String>)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => ignored.push(key.to_string()),
        }
    }
}
