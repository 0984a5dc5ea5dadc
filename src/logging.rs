use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::settings::ChatSettings;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}{n}";

/// Log file for a session started now: `<log_dir>/<YYYY-MM-DD-HH_MM>.log`.
pub fn session_log_path(log_dir: &str) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d-%H_%M").to_string();
    Path::new(log_dir).join(format!("{timestamp}.log"))
}

/// Route the `log` facade to a per-session file.
///
/// Stdout stays reserved for the conversation.
pub fn setup_logging(settings: &ChatSettings) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(&settings.log_dir)
        .with_context(|| format!("Failed to create log directory {}", settings.log_dir))?;
    let log_path = session_log_path(&settings.log_dir);

    let file_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .build(Root::builder().appender("file").build(settings.level_filter()))?;

    log4rs::init_config(config)?;

    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_log_path_shape() {
        let path = session_log_path("logs");
        assert_eq!(path.parent(), Some(Path::new("logs")));

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with(".log"));
        // YYYY-MM-DD-HH_MM.log
        assert_eq!(name.len(), "2024-01-01-00_00.log".len());
    }
}
