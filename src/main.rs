use std::io;

use anyhow::Context;
use log::{info, warn};

use llama_cli_chat::logging::setup_logging;
use llama_cli_chat::{ChatEngine, ChatSession, ChatSettings};

fn main() -> anyhow::Result<()> {
    let (settings, ignored) = ChatSettings::load().context("Failed to load settings")?;

    match setup_logging(&settings) {
        Ok(path) => info!("Logging to {}", path.display()),
        Err(e) => eprintln!("Failed to set up logging: {e:#}"),
    }
    for key in &ignored {
        warn!("Ignoring unparseable value for {key}");
    }
    info!("Settings: {settings:?}");

    let engine = ChatEngine::new(&settings).context("Failed to initialize chat engine")?;
    info!("Engine ready for {}", engine.model_path());

    let mut session = ChatSession::new(engine, &settings);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    session.run(stdin.lock(), &mut stdout)
}
