//! loanq application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Load the record store (JSON file or generated portfolio)
//! 3. Build the query pipeline for the configured provider
//! 4. Answer `--ask` questions and exit, or start the axum REST API server

mod cli;

use std::sync::Arc;

use clap::Parser;

use loanq_api::state::AppState;
use loanq_api::start_server;
use loanq_chat::{QueryOrchestrator, SessionRegistry, DEFAULT_SESSION};
use loanq_core::config::LoanqConfig;
use loanq_store::{InMemoryLoanStore, RecordStore};

use crate::cli::CliArgs;

/// Answer each question in one session and print the responses as JSON lines.
async fn answer_questions(
    orchestrator: &QueryOrchestrator,
    questions: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let sessions = SessionRegistry::new();
    let session = sessions.get_or_create(DEFAULT_SESSION);

    for question in questions {
        let line = match orchestrator.handle_query(&session, question).await {
            Ok(response) => serde_json::json!({
                "question": question,
                "result": response.result,
                "explanation": response.explanation,
            }),
            Err(err) => serde_json::json!({
                "question": question,
                "error": err.kind(),
                "explanation": err.user_message(),
            }),
        };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = LoanqConfig::load_or_default(&config_file);
    config.general.port = args.resolve_port(config.general.port);
    if let Some(data_file) = args.resolve_data_file() {
        config.store.data_file = Some(data_file);
    }

    // Tracing: RUST_LOG > --log-level > config.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting loanq v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Record store.
    let store = InMemoryLoanStore::from_config(&config.store)?;
    tracing::info!(records = store.len(), "Record store ready");
    let store: Arc<dyn RecordStore> = Arc::new(store);

    // Query pipeline.
    let orchestrator = QueryOrchestrator::from_config(&config, store)?;

    if !args.ask.is_empty() {
        return answer_questions(&orchestrator, &args.ask).await;
    }

    // === API server ===

    let state = AppState::new(config.clone(), orchestrator);
    if let Err(e) = start_server(&config, state).await {
        tracing::error!(error = %e, "API server stopped");
        tracing::error!("Try: LOANQ_PORT={} loanq", config.general.port.saturating_add(1));
        return Err(e.into());
    }

    Ok(())
}
