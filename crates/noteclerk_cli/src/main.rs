//! CLI smoke entry point.
//!
//! # Responsibility
//! - Wire config, logging, the PostgreSQL store and the note service the way
//!   a host process would, then report readiness.
//! - Exit non-zero on the first startup failure.

use noteclerk_core::{
    default_log_level, environment_config_path, init_logging, Config, LogSettings, NoteService,
    PostgresNoteStore, ENVIRONMENT_VAR,
};
use std::process::ExitCode;
use std::sync::Arc;

const DEFAULT_ENVIRONMENT: &str = "development";
const CONFIG_DIR: &str = "config";

#[tokio::main]
async fn main() -> ExitCode {
    println!("noteclerk_core ping={}", noteclerk_core::ping());
    println!("noteclerk_core version={}", noteclerk_core::core_version());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("noteclerk startup failed: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), String> {
    let environment =
        std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
    let config_path = environment_config_path(CONFIG_DIR, &environment);
    let config = Config::load(&config_path).map_err(|err| err.to_string())?;

    let base_dir = std::env::current_dir()
        .map_err(|err| format!("cannot resolve working directory: {err}"))?;
    let settings = LogSettings::from_config(&config, default_log_level(), &base_dir)
        .map_err(|err| err.to_string())?;
    init_logging(&settings).map_err(|err| err.to_string())?;
    log::info!(
        "event=startup module=cli status=start environment={} config={}",
        environment,
        config_path.display()
    );

    let store = PostgresNoteStore::initialize(&config)
        .await
        .map_err(|err| err.to_string())?;
    let service = NoteService::builder()
        .config(config)
        .store(Arc::new(store))
        .build()
        .map_err(|err| err.to_string())?;

    log::info!("event=startup module=cli status=ok");
    println!(
        "noteclerk ready environment={} db={}",
        environment,
        service.config().db_settings()
    );
    Ok(())
}
