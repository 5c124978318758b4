//! CLI smoke entry point.
//!
//! # Responsibility
//! - Connect the garage service to a local SQLite data directory.
//! - Print the first page of garages as JSON.

use smartpark_core::{
    default_log_level, init_logging, GarageService, ListParams, LogTarget, ServiceConfig,
    SqliteConnector,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const DATA_DIR_VAR: &str = "SMARTPARK_DATA_DIR";

fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("smartpark"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level().to_string());
    if let Err(err) = init_logging(&level, LogTarget::Stderr) {
        eprintln!("logging disabled: {err}");
    }

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let dir = data_dir();
    log::info!(
        "event=cli_start module=cli status=ok version={} data_dir={}",
        smartpark_core::core_version(),
        dir.display()
    );
    let service = GarageService::new(config, Arc::new(SqliteConnector::new(dir)));
    let response = service.list(ListParams::default()).await;
    if let Err(err) = service.close().await {
        log::warn!("event=cli_close module=cli status=error error={err}");
    }

    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("cannot render response: {err}");
            return ExitCode::FAILURE;
        }
    }
    if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
