use crate::config::parse::load_config;
use crate::config::{SYSTEM_CONFIG, USER_CONFIG};
use crate::engine::{EngineConfig, EngineError, LogbookEngine, Snapshot};
use crate::entry::LogEntry;
use crate::source::JsonLinesSource;
use chrono::DateTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tracing::{error, info, warn};

/// Newest entries printed under each status line.
const PRINT_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/{}", USER_CONFIG);
            eprintln!("  {}", SYSTEM_CONFIG);
            eprintln!("\nUse --config <path> to specify a config file, or run 'livebook config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_logbook(&config_path).await.map_err(|e| e.into())
}

async fn run_logbook(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    info!(path = %config.source.path.display(), "Opening event source");
    let source = Arc::new(JsonLinesSource::from_config(&config.source));
    let (mut handle, task) =
        LogbookEngine::spawn(EngineConfig::from(&config), source.clone(), source);

    handle.start().await?;
    info!("Logbook started, press Ctrl+C to shutdown");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            changed = handle.changed() => match changed {
                Ok(snapshot) => print_snapshot(&snapshot),
                Err(e) => {
                    error!(error = %e, "Engine stopped unexpectedly");
                    break;
                }
            },
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Engine already gone at shutdown");
    }
    task.await?;

    info!("Logbook shutdown complete");
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    let paused = if snapshot.live {
        String::new()
    } else {
        format!(" (paused, {} batches pending)", snapshot.pending_batches)
    };
    println!("{}{}", snapshot, paused);

    for entry in snapshot.entries().iter().take(PRINT_LIMIT) {
        println!("  {}", format_entry(entry, snapshot));
    }
}

/// One display line: timestamp, subject, message, then who or what caused it.
pub fn format_entry(entry: &LogEntry, snapshot: &Snapshot) -> String {
    let when = DateTime::from_timestamp_millis((entry.when * 1000.0).round() as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| entry.when.to_string());

    let subject = entry
        .field_str("name")
        .or_else(|| entry.entity_id())
        .or_else(|| entry.device_id())
        .unwrap_or("-");

    let mut line = format!("{} {}", when, subject);

    if let Some(message) = entry.field_str("message") {
        line.push(' ');
        line.push_str(message);
    } else if let Some(state) = entry.field_str("state") {
        line.push_str(" changed to ");
        line.push_str(state);
    }

    if let Some(name) = entry
        .field_str("context_user_id")
        .and_then(|id| snapshot.user_names.get(id))
    {
        line.push_str(" by ");
        line.push_str(name);
    }

    if let Some(trace) = entry
        .field_str("context_id")
        .and_then(|id| snapshot.trace_contexts.get(id))
    {
        line.push_str(&format!(" (triggered by {} {})", trace.domain, trace.item_id));
    }

    line
}
