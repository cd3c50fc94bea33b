use crate::config::{load_config, ConfigError};
use crate::scheduler::Scheduler;
use crate::task::{BuildError, EngineError, Run, RunStatus, TaskEngine};
use crate::web::{run_server, AppState};
use crate::window::WindowSpec;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(
        "config not found (searched ~/.config/logsift/config.yml and /etc/logsift/config.yml); \
         use --config <path> or run 'logsift config init'"
    )]
    ConfigNotFound,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Build(#[from] BuildError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("web server error: {0}")]
    WebServer(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("run {run_id} failed: {reason}")]
    RunFailed { run_id: uuid::Uuid, reason: String },
}

fn load(config_path: Option<PathBuf>) -> Result<(PathBuf, crate::config::Config), RunError> {
    let path = config_path.ok_or(RunError::ConfigNotFound)?;
    info!(config_path = %path.display(), "Loading configuration");
    let config = load_config(&path)?;
    Ok((path, config))
}

/// Runs the HTTP interface and the scheduler until Ctrl+C.
pub async fn serve(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let (_, config) = load(config_path)?;
    let engine = TaskEngine::from_config(&config)?;
    info!(tasks = ?engine.task_names(), "Task engine ready");

    let scheduler = Arc::new(Scheduler::new(engine.clone(), config.monitoring.clone()));
    scheduler.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        engine,
        scheduler: scheduler.clone(),
    };
    let listen = config.server.listen.clone();
    let mut web_handle = tokio::spawn(async move { run_server(&listen, state, shutdown_rx).await });

    info!("logsift started, press Ctrl+C to shutdown");

    let web_result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            (&mut web_handle).await
        }
        result = &mut web_handle => result,
    };

    scheduler.stop().await;

    match web_result? {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Web server error");
            Err(e.into())
        }
    }
}

/// Runs one task to completion and prints its report as markdown.
pub async fn run_once(
    config_path: Option<PathBuf>,
    task: &str,
    window: Option<WindowSpec>,
) -> Result<Run, RunError> {
    let (_, config) = load(config_path)?;
    let engine = TaskEngine::from_config(&config)?;

    let run = engine.run(task, window).await?;
    if let Some(report) = engine.report(run.id) {
        print!("{}", report.render_markdown());
    }
    for warning in &run.warnings {
        eprintln!("warning: {}", warning);
    }

    match run.status {
        RunStatus::Succeeded => Ok(run),
        _ => Err(RunError::RunFailed {
            run_id: run.id,
            reason: run.error.clone().unwrap_or_else(|| "unknown error".to_string()),
        }),
    }
}

/// Loads and validates a config, printing what it defines.
pub fn check(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let path = config_path.ok_or(RunError::ConfigNotFound)?;
    println!("Validating config file: {}", path.display());
    let config = load_config(&path)?;
    print_config_summary(&path, &config);
    Ok(())
}

fn print_config_summary(path: &Path, config: &crate::config::Config) {
    println!("✓ Config is valid: {}", path.display());
    println!("  llm: {} via {}", config.llm.model, config.llm.base_url);
    for task in &config.tasks {
        println!(
            "  task '{}': source {}, {} sink(s)",
            task.name,
            task.source.label(),
            task.sinks.len()
        );
    }
    if config.monitoring.enabled {
        println!(
            "  monitoring: daily at {:02}:00 for {} task(s)",
            config.monitoring.fire_hour,
            config.monitoring.tasks.len()
        );
    } else {
        println!("  monitoring: disabled");
    }
}
