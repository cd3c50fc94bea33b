use clap::{Parser, Subcommand};
use logsift::window::{parse_instant, WindowSpec};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logsift")]
#[command(about = "LLM-assisted log triage", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and run the daily scheduler (default)
    Serve,
    /// Run one task now and print its report
    Run {
        task: String,
        #[arg(long)]
        minutes_ago: Option<u32>,
        #[arg(long)]
        hours_ago: Option<u32>,
        /// RFC 3339 or "YYYY-MM-DD HH:MM:SS" (local time)
        #[arg(long, value_parser = parse_instant)]
        since: Option<chrono::DateTime<chrono::Utc>>,
        #[arg(long, value_parser = parse_instant)]
        until: Option<chrono::DateTime<chrono::Utc>>,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config
    Init {
        #[arg(long)]
        stdout: bool,
    },
    /// Validate the config
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logsift=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = logsift::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Serve) | None => {
            logsift::cli::run::serve(config_path).await?;
        }
        Some(Commands::Run {
            task,
            minutes_ago,
            hours_ago,
            since,
            until,
        }) => {
            let window = WindowSpec {
                since,
                until,
                minutes_ago,
                hours_ago,
            };
            let window = (!window.is_empty()).then_some(window);
            logsift::cli::run::run_once(config_path, &task, window).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                logsift::cli::config::init(stdout)?;
            }
            ConfigAction::Check => {
                logsift::cli::run::check(config_path)?;
            }
        },
    }

    Ok(())
}
