// src/main.rs

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    // Load .env from ~/.hive/.env only (never from CWD -- a malicious repo could override API keys)
    if let Some(home) = dirs::home_dir()
        && let Err(e) = dotenvy::from_path(home.join(".hive/.env"))
    {
        tracing::debug!("failed to load global .env file: {}", e);
    }

    let cli = Cli::parse();

    let level = hive::config::log_level_override()
        .and_then(|s| match s.to_lowercase().as_str() {
            "error" => Some(Level::ERROR),
            "warn" => Some(Level::WARN),
            "info" => Some(Level::INFO),
            "debug" | "trace" => Some(Level::DEBUG),
            _ => None,
        })
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_writer(std::io::stderr).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = hive::config::EnvConfig::load();

    let result = match cli.command {
        None => cli::serve::run(config, None).await,
        Some(Command::Serve { port }) => cli::serve::run(config, port).await,
        Some(Command::Migrate) => cli::serve::migrate(config).await,
        Some(Command::Export { project }) => cli::serve::export(config, project.unwrap_or_else(cli::default_project_key)).await,
        Some(Command::Import { project }) => cli::serve::import(config, project.unwrap_or_else(cli::default_project_key)).await,
    };

    if let Err(e) = result {
        eprintln!("hive: {e}");
        std::process::exit(match e.kind() {
            hive::error::ErrorKind::NotFound => 3,
            hive::error::ErrorKind::Parse => 2,
            _ => 1,
        });
    }
}
