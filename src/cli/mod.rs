// src/cli/mod.rs
// Command-line surface for the hive binary.

pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "hive", version, about = "Coordination substrate for a fleet of AI coding agents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run pending migrations, then start the HTTP/SSE server and session indexer.
    Serve {
        /// Override HIVE_HTTP_PORT for this run.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run pending migrations and exit, printing WAL health.
    Migrate,
    /// Export the current project's beads to issues.jsonl.
    Export {
        /// Project key to export; defaults to the current working directory.
        #[arg(long)]
        project: Option<String>,
    },
    /// Import issues.jsonl into the database.
    Import {
        /// Project key to import into; defaults to the current working directory.
        #[arg(long)]
        project: Option<String>,
    },
}

pub fn default_project_key() -> String {
    std::env::current_dir().map(|p| p.to_string_lossy().to_string()).unwrap_or_else(|_| ".".to_string())
}
