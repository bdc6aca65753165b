//! Command-line interface.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "synthforge")]
#[command(about = "Turn documents into curated instruction-tuning datasets")]
#[command(version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Path to a YAML configuration file
    #[arg(long, short, global = true, env = "SYNTHFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the data directories and initialize the database
    Init,

    /// Run the full pipeline on a source document or URL
    Run {
        /// Source file (under the uploads root) or URL
        source: String,

        /// Project name to run under (created if missing)
        #[arg(long, default_value = "default")]
        project: String,

        /// Generation type: qa or cot
        #[arg(long, default_value = "qa")]
        qa_type: String,

        /// Number of items to generate
        #[arg(long)]
        num_pairs: Option<usize>,

        /// Curation quality threshold (0-10)
        #[arg(long)]
        threshold: Option<f64>,

        /// Export format: jsonl, alpaca, ft, chatml
        #[arg(long, default_value = "jsonl")]
        format: String,
    },

    /// List jobs
    Jobs {
        /// Filter by status: pending, running, completed, failed
        #[arg(long)]
        status: Option<String>,

        /// Filter by type: ingest, create, curate, save-as
        #[arg(long)]
        job_type: Option<String>,

        /// Maximum rows to show
        #[arg(long, default_value = "20")]
        limit: u32,

        /// Rows to skip
        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// Requeue or fail stale running jobs
    Reconcile,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Executes the parsed command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Init => commands::init(&config).await,
        Command::Run {
            source,
            project,
            qa_type,
            num_pairs,
            threshold,
            format,
        } => {
            commands::run_pipeline(
                &config,
                commands::RunArgs {
                    source,
                    project,
                    qa_type,
                    num_pairs,
                    threshold,
                    format,
                },
            )
            .await
        }
        Command::Jobs {
            status,
            job_type,
            limit,
            offset,
        } => commands::list_jobs(&config, status, job_type, limit, offset).await,
        Command::Reconcile => commands::reconcile(&config).await,
    }
}
