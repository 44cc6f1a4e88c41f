//! typebench CLI: one subcommand per benchmark pipeline stage.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// typebench: term-typing benchmark runs against LLM providers
#[derive(Parser, Debug)]
#[command(name = "typebench", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds typebench.toml and the dataset tree)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build request batches from the train/test splits and prompt template
    Prepare {
        /// Dataset name or "all"
        dataset: String,
        /// Model the batch is prepared for, or "all"
        #[arg(short, long)]
        model: String,
    },
    /// Dispatch a prepared batch to a model and save its predictions
    Run {
        /// Dataset name or "all"
        dataset: String,
        /// Model identifier from the model table, or "all"
        #[arg(short, long)]
        model: String,
    },
    /// Dispatch a re-run batch and merge its predictions into the existing results
    Rerun {
        /// Dataset name or "all"
        dataset: String,
        /// Model identifier from the model table, or "all"
        #[arg(short, long)]
        model: String,
        /// Batch to dispatch (defaults to the batch written by `missing`)
        #[arg(long)]
        items: Option<PathBuf>,
    },
    /// Build judge batches from several reasoner models' results
    PrepareJudge {
        /// Dataset name or "all"
        dataset: String,
        /// Model that will arbitrate
        #[arg(short, long)]
        judge: String,
        /// Comma-separated reasoner models, e.g. gpt-4o,deepseek-chat
        #[arg(short, long)]
        reasoners: String,
    },
    /// Run the judge model over every prepared judge batch
    Judge {
        /// Dataset name or "all"
        dataset: String,
        /// Model that arbitrates
        #[arg(short, long)]
        judge: String,
    },
    /// Join curated results with test data into a reason CSV
    Join {
        /// Dataset name or "all"
        dataset: String,
        #[arg(short, long)]
        model: String,
    },
    /// Ask a model to justify its joined predictions
    Reason {
        /// Dataset name or "all"
        dataset: String,
        #[arg(short, long)]
        model: String,
    },
    /// Strip reasons from result files for submission
    Strip {
        #[command(subcommand)]
        action: StripAction,
    },
    /// Find reference ids without a result and collect their requests for a re-run
    Missing {
        /// Dataset name or "all" (ignored when explicit paths are given)
        dataset: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        /// Request items file (JSON Lines)
        #[arg(long, requires_all = ["results", "reference"])]
        items: Option<PathBuf>,
        /// Results file (JSON)
        #[arg(long, requires_all = ["items", "reference"])]
        results: Option<PathBuf>,
        /// Reference file (JSON)
        #[arg(long, requires_all = ["items", "results"])]
        reference: Option<PathBuf>,
        /// Directory for the report and re-run batch in explicit mode
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum StripAction {
    /// Reason-stage results: result_with_reason/<model>/<dataset>.json
    Reason {
        /// Dataset name or "all"
        dataset: String,
        #[arg(short, long)]
        model: String,
    },
    /// Every judge result of a model: results_judge/<model>/*.json
    Judge {
        #[arg(short, long)]
        model: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a typebench.toml with the defaults into the workspace
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "typebench", "typebench")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "typebench.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| cli.workspace.clone());

    commands::handle_command(cli.command, &workspace).await
}
