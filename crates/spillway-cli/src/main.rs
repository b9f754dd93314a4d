use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

use spillway_cli::{ExprArgs, OptionsArgs, OutputFormat, SortArgs, commands};

#[derive(Parser)]
#[command(
    name = "spillway",
    about = "External merge sort with bounded memory and file handles",
    version,
    author,
    long_about = "A command-line tool for the spillway spill engine: sort files larger than memory through spilled runs and a bounded fan-in merge, list option schemas, and evaluate CDC no-field expressions."
)]
struct Cli {
    /// Set the logging level
    #[arg(short, long, value_enum, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Path to a TOML options file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sort newline-delimited files through the external sorter
    Sort(SortArgs),

    /// List option schemas or validate an options file
    Options(OptionsArgs),

    /// Evaluate a CDC no-field expression
    Expr(ExprArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays clean
    tracing_subscriber::fmt()
        .with_max_level(Level::from(cli.log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sort(args) => commands::sort::handle(args, cli.config.as_deref(), cli.format).await?,
        Commands::Options(args) => commands::options::handle(args, cli.format)?,
        Commands::Expr(args) => commands::expr::handle(args, cli.format)?,
    }

    Ok(())
}
