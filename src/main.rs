use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use aloft::commands::replay::{self, ReplayFormat};
use aloft::commands::run;
use aloft::telemetry;

#[derive(Parser)]
#[command(name = "aloft", about = "Live aircraft tracking from position reports", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: ingestion, flight tracking and the web server
    Run {
        /// Path to the configuration file
        #[arg(long, default_value = "aloft.toml")]
        config: PathBuf,
    },
    /// Replay a recorded report file through the pipeline
    Replay {
        /// File of timestamped reports, one per line
        file: PathBuf,
        /// Wire format of the recorded reports
        #[arg(long, value_enum, default_value = "ogn")]
        format: ReplayFormat,
        /// Path to the configuration file
        #[arg(long, default_value = "aloft.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => run::run(&config).await,
        Commands::Replay {
            file,
            format,
            config,
        } => replay::replay(&file, format, &config).await,
    }
}
