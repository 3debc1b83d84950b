//! Skirmish - Development Tools

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "skirmish-tools")]
#[command(about = "Development tools for the skirmish combat kernel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an ability library
    Validate {
        /// Path to the JSON ability library
        #[arg(default_value = "data/abilities.json")]
        path: PathBuf,
    },
    /// Run a scenario headless and print a summary
    Run {
        /// Path to the RON scenario
        scenario: PathBuf,
        /// Ticks to run (defaults to the scenario's own count)
        #[arg(long)]
        ticks: Option<u64>,
        /// Output format for the summary
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Aligned plain text
    Text,
    /// Pretty JSON
    Json,
    /// Pretty RON
    Ron,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            tracing::info!("Validating ability library: {}", path.display());
            match skirmish_tools::validate::validate_library_file(&path) {
                Ok(report) => {
                    println!("{} abilities, {} expressions: ok", report.abilities, report.expressions);
                }
                Err(e) => {
                    tracing::error!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Run {
            scenario,
            ticks,
            format,
        } => {
            let summary = match skirmish_tools::run::run_scenario_file(&scenario, ticks) {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!("Run failed: {e}");
                    std::process::exit(1);
                }
            };
            let rendered = match format {
                Format::Text => Ok(summary.to_string()),
                Format::Json => summary.to_json(),
                Format::Ron => summary.to_ron(),
            };
            match rendered {
                Ok(text) => println!("{text}"),
                Err(e) => {
                    tracing::error!("Cannot serialize summary: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
