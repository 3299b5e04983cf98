//! Ratings Explorer - Command Line Interface
//!
//! Runs the rating-dataset pipeline over a directory of per-category CSV files and
//! prints the exploratory summaries.
//!
//! # Commands
//!
//! - **`run`** - Loads, deduplicates and enriches every source, then prints the five
//!   summaries (optionally exporting them as Parquet)
//! - **`sources`** - Lists the source files that a run would read, with their
//!   category labels
//!
//! # Source Naming
//!
//! Category labels come from the file name: the first 8 and last 4 characters are
//! dropped and underscores become spaces.
//! ```text
//! ratings_Books.csv              -> "Books"
//! ratings_Toys_And_Games.csv     -> "Toys And Games"
//! ```
//!
//! # Usage Examples
//!
//! ```bash
//! # Summaries in the local time zone
//! ratings_explorer run data/ratings
//!
//! # UTC calendar fields, sequence cutoff of 20, Parquet export
//! ratings_explorer run data/ratings --utc --cutoff 20 --export-dir out/summaries
//!
//! # Public bucket
//! ratings_explorer run "s3://my-bucket/ratings?anon=true"
//!
//! # What would be read
//! ratings_explorer sources data/ratings
//! ```
//!
//! # Logging
//!
//! Progress is logged through `tracing`; set `RUST_LOG` (default `info`).
//!
//! # Exit Codes
//!
//! - `0` - Success
//! - `1` - Invalid configuration or a failed pipeline stage

use std::process;

use clap::{Args, Parser, Subcommand};
use ratings_explorer::{export_parquet, list_sources, Pipeline, PipelineConfig, TimeZoneMode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ratings_explorer", version, about = "Exploratory summaries over per-category rating files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every stage and print the summaries
    Run(RunArgs),
    /// List the rating sources under a directory
    Sources {
        /// Local directory or s3://bucket/prefix
        source_dir: String,
        /// TOML configuration file
        #[arg(long)]
        config: Option<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Local directory or s3://bucket/prefix
    source_dir: String,
    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<String>,
    /// Derive calendar fields in UTC instead of the local zone
    #[arg(long)]
    utc: bool,
    /// Largest sequence number kept in the sequence summaries
    #[arg(long)]
    cutoff: Option<u64>,
    /// Directory (local or s3://) receiving one Parquet file per summary
    #[arg(long)]
    export_dir: Option<String>,
    /// Engine parallelism
    #[arg(long)]
    target_partitions: Option<usize>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => handle_run(args).await,
        Command::Sources { source_dir, config } => handle_sources(&source_dir, config.as_deref()).await,
    }
}

/// Reads the optional config file and points it at `source_dir`.
///
/// Exits with code 1 when the file cannot be read or parsed.
fn base_config(source_dir: &str, config_path: Option<&str>) -> PipelineConfig {
    let config = match config_path {
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("✗ Could not load config '{}': {}", path, e);
                process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };
    PipelineConfig {
        source_dir: source_dir.to_string(),
        ..config
    }
}

/// Handles the `run` command.
///
/// Prints each summary as a table once every stage has finished, then writes the
/// Parquet exports when `--export-dir` is given.
///
/// # Exit Codes
///
/// - `0` - All stages (and the export, if requested) succeeded
/// - `1` - A stage failed; the message names the stage
///
/// # Examples
///
/// ```bash
/// $ ratings_explorer run data/ratings --utc
/// ✓ 2 sources, 3 rows loaded, 2 after deduplication
///
/// by_category (2 groups)
/// category        count  avg_rating
/// Books           1      5.0000
/// Toys And Games  1      4.0000
/// ...
/// ```
async fn handle_run(args: RunArgs) {
    let mut config = base_config(&args.source_dir, args.config.as_deref());
    if args.utc {
        config.time_zone = TimeZoneMode::Utc;
    }
    if let Some(cutoff) = args.cutoff {
        config.sequence_cutoff = cutoff;
    }
    if args.target_partitions.is_some() {
        config.target_partitions = args.target_partitions;
    }

    let mut pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("✗ Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let report = match pipeline.run().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("✗ Pipeline failed: {}", e);
            process::exit(1);
        }
    };

    println!(
        "✓ {} sources, {} rows loaded, {} after deduplication\n",
        report.counts.sources, report.counts.unified_rows, report.counts.deduplicated_rows
    );
    println!("{}", report.summaries.render());

    if let Some(dir) = args.export_dir {
        match export_parquet(&report.summaries, &dir).await {
            Ok(paths) => {
                for path in paths {
                    println!("  wrote {}", path);
                }
            }
            Err(e) => {
                eprintln!("✗ Export failed: {}", e);
                process::exit(1);
            }
        }
    }
}

/// Handles the `sources` command: one line per file with its category label.
async fn handle_sources(source_dir: &str, config_path: Option<&str>) {
    let config = base_config(source_dir, config_path);
    match list_sources(&config).await {
        Ok(descriptors) if descriptors.is_empty() => {
            println!("No rating sources found in {}", source_dir);
        }
        Ok(descriptors) => {
            println!("Sources in {}:", source_dir);
            for descriptor in descriptors {
                println!("  {:<24} {}", descriptor.category_label, descriptor.path);
            }
        }
        Err(e) => {
            eprintln!("✗ Could not list sources: {}", e);
            process::exit(1);
        }
    }
}
