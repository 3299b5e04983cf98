//! Ratings Explorer - Exploratory Summaries over Per-Category Rating Files
//!
//! Loads a directory of headerless rating files (one per product category), unions them,
//! collapses same-second duplicates, derives calendar and sequence features, and computes
//! grouped count / mean-rating summaries. Works with both local directories and S3.
//!
//! # Overview
//!
//! The run is a one-way chain of stages, each checkpointed in the engine's memory:
//! - **Enumerate**: list source files and derive each file's category from its name
//! - **Load**: read, type and tag every file, then union them (`unified`)
//! - **Deduplicate**: keep one row per (user, timestamp) (`deduplicated`)
//! - **Derive features**: calendar fields and per-user/per-item sequence numbers (`enriched`)
//! - **Summarize**: five grouped summaries computed from `enriched`
//!
//! # Quick Start
//!
//! ```no_run
//! use ratings_explorer::{run_pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> ratings_explorer::Result<()> {
//!     let report = run_pipeline(PipelineConfig::for_dir("data/ratings")).await?;
//!     println!("{}", report.summaries.render());
//!     Ok(())
//! }
//! ```
//!
//! # Execution
//!
//! All relational work runs on an embedded DataFusion session. The driver issues one
//! request at a time; the engine parallelizes internally over `target_partitions`.
pub mod aggregation;
pub mod cache_manager;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod sources;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::aggregation::{export_parquet, AggregateRequest, Summary, SummaryReport, SummaryTable};
pub use crate::config::{PipelineConfig, TimeZoneMode};
pub use crate::error::{PipelineError, Result, Stage};
pub use crate::pipeline::{Pipeline, RunReport, StageCounts};
pub use crate::sources::source_enumerator::SourceDescriptor;

use crate::error::StageContext;
use crate::sources::source_enumerator::enumerate_sources;

/// Runs every stage for `config` and returns the counts and summaries.
///
/// # Errors
///
/// Returns [`PipelineError::Stage`] naming the failed stage, or
/// [`PipelineError::Config`] when `config` is invalid.
pub async fn run_pipeline(config: PipelineConfig) -> Result<RunReport> {
    let mut pipeline = Pipeline::new(config)?;
    pipeline.run().await
}

/// Source files a run over `config` would read, sorted by path.
pub async fn list_sources(config: &PipelineConfig) -> Result<Vec<SourceDescriptor>> {
    enumerate_sources(&config.source_dir, &config.naming)
        .await
        .stage(Stage::Enumerate)
}
