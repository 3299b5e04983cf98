//! Row-level transformations applied after the union: deduplication, calendar
//! decomposition of the timestamp, and per-user/per-item sequence numbering.
//!
//! Each transformation returns a materialized frame. Downstream stages therefore
//! read computed batches, never a chain of lazy window expressions stacked on top
//! of a freshly unioned table.

pub mod dedup;
pub mod sequence;
pub mod temporal;

use datafusion::prelude::DataFrame;

use crate::config::TimeZoneMode;
use crate::engine::Engine;
use crate::error::{PipelineError, Result, Stage, StageContext};

/// Fails with [`PipelineError::MissingColumn`] for the first of `columns` that `df` lacks.
pub fn require_columns(df: &DataFrame, columns: &[&str], stage: Stage) -> Result<()> {
    let schema = df.schema();
    for column in columns {
        if !schema.fields().iter().any(|f| f.name() == column) {
            return Err(PipelineError::MissingColumn {
                column: column.to_string(),
                stage,
            });
        }
    }
    Ok(())
}

/// Temporal decomposition followed by sequence numbering, each materialized. Failures
/// are tagged with the step that raised them.
pub async fn derive_all(engine: &Engine, df: DataFrame, zone: TimeZoneMode) -> Result<DataFrame> {
    let with_calendar = temporal::derive(engine, df, zone).await.stage(Stage::Temporal)?;
    sequence::derive(engine, with_calendar).await.stage(Stage::Sequence)
}

// Link to test module (only compiled during tests)
#[cfg(test)]
#[path = "tests/mod.rs"]
mod tests;
