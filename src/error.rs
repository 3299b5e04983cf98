//! Error taxonomy for the ratings pipeline.
//!
//! Every failure is fatal to the current run. Stage methods on
//! [`crate::pipeline::Pipeline`] wrap the underlying error in
//! [`PipelineError::Stage`] so the operator can see which stage failed.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The stages of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Enumerate,
    Load,
    Deduplicate,
    Temporal,
    Sequence,
    Aggregate,
    Export,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enumerate => "enumerate",
            Stage::Load => "load",
            Stage::Deduplicate => "deduplicate",
            Stage::Temporal => "temporal",
            Stage::Sequence => "sequence",
            Stage::Aggregate => "aggregate",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source filename too short to carry the positional category label.
    #[error("invalid source filename '{file_name}': expected at least {min_len} characters")]
    InvalidFilename { file_name: String, min_len: usize },

    /// A table entering the union does not have the canonical column layout.
    #[error("schema mismatch in table '{table}': expected [{expected}], found [{found}]")]
    SchemaMismatch {
        table: String,
        expected: String,
        found: String,
    },

    /// Empty fields in a column every rating row must carry.
    #[error("{rows} row(s) of '{table}' have no value for '{column}'")]
    MissingValue {
        table: String,
        column: String,
        rows: usize,
    },

    /// A stage was run out of order or against a table without its prerequisite column.
    #[error("missing column '{column}' required by stage '{stage}'")]
    MissingColumn { column: String, stage: Stage },

    /// Cache slot referenced after eviction or before creation.
    #[error("cache slot '{0}' not found")]
    SlotNotFound(String),

    #[error("no rating sources found in '{0}'")]
    NoSources(String),

    /// Epoch seconds outside the range representable as a calendar date.
    #[error("timestamp {0} cannot be converted to a calendar date")]
    InvalidTimestamp(i64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    DataFusion(#[from] datafusion::error::DataFusionError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PipelineError {
    /// Tags this error with the stage it happened in. Already-tagged errors keep their
    /// innermost stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            tagged @ PipelineError::Stage { .. } => tagged,
            other => PipelineError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was tagged with, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Strips the stage tag and returns the originating error.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension for tagging `Result`s with the stage that produced them.
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T, E> StageContext<T> for std::result::Result<T, E>
where
    E: Into<PipelineError>,
{
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.into().in_stage(stage))
    }
}
