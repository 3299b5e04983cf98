//! Stage-by-stage driver for one run.
//!
//! The [`Pipeline`] owns the engine handle and the [`CacheManager`] and walks the data
//! forward: enumerate, load, deduplicate, derive features, summarize. Each stage
//! reads the checkpoint pinned by the previous one, pins its own, then unpins the one
//! it superseded, so at most two checkpoints are resident at any time and only
//! `enriched` remains once summaries are being built.
//!
//! Every stage method tags its failure with the [`Stage`] it happened in.
//!
//! ```no_run
//! use ratings_explorer::{Pipeline, PipelineConfig};
//!
//! # async fn example() -> ratings_explorer::Result<()> {
//! let mut pipeline = Pipeline::new(PipelineConfig::for_dir("data/ratings"))?;
//! let report = pipeline.run().await?;
//! println!("{} rows after deduplication", report.counts.deduplicated_rows);
//! # Ok(())
//! # }
//! ```

use tracing::{info, warn};

use crate::aggregation::{run_all, standard_requests, SummaryReport};
use crate::cache_manager::{CacheManager, DEDUPLICATED_SLOT, ENRICHED_SLOT, UNIFIED_SLOT};
use crate::config::PipelineConfig;
use crate::engine::Engine;
use crate::error::{PipelineError, Result, Stage, StageContext};
use crate::features::{dedup, derive_all};
use crate::sources::loader::{load_and_union, LoadOutcome};
use crate::sources::source_enumerator::{enumerate_sources, SourceDescriptor};

/// Row counts at each checkpoint of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub sources: usize,
    pub unified_rows: usize,
    pub deduplicated_rows: usize,
    pub enriched_rows: usize,
}

/// Everything a completed run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub counts: StageCounts,
    pub summaries: SummaryReport,
}

pub struct Pipeline {
    config: PipelineConfig,
    engine: Engine,
    cache: CacheManager,
    counts: StageCounts,
}

impl Pipeline {
    /// Validates `config` and opens an engine session for it.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let engine = Engine::new(&config);
        let cache = CacheManager::new(&engine);
        Ok(Self {
            config,
            engine,
            cache,
            counts: StageCounts::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn counts(&self) -> &StageCounts {
        &self.counts
    }

    /// Lists the rating sources under the configured directory.
    pub async fn enumerate(&mut self) -> Result<Vec<SourceDescriptor>> {
        let descriptors = enumerate_sources(&self.config.source_dir, &self.config.naming)
            .await
            .stage(Stage::Enumerate)?;
        self.counts.sources = descriptors.len();
        Ok(descriptors)
    }

    /// Loads and unions `descriptors` into the `unified` slot.
    pub async fn load(&mut self, descriptors: &[SourceDescriptor]) -> Result<LoadOutcome> {
        if descriptors.is_empty() {
            return Err(PipelineError::NoSources(self.config.source_dir.clone()).in_stage(Stage::Load));
        }
        let delimiter = self.config.delimiter_byte().stage(Stage::Load)?;
        let outcome = load_and_union(&self.engine, &mut self.cache, descriptors, delimiter)
            .await
            .stage(Stage::Load)?;
        self.counts.unified_rows = outcome.unified_rows;
        Ok(outcome)
    }

    /// Collapses `unified` into the `deduplicated` slot and releases `unified`.
    pub async fn deduplicate(&mut self) -> Result<usize> {
        let unified = self.cache.get(UNIFIED_SLOT).await.stage(Stage::Deduplicate)?;
        let deduplicated = dedup::dedupe(&self.engine, unified)
            .await
            .stage(Stage::Deduplicate)?;
        let handle = self
            .cache
            .pin(deduplicated, DEDUPLICATED_SLOT)
            .await
            .stage(Stage::Deduplicate)?;
        self.cache.unpin(UNIFIED_SLOT).stage(Stage::Deduplicate)?;

        let removed = self.counts.unified_rows.saturating_sub(handle.rows);
        if removed > 0 {
            warn!(removed, "collapsed same-second ratings by the same user");
        }
        info!(rows = handle.rows, "deduplicated ratings");
        self.counts.deduplicated_rows = handle.rows;
        Ok(handle.rows)
    }

    /// Adds calendar columns and sequence numbers, pinning `enriched` and releasing
    /// `deduplicated`.
    ///
    /// Fails with [`PipelineError::MissingColumn`] naming `deduplicated` when run before
    /// [`Self::deduplicate`].
    pub async fn derive_features(&mut self) -> Result<usize> {
        if !self.cache.contains(DEDUPLICATED_SLOT) {
            return Err(PipelineError::MissingColumn {
                column: DEDUPLICATED_SLOT.to_string(),
                stage: Stage::Temporal,
            }
            .in_stage(Stage::Temporal));
        }
        let deduplicated = self.cache.get(DEDUPLICATED_SLOT).await.stage(Stage::Temporal)?;
        let enriched = derive_all(&self.engine, deduplicated, self.config.time_zone).await?;

        let handle = self
            .cache
            .pin(enriched, ENRICHED_SLOT)
            .await
            .stage(Stage::Sequence)?;
        self.cache.unpin(DEDUPLICATED_SLOT).stage(Stage::Sequence)?;

        info!(rows = handle.rows, zone = ?self.config.time_zone, "derived features");
        self.counts.enriched_rows = handle.rows;
        Ok(handle.rows)
    }

    /// Computes the standard summaries from the `enriched` slot.
    pub async fn summarize(&self) -> Result<SummaryReport> {
        let enriched = self.cache.get(ENRICHED_SLOT).await.stage(Stage::Aggregate)?;
        let requests = standard_requests(self.config.sequence_cutoff);
        run_all(&enriched, &requests).await.stage(Stage::Aggregate)
    }

    /// Runs every stage in order.
    pub async fn run(&mut self) -> Result<RunReport> {
        let descriptors = self.enumerate().await?;
        info!(sources = descriptors.len(), dir = %self.config.source_dir, "enumerated sources");
        self.load(&descriptors).await?;
        self.deduplicate().await?;
        self.derive_features().await?;
        let summaries = self.summarize().await?;
        Ok(RunReport {
            counts: self.counts.clone(),
            summaries,
        })
    }
}
