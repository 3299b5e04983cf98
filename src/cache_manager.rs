//! Named cache slots on the engine session.
//!
//! A slot is a table registered in the session catalog and backed by fully
//! materialized batches. The pipeline driver owns the [`CacheManager`] and follows one
//! rule at every stage boundary: pin the new checkpoint, then unpin the table it
//! supersedes. Nothing else in the crate registers or deregisters tables.

use std::sync::Arc;

use datafusion::datasource::MemTable;
use datafusion::prelude::{DataFrame, SessionContext};
use hashbrown::HashMap;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{PipelineError, Result};

/// Slot holding the union of every loaded source.
pub const UNIFIED_SLOT: &str = "unified";
/// Slot holding the deduplicated dataset.
pub const DEDUPLICATED_SLOT: &str = "deduplicated";
/// Slot holding the enriched dataset read by the aggregator.
pub const ENRICHED_SLOT: &str = "enriched";

/// Scratch slot for the `index`th per-file read.
pub fn scratch_slot(index: usize) -> String {
    format!("scratch_{}", index)
}

/// Bookkeeping for a pinned slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotHandle {
    pub name: String,
    pub rows: usize,
}

pub struct CacheManager {
    ctx: SessionContext,
    slots: HashMap<String, SlotHandle>,
}

impl CacheManager {
    pub fn new(engine: &Engine) -> Self {
        Self {
            ctx: engine.session().clone(),
            slots: HashMap::new(),
        }
    }

    /// Materializes `df` and holds it under `slot`, replacing whatever the slot held.
    pub async fn pin(&mut self, df: DataFrame, slot: &str) -> Result<SlotHandle> {
        let schema = df.schema().inner().clone();
        let batches = df.collect().await?;
        let rows = batches.iter().map(|b| b.num_rows()).sum();
        let table = MemTable::try_new(schema, vec![batches])?;

        if self.slots.remove(slot).is_some() {
            self.ctx.deregister_table(slot)?;
            debug!(slot, "replacing pinned slot");
        }
        self.ctx.register_table(slot, Arc::new(table))?;

        let handle = SlotHandle {
            name: slot.to_string(),
            rows,
        };
        self.slots.insert(slot.to_string(), handle.clone());
        debug!(slot, rows, "pinned slot");
        Ok(handle)
    }

    /// Releases the memory held by `slot`.
    pub fn unpin(&mut self, slot: &str) -> Result<()> {
        if self.slots.remove(slot).is_none() {
            return Err(PipelineError::SlotNotFound(slot.to_string()));
        }
        self.ctx.deregister_table(slot)?;
        debug!(slot, "unpinned slot");
        Ok(())
    }

    /// Frame reading the pinned contents of `slot`.
    pub async fn get(&self, slot: &str) -> Result<DataFrame> {
        if !self.slots.contains_key(slot) {
            return Err(PipelineError::SlotNotFound(slot.to_string()));
        }
        Ok(self.ctx.table(slot).await?)
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    pub fn row_count(&self, slot: &str) -> Result<usize> {
        self.slots
            .get(slot)
            .map(|handle| handle.rows)
            .ok_or_else(|| PipelineError::SlotNotFound(slot.to_string()))
    }

    /// Names of all pinned slots, sorted.
    pub fn slots(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;

    fn sample_frame(engine: &Engine, rows: i64) -> DataFrame {
        let schema = Arc::new(Schema::new(vec![
            Field::new("user_id", DataType::Utf8, true),
            Field::new("timestamp", DataType::Int64, true),
        ]));
        let users: Vec<String> = (0..rows).map(|i| format!("U{}", i)).collect();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(users)),
                Arc::new(Int64Array::from((0..rows).collect::<Vec<i64>>())),
            ],
        )
        .unwrap();
        engine.read_batches(schema, vec![batch]).unwrap()
    }

    #[tokio::test]
    async fn test_pin_then_get() {
        let engine = Engine::new(&PipelineConfig::default());
        let mut cache = CacheManager::new(&engine);

        let handle = cache.pin(sample_frame(&engine, 3), UNIFIED_SLOT).await.unwrap();
        assert_eq!(handle.rows, 3);
        assert!(cache.contains(UNIFIED_SLOT));
        assert_eq!(cache.row_count(UNIFIED_SLOT).unwrap(), 3);

        let df = cache.get(UNIFIED_SLOT).await.unwrap();
        assert_eq!(df.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_pin_replaces_prior_content() {
        let engine = Engine::new(&PipelineConfig::default());
        let mut cache = CacheManager::new(&engine);

        cache.pin(sample_frame(&engine, 3), "scratch_0").await.unwrap();
        cache.pin(sample_frame(&engine, 5), "scratch_0").await.unwrap();

        assert_eq!(cache.row_count("scratch_0").unwrap(), 5);
        assert_eq!(cache.get("scratch_0").await.unwrap().count().await.unwrap(), 5);
        assert_eq!(cache.slots(), vec!["scratch_0".to_string()]);
    }

    #[tokio::test]
    async fn test_unpinned_slot_is_gone() {
        let engine = Engine::new(&PipelineConfig::default());
        let mut cache = CacheManager::new(&engine);

        cache.pin(sample_frame(&engine, 2), DEDUPLICATED_SLOT).await.unwrap();
        cache.unpin(DEDUPLICATED_SLOT).unwrap();

        assert!(!cache.contains(DEDUPLICATED_SLOT));
        assert!(matches!(
            cache.get(DEDUPLICATED_SLOT).await,
            Err(PipelineError::SlotNotFound(name)) if name == DEDUPLICATED_SLOT
        ));
        assert!(engine.session().table(DEDUPLICATED_SLOT).await.is_err());
    }

    #[tokio::test]
    async fn test_unpin_unknown_slot() {
        let engine = Engine::new(&PipelineConfig::default());
        let mut cache = CacheManager::new(&engine);
        assert!(matches!(cache.unpin("never_pinned"), Err(PipelineError::SlotNotFound(_))));
        assert!(matches!(cache.row_count("never_pinned"), Err(PipelineError::SlotNotFound(_))));
    }

    #[tokio::test]
    async fn test_pinned_slot_survives_source_going_away() {
        let engine = Engine::new(&PipelineConfig::default());
        let mut cache = CacheManager::new(&engine);

        cache.pin(sample_frame(&engine, 4), "scratch_0").await.unwrap();
        let from_scratch = cache.get("scratch_0").await.unwrap();
        cache.pin(from_scratch, UNIFIED_SLOT).await.unwrap();
        cache.unpin("scratch_0").unwrap();

        assert_eq!(cache.get(UNIFIED_SLOT).await.unwrap().count().await.unwrap(), 4);
        assert_eq!(cache.slots(), vec![UNIFIED_SLOT.to_string()]);
    }
}
