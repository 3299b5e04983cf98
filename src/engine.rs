//! Handle on the external execution engine.
//!
//! All components receive an [`Engine`] instead of constructing their own DataFusion
//! session, so every table registration and every cached checkpoint lives in one
//! catalog that the [`crate::cache_manager::CacheManager`] can account for.

use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::{CsvReadOptions, DataFrame, SessionConfig, SessionContext};
use tracing::debug;
use url::Url;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::utils::file_interaction_local_and_cloud::{get_cached_s3_store, is_remote, split_anonymous_flag};

#[derive(Clone)]
pub struct Engine {
    ctx: SessionContext,
}

impl Engine {
    /// Builds a session using the engine knobs from `config`.
    pub fn new(config: &PipelineConfig) -> Self {
        let mut session_config = SessionConfig::new();
        if let Some(partitions) = config.target_partitions {
            session_config = session_config.with_target_partitions(partitions);
        }
        if let Some(batch_size) = config.batch_size {
            session_config = session_config.with_batch_size(batch_size);
        }
        Self {
            ctx: SessionContext::new_with_config(session_config),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.ctx
    }

    /// Lazily reads a headerless delimited file with the given all-column schema.
    ///
    /// Remote paths get their bucket's object store registered on the session first.
    /// `extension` must match the file's suffix because the engine filters listed
    /// files by it.
    pub async fn read_delimited(
        &self,
        path: &str,
        schema: &Schema,
        delimiter: u8,
        extension: &str,
    ) -> Result<DataFrame> {
        let path = self.register_store_for(path)?;
        let options = CsvReadOptions::new()
            .has_header(false)
            .delimiter(delimiter)
            .schema(schema)
            .file_extension(extension);
        debug!(path = %path, "reading delimited source");
        Ok(self.ctx.read_csv(path, options).await?)
    }

    /// Forces evaluation of `df` and returns a frame over the materialized result.
    ///
    /// Used as a barrier between stages: anything downstream reads the in-memory
    /// batches, never the expression graph that produced them.
    pub async fn materialize(&self, df: DataFrame) -> Result<DataFrame> {
        Ok(df.cache().await?)
    }

    /// Wraps already-computed batches as a frame.
    pub fn read_batches(&self, schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<DataFrame> {
        let table = MemTable::try_new(schema, vec![batches])?;
        Ok(self.ctx.read_table(Arc::new(table))?)
    }

    fn register_store_for(&self, path: &str) -> Result<String> {
        if !is_remote(path) {
            return Ok(path.to_string());
        }
        let (plain, anonymous) = split_anonymous_flag(path);
        let url = Url::parse(&plain)?;
        if let Some(bucket) = url.host_str() {
            let store = get_cached_s3_store(bucket, anonymous)?;
            let base = Url::parse(&format!("s3://{}", bucket))?;
            self.ctx.register_object_store(&base, store);
        }
        Ok(plain)
    }
}
