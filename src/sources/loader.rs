//! Loading of per-category rating files and their union.
//!
//! Every source is read with the same positional four-column layout, typed, tagged
//! with its category and materialized before it takes part in the union. The
//! materialization is a correctness barrier: chaining the constant `category` column
//! lazily under repeated unions is not a plan shape to rely on, so each per-file table
//! is evaluated on its own first.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::logical_expr::{cast, col, lit};
use datafusion::prelude::DataFrame;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::cache_manager::{scratch_slot, CacheManager, UNIFIED_SLOT};
use crate::engine::Engine;
use crate::error::{PipelineError, Result};
use crate::sources::source_enumerator::SourceDescriptor;

pub const USER_ID: &str = "user_id";
pub const ITEM_ID: &str = "item_id";
pub const RATING: &str = "rating";
pub const TIMESTAMP: &str = "timestamp";
pub const CATEGORY: &str = "category";

/// Columns that must hold a value in every loaded row.
pub const REQUIRED_COLUMNS: [&str; 4] = [USER_ID, ITEM_ID, RATING, TIMESTAMP];

/// Positional names given to the raw, untyped columns of a source file.
pub const RAW_COLUMNS: [&str; 4] = ["column_1", "column_2", "column_3", "column_4"];

/// Schema used to read a source file: four untyped (Utf8) columns, no header.
pub fn raw_schema() -> Schema {
    Schema::new(
        RAW_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    )
}

/// The one schema every loaded table must have before it can be unioned.
pub fn canonical_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(USER_ID, DataType::Utf8, true),
        Field::new(ITEM_ID, DataType::Utf8, true),
        Field::new(RATING, DataType::Float64, true),
        Field::new(TIMESTAMP, DataType::Int64, true),
        Field::new(CATEGORY, DataType::Utf8, true),
    ]))
}

/// Row counts observed while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Rows per source path, in load order.
    pub rows_per_source: IndexMap<String, usize>,
    pub unified_rows: usize,
}

/// Reads one source file into a typed, category-tagged, materialized table.
///
/// A `rating` or `timestamp` value that does not parse as a number fails the load, and
/// so does an empty field in any of [`REQUIRED_COLUMNS`].
pub async fn load_one(engine: &Engine, descriptor: &SourceDescriptor, delimiter: u8) -> Result<DataFrame> {
    let raw = engine
        .read_delimited(&descriptor.path, &raw_schema(), delimiter, &file_extension(&descriptor.path))
        .await?;

    let typed = raw.select(vec![
        col(RAW_COLUMNS[0]).alias(USER_ID),
        col(RAW_COLUMNS[1]).alias(ITEM_ID),
        cast(col(RAW_COLUMNS[2]), DataType::Float64).alias(RATING),
        cast(col(RAW_COLUMNS[3]), DataType::Int64).alias(TIMESTAMP),
        lit(descriptor.category_label.clone()).alias(CATEGORY),
    ])?;

    let table = engine.materialize(typed).await?;
    validate_schema(&table, &descriptor.path)?;
    reject_missing_values(&table, &descriptor.path).await?;
    Ok(table)
}

/// Fails with [`PipelineError::MissingValue`] for the first of [`REQUIRED_COLUMNS`]
/// that is null in some row of `df`.
///
/// The CSV reader turns empty fields into nulls and casting keeps them null, so this is
/// the only place an empty rating or timestamp is caught.
pub async fn reject_missing_values(df: &DataFrame, table: &str) -> Result<()> {
    for column in REQUIRED_COLUMNS {
        let rows = df.clone().filter(col(column).is_null())?.count().await?;
        if rows > 0 {
            return Err(PipelineError::MissingValue {
                table: table.to_string(),
                column: column.to_string(),
                rows,
            });
        }
    }
    Ok(())
}

/// Checks that `df` has exactly the canonical column names, order and types.
pub fn validate_schema(df: &DataFrame, table: &str) -> Result<()> {
    let expected = canonical_schema();
    let found = df.schema().fields();

    let matches = found.len() == expected.fields().len()
        && found
            .iter()
            .zip(expected.fields().iter())
            .all(|(f, e)| f.name() == e.name() && f.data_type() == e.data_type());

    if matches {
        Ok(())
    } else {
        Err(PipelineError::SchemaMismatch {
            table: table.to_string(),
            expected: describe_fields(expected.fields().iter().map(|f| f.as_ref())),
            found: describe_fields(found.iter().map(|f| f.as_ref())),
        })
    }
}

fn describe_fields<'a>(fields: impl Iterator<Item = &'a Field>) -> String {
    fields
        .map(|f| format!("{}: {}", f.name(), f.data_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Appends every table in order. No rows are filtered or deduplicated.
///
/// # Errors
///
/// [`PipelineError::SchemaMismatch`] naming the first diverging table, or
/// [`PipelineError::NoSources`] for an empty input.
pub fn union_all(tables: Vec<(String, DataFrame)>) -> Result<DataFrame> {
    let mut tables = tables.into_iter();
    let (first_name, first) = tables
        .next()
        .ok_or_else(|| PipelineError::NoSources("union input".to_string()))?;
    validate_schema(&first, &first_name)?;

    let mut unified = first;
    for (name, table) in tables {
        validate_schema(&table, &name)?;
        unified = unified.union(table)?;
    }
    Ok(unified)
}

/// Loads every descriptor through its own scratch slot, unions them into
/// [`UNIFIED_SLOT`] and releases the scratch slots.
pub async fn load_and_union(
    engine: &Engine,
    cache: &mut CacheManager,
    descriptors: &[SourceDescriptor],
    delimiter: u8,
) -> Result<LoadOutcome> {
    if descriptors.is_empty() {
        return Err(PipelineError::NoSources("descriptor list".to_string()));
    }

    let mut rows_per_source = IndexMap::new();
    let mut scratch_slots = Vec::with_capacity(descriptors.len());
    for (index, descriptor) in descriptors.iter().enumerate() {
        let slot = scratch_slot(index);
        let table = load_one(engine, descriptor, delimiter).await?;
        let handle = cache.pin(table, &slot).await?;
        debug!(
            path = %descriptor.path,
            category = %descriptor.category_label,
            rows = handle.rows,
            "loaded source"
        );
        rows_per_source.insert(descriptor.path.clone(), handle.rows);
        scratch_slots.push(slot);
    }

    let mut tables = Vec::with_capacity(scratch_slots.len());
    for (slot, descriptor) in scratch_slots.iter().zip(descriptors) {
        tables.push((descriptor.path.clone(), cache.get(slot).await?));
    }
    let unified = union_all(tables)?;
    let handle = cache.pin(unified, UNIFIED_SLOT).await?;

    for slot in &scratch_slots {
        cache.unpin(slot)?;
    }

    let expected_rows: usize = rows_per_source.values().sum();
    if handle.rows != expected_rows {
        warn!(expected_rows, unified_rows = handle.rows, "union row count differs from per-source total");
    }

    info!(sources = descriptors.len(), rows = handle.rows, "unified rating sources");
    Ok(LoadOutcome {
        rows_per_source,
        unified_rows: handle.rows,
    })
}

/// Extension of `path` including the dot, ignoring any `?query`.
fn file_extension(path: &str) -> String {
    let path = path.split_once('?').map(|(base, _)| base).unwrap_or(path);
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(pos) => file_name[pos..].to_string(),
        None => String::new(),
    }
}
