//! Collapsing of records that collide on (user, timestamp).
//!
//! A user cannot submit two ratings at the same recorded second, so rows sharing
//! `(user_id, timestamp)` are treated as copies produced by item-identifier churn and
//! reduced to one. This is a heuristic: a genuine same-second multi-item review is
//! also collapsed.
//!
//! The surviving row is chosen deterministically: smallest `item_id`, then smallest
//! `category`, then lowest `rating`.

use datafusion::functions_window::expr_fn::row_number;
use datafusion::logical_expr::{col, lit, ExprFunctionExt};
use datafusion::prelude::DataFrame;

use crate::engine::Engine;
use crate::error::{Result, Stage};
use crate::features::require_columns;
use crate::sources::loader::{CATEGORY, ITEM_ID, RATING, TIMESTAMP, USER_ID};

/// Scratch column holding the rank within a (user, timestamp) group.
const DEDUP_RANK: &str = "__dedup_rank";

/// Keeps exactly one row per (user_id, timestamp) and materializes the result.
pub async fn dedupe(engine: &Engine, df: DataFrame) -> Result<DataFrame> {
    require_columns(&df, &[USER_ID, ITEM_ID, TIMESTAMP, CATEGORY], Stage::Deduplicate)?;

    let columns: Vec<String> = df.schema().fields().iter().map(|f| f.name().clone()).collect();
    let column_refs: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();

    let rank = row_number()
        .partition_by(vec![col(USER_ID), col(TIMESTAMP)])
        .order_by(vec![
            col(TIMESTAMP).sort(true, false),
            col(ITEM_ID).sort(true, false),
            col(CATEGORY).sort(true, false),
            col(RATING).sort(true, false),
        ])
        .build()?;

    let deduplicated = df
        .with_column(DEDUP_RANK, rank)?
        .filter(col(DEDUP_RANK).eq(lit(1u64)))?
        .select_columns(&column_refs)?;

    let table = engine.materialize(deduplicated).await?;
    Ok(table)
}
