//! Per-user and per-item ordinal position of each rating.
//!
//! `user_sequence_number` is the 1-based position of a row among its user's rows
//! ordered by timestamp; `item_sequence_number` is the same for the item. Both are
//! row numbers, so every key's values are exactly `1..=k`.
//!
//! Equal timestamps inside a partition are ordered by the other identifier. After
//! deduplication this only matters for items, since several users can rate the same
//! item in the same second.

use datafusion::functions_window::expr_fn::row_number;
use datafusion::logical_expr::{col, ExprFunctionExt};
use datafusion::prelude::DataFrame;

use crate::engine::Engine;
use crate::error::{Result, Stage};
use crate::features::require_columns;
use crate::sources::loader::{ITEM_ID, TIMESTAMP, USER_ID};

pub const USER_SEQUENCE_NUMBER: &str = "user_sequence_number";
pub const ITEM_SEQUENCE_NUMBER: &str = "item_sequence_number";

/// Appends both sequence numbers and materializes the result.
pub async fn derive(engine: &Engine, df: DataFrame) -> Result<DataFrame> {
    require_columns(&df, &[USER_ID, ITEM_ID, TIMESTAMP], Stage::Sequence)?;

    let user_sequence = row_number()
        .partition_by(vec![col(USER_ID)])
        .order_by(vec![
            col(TIMESTAMP).sort(true, false),
            col(ITEM_ID).sort(true, false),
        ])
        .build()?;

    let item_sequence = row_number()
        .partition_by(vec![col(ITEM_ID)])
        .order_by(vec![
            col(TIMESTAMP).sort(true, false),
            col(USER_ID).sort(true, false),
        ])
        .build()?;

    let numbered = df
        .with_column(USER_SEQUENCE_NUMBER, user_sequence)?
        .with_column(ITEM_SEQUENCE_NUMBER, item_sequence)?;

    engine.materialize(numbered).await
}
