//! Grouped count / mean-rating summaries over the enriched dataset.
//!
//! Aggregation is a pure read of the frame it is given: nothing here pins, unpins or
//! registers tables, so the enriched checkpoint can be summarized any number of times.

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use arrow::record_batch::RecordBatch;
use datafusion::functions_aggregate::expr_fn::{avg, count};
use datafusion::logical_expr::{col, lit, SortExpr};
use datafusion::prelude::DataFrame;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::aggregation::report::{SummaryReport, SummaryTable};
use crate::error::{PipelineError, Result, Stage};
use crate::features::require_columns;
use crate::features::sequence::{ITEM_SEQUENCE_NUMBER, USER_SEQUENCE_NUMBER};
use crate::features::temporal::{DAY_OF_WEEK_NAME, HOUR, MONTH, YEAR};
use crate::sources::loader::{CATEGORY, RATING};

/// Output column holding the group size.
pub const COUNT: &str = "count";
/// Output column holding the mean rating of the group.
pub const AVG_RATING: &str = "avg_rating";

pub const BY_CATEGORY: &str = "by_category";
pub const BY_USER_SEQUENCE: &str = "by_user_sequence";
pub const BY_ITEM_SEQUENCE: &str = "by_item_sequence";
pub const BY_WEEKDAY_HOUR: &str = "by_weekday_hour";
pub const BY_YEAR_MONTH: &str = "by_year_month";

/// One grouping column's value for a summary row.
///
/// Ordering puts `Null` first, then integers, then text, so keys sort the way the
/// engine returns them for a single column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupValue {
    Null,
    Int(i64),
    Text(String),
}

impl std::fmt::Display for GroupValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupValue::Null => f.write_str("NULL"),
            GroupValue::Int(v) => write!(f, "{}", v),
            GroupValue::Text(s) => f.write_str(s),
        }
    }
}

/// Group-key tuple; most summaries group by one or two columns.
pub type GroupKey = SmallVec<[GroupValue; 2]>;

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub key: GroupKey,
    pub count: u64,
    /// `None` when every rating in the group is null.
    pub avg_rating: Option<f64>,
}

/// Keeps only rows whose `column` is at most `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceCutoff {
    pub column: String,
    pub max: u64,
}

/// A named grouping to compute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRequest {
    pub name: String,
    pub group_keys: Vec<String>,
    pub filter: Option<SequenceCutoff>,
}

impl AggregateRequest {
    pub fn new(name: &str, group_keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            group_keys: group_keys.iter().map(|k| k.to_string()).collect(),
            filter: None,
        }
    }

    pub fn with_cutoff(mut self, column: &str, max: u64) -> Self {
        self.filter = Some(SequenceCutoff {
            column: column.to_string(),
            max,
        });
        self
    }
}

/// The five exploratory summaries, in report order.
pub fn standard_requests(cutoff: u64) -> Vec<AggregateRequest> {
    vec![
        AggregateRequest::new(BY_CATEGORY, &[CATEGORY]),
        AggregateRequest::new(BY_USER_SEQUENCE, &[USER_SEQUENCE_NUMBER])
            .with_cutoff(USER_SEQUENCE_NUMBER, cutoff),
        AggregateRequest::new(BY_ITEM_SEQUENCE, &[ITEM_SEQUENCE_NUMBER])
            .with_cutoff(ITEM_SEQUENCE_NUMBER, cutoff),
        AggregateRequest::new(BY_WEEKDAY_HOUR, &[DAY_OF_WEEK_NAME, HOUR]),
        AggregateRequest::new(BY_YEAR_MONTH, &[YEAR, MONTH]),
    ]
}

/// Filters, groups and summarizes `df`.
///
/// Rows come back ordered by the group keys ascending, except when `category` is the
/// only key: the category report is ordered by `avg_rating` descending with ties broken
/// by category name. An empty (or fully filtered) input yields an empty vector.
pub async fn aggregate(
    df: &DataFrame,
    group_keys: &[String],
    filter: Option<&SequenceCutoff>,
) -> Result<Vec<Summary>> {
    let keys: Vec<&str> = group_keys.iter().map(|k| k.as_str()).collect();
    require_columns(df, &keys, Stage::Aggregate)?;
    require_columns(df, &[RATING], Stage::Aggregate)?;

    let mut input = df.clone();
    if let Some(cutoff) = filter {
        require_columns(df, &[cutoff.column.as_str()], Stage::Aggregate)?;
        debug!(column = %cutoff.column, max = cutoff.max, "applying cutoff");
        input = input.filter(col(cutoff.column.as_str()).lt_eq(lit(cutoff.max)))?;
    }

    let grouped = input.aggregate(
        keys.iter().map(|k| col(*k)).collect(),
        vec![count(lit(1)).alias(COUNT), avg(col(RATING)).alias(AVG_RATING)],
    )?;

    let sorted = grouped.sort(sort_order(&keys))?;
    let batches = sorted.collect().await?;

    let mut summaries = Vec::new();
    for batch in &batches {
        read_summaries(batch, &keys, &mut summaries)?;
    }
    Ok(summaries)
}

fn sort_order(keys: &[&str]) -> Vec<SortExpr> {
    if keys == [CATEGORY] {
        vec![
            col(AVG_RATING).sort(false, false),
            col(CATEGORY).sort(true, true),
        ]
    } else {
        keys.iter().map(|k| col(*k).sort(true, true)).collect()
    }
}

/// Converts one result batch to summaries. Groups with no rows (the global group of an
/// empty input) are dropped; every other group is kept, even without a mean.
fn read_summaries(batch: &RecordBatch, keys: &[&str], out: &mut Vec<Summary>) -> Result<()> {
    let key_columns = keys
        .iter()
        .map(|k| key_values(batch, k))
        .collect::<Result<Vec<_>>>()?;

    let counts = cast(column(batch, COUNT)?, &DataType::Int64)?;
    let counts = counts.as_primitive::<Int64Type>();
    let means = cast(column(batch, AVG_RATING)?, &DataType::Float64)?;
    let means = means.as_primitive::<Float64Type>();

    for row in 0..batch.num_rows() {
        let count = if counts.is_null(row) { 0 } else { counts.value(row) };
        if count <= 0 {
            continue;
        }
        out.push(Summary {
            key: key_columns.iter().map(|values| values[row].clone()).collect(),
            count: count as u64,
            avg_rating: (!means.is_null(row)).then(|| means.value(row)),
        });
    }
    Ok(())
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    let index = batch
        .schema()
        .index_of(name)
        .map_err(|_| PipelineError::MissingColumn {
            column: name.to_string(),
            stage: Stage::Aggregate,
        })?;
    Ok(batch.column(index))
}

/// Integer-typed keys become `Int`; everything else is rendered as text.
fn key_values(batch: &RecordBatch, name: &str) -> Result<Vec<GroupValue>> {
    let array = column(batch, name)?;
    if array.data_type().is_integer() {
        let ints = cast(array, &DataType::Int64)?;
        let ints = ints.as_primitive::<Int64Type>();
        Ok(ints
            .iter()
            .map(|v| v.map(GroupValue::Int).unwrap_or(GroupValue::Null))
            .collect())
    } else {
        let text = cast(array, &DataType::Utf8)?;
        let text = text.as_string::<i32>();
        Ok(text
            .iter()
            .map(|v| v.map(|s| GroupValue::Text(s.to_string())).unwrap_or(GroupValue::Null))
            .collect())
    }
}

/// Computes every request against `df`, in order.
pub async fn run_all(df: &DataFrame, requests: &[AggregateRequest]) -> Result<SummaryReport> {
    let mut report = SummaryReport::default();
    for request in requests {
        let rows = aggregate(df, &request.group_keys, request.filter.as_ref()).await?;
        info!(summary = %request.name, groups = rows.len(), "computed summary");
        report.insert(SummaryTable {
            name: request.name.clone(),
            group_keys: request.group_keys.clone(),
            rows,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::features::sequence;
    use crate::sources::loader::{ITEM_ID, TIMESTAMP, USER_ID};
    use crate::test_support::{canonical_frame, test_engine};

    fn text(s: &str) -> GroupValue {
        GroupValue::Text(s.to_string())
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    async fn numbered(engine: &Engine) -> DataFrame {
        let df = canonical_frame(
            engine,
            &[
                ("U1", "I1", 5.0, 10, "Books"),
                ("U1", "I2", 3.0, 20, "Toys"),
                ("U1", "I3", 1.0, 30, "Toys"),
                ("U2", "I1", 4.0, 15, "Books"),
            ],
        );
        sequence::derive(engine, df).await.unwrap()
    }

    #[tokio::test]
    async fn test_category_sorted_by_mean_descending() {
        let engine = test_engine();
        let df = numbered(&engine).await;

        let rows = aggregate(&df, &keys(&[CATEGORY]), None).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key.as_slice(), &[text("Books")]);
        assert_eq!(rows[0].count, 2);
        assert!((rows[0].avg_rating.unwrap() - 4.5).abs() < 1e-9);
        assert_eq!(rows[1].key.as_slice(), &[text("Toys")]);
        assert_eq!(rows[1].count, 2);
        assert!((rows[1].avg_rating.unwrap() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cutoff_filters_before_grouping() {
        let engine = test_engine();
        let df = numbered(&engine).await;

        let cutoff = SequenceCutoff {
            column: USER_SEQUENCE_NUMBER.to_string(),
            max: 2,
        };
        let rows = aggregate(&df, &keys(&[USER_SEQUENCE_NUMBER]), Some(&cutoff))
            .await
            .unwrap();

        let keys: Vec<GroupKey> = rows.iter().map(|r| r.key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                GroupKey::from_vec(vec![GroupValue::Int(1)]),
                GroupKey::from_vec(vec![GroupValue::Int(2)]),
            ]
        );
        assert_eq!(rows[0].count, 2);
        assert!((rows[0].avg_rating.unwrap() - 4.5).abs() < 1e-9);
        assert_eq!(rows[1].count, 1);
        assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), 3);
    }

    #[tokio::test]
    async fn test_multi_key_sorted_ascending() {
        let engine = test_engine();
        let df = numbered(&engine).await;

        let rows = aggregate(&df, &keys(&[CATEGORY, USER_ID]), None).await.unwrap();
        let rendered: Vec<String> = rows
            .iter()
            .map(|r| format!("{}/{}", r.key[0], r.key[1]))
            .collect();

        assert_eq!(rendered, vec!["Books/U1", "Books/U2", "Toys/U1"]);
    }

    #[tokio::test]
    async fn test_fully_filtered_input_is_empty() {
        let engine = test_engine();
        let df = numbered(&engine).await;

        let cutoff = SequenceCutoff {
            column: ITEM_SEQUENCE_NUMBER.to_string(),
            max: 0,
        };
        let rows = aggregate(&df, &keys(&[ITEM_ID]), Some(&cutoff)).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let engine = test_engine();
        let df = numbered(&engine).await;

        let err = aggregate(&df, &keys(&["nope"]), None).await.unwrap_err();
        match err {
            PipelineError::MissingColumn { column, stage } => {
                assert_eq!(column, "nope");
                assert_eq!(stage, Stage::Aggregate);
            }
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_aggregation_is_repeatable() {
        let engine = test_engine();
        let df = numbered(&engine).await;

        let first = aggregate(&df, &keys(&[TIMESTAMP]), None).await.unwrap();
        let second = aggregate(&df, &keys(&[TIMESTAMP]), None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[tokio::test]
    async fn test_group_without_ratings_is_kept() {
        use std::sync::Arc;
        use arrow::array::{Float64Array, StringArray};
        use arrow::datatypes::{Field, Schema};

        let engine = test_engine();
        let schema = Arc::new(Schema::new(vec![
            Field::new(CATEGORY, DataType::Utf8, true),
            Field::new(RATING, DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["Books", "Music", "Music"])),
                Arc::new(Float64Array::from(vec![Some(5.0), None, None])),
            ],
        )
        .unwrap();
        let df = engine.read_batches(schema, vec![batch]).unwrap();

        let rows = aggregate(&df, &keys(&[CATEGORY]), None).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key.as_slice(), &[text("Books")]);
        assert_eq!(rows[0].avg_rating, Some(5.0));
        assert_eq!(rows[1].key.as_slice(), &[text("Music")]);
        assert_eq!(rows[1].count, 2);
        assert_eq!(rows[1].avg_rating, None);
        assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), 3);
    }

    #[test]
    fn test_standard_requests_layout() {
        let requests = standard_requests(50);
        let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![BY_CATEGORY, BY_USER_SEQUENCE, BY_ITEM_SEQUENCE, BY_WEEKDAY_HOUR, BY_YEAR_MONTH]
        );
        assert_eq!(requests[1].filter.as_ref().map(|f| f.max), Some(50));
        assert_eq!(requests[2].filter.as_ref().map(|f| f.column.as_str()), Some(ITEM_SEQUENCE_NUMBER));
        assert!(requests[3].filter.is_none());
        assert_eq!(requests[4].group_keys, vec![YEAR.to_string(), MONTH.to_string()]);
    }
}
