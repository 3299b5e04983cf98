//! Owned summary tables and their output forms.
//!
//! A [`SummaryReport`] holds no reference to the engine: once built it can be rendered,
//! exported or dropped independently of the enriched checkpoint it came from.
//!
//! # Structure
//!
//! ```text
//! SummaryReport
//! └── tables: IndexMap<String, SummaryTable>   (insertion order = report order)
//!     ├── name: String
//!     ├── group_keys: Vec<String>
//!     └── rows: Vec<Summary>
//!         ├── key: GroupKey
//!         ├── count: u64
//!         └── avg_rating: Option<f64>
//! ```
//!
//! # Export
//!
//! [`export_parquet`] writes each table to `<dir>/<name>.parquet` through the object
//! store layer, so `dir` may be a local directory or an `s3://bucket/prefix`.

use std::fmt::Write as _;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Builder, StringBuilder, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use indexmap::IndexMap;
use object_store::path::Path as ObjectPath;
use object_store::PutPayload;
use parquet::arrow::ArrowWriter;
use tracing::info;

use crate::aggregation::aggregator::{GroupValue, Summary, AVG_RATING, COUNT};
use crate::error::{Result, Stage, StageContext};
use crate::utils::file_interaction_local_and_cloud::get_object_store;

/// One computed grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    pub name: String,
    pub group_keys: Vec<String>,
    pub rows: Vec<Summary>,
}

impl SummaryTable {
    /// Sum of all group counts; equals the number of rows the grouping saw.
    pub fn total_count(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Plain-text table with one header line and one line per group. A missing mean is
    /// shown as `NULL`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ratings_explorer::aggregation::{GroupValue, Summary, SummaryTable};
    ///
    /// let table = SummaryTable {
    ///     name: "by_category".to_string(),
    ///     group_keys: vec!["category".to_string()],
    ///     rows: vec![Summary {
    ///         key: [GroupValue::Text("Books".to_string())].into_iter().collect(),
    ///         count: 2,
    ///         avg_rating: Some(4.5),
    ///     }],
    /// };
    /// let text = table.render();
    /// assert!(text.starts_with("by_category"));
    /// assert!(text.contains("Books"));
    /// assert!(text.contains("4.5000"));
    /// ```
    pub fn render(&self) -> String {
        let mut headers: Vec<String> = self.group_keys.clone();
        headers.push(COUNT.to_string());
        headers.push(AVG_RATING.to_string());

        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                let mut line: Vec<String> = row.key.iter().map(|v| v.to_string()).collect();
                line.push(row.count.to_string());
                line.push(match row.avg_rating {
                    Some(avg) => format!("{:.4}", avg),
                    None => GroupValue::Null.to_string(),
                });
                line
            })
            .collect();

        let widths: Vec<usize> = (0..headers.len())
            .map(|i| {
                cells
                    .iter()
                    .map(|line| line[i].chars().count())
                    .chain(std::iter::once(headers[i].chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        let _ = writeln!(out, "{} ({} groups)", self.name, self.rows.len());
        push_line(&mut out, &headers, &widths);
        for line in &cells {
            push_line(&mut out, line, &widths);
        }
        out
    }

    /// Arrow form of the table: one column per group key, then `count` and
    /// `avg_rating`.
    ///
    /// A key column holding any text value is exported as Utf8, otherwise as Int64.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = Vec::with_capacity(self.group_keys.len() + 2);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.group_keys.len() + 2);

        for (i, key) in self.group_keys.iter().enumerate() {
            let is_text = self
                .rows
                .iter()
                .any(|row| matches!(row.key.get(i), Some(GroupValue::Text(_))));
            if is_text {
                let mut builder = StringBuilder::new();
                for row in &self.rows {
                    match row.key.get(i) {
                        Some(GroupValue::Null) | None => builder.append_null(),
                        Some(value) => builder.append_value(value.to_string()),
                    }
                }
                fields.push(Field::new(key, DataType::Utf8, true));
                columns.push(Arc::new(builder.finish()));
            } else {
                let mut builder = Int64Builder::new();
                for row in &self.rows {
                    match row.key.get(i) {
                        Some(GroupValue::Int(v)) => builder.append_value(*v),
                        _ => builder.append_null(),
                    }
                }
                fields.push(Field::new(key, DataType::Int64, true));
                columns.push(Arc::new(builder.finish()));
            }
        }

        fields.push(Field::new(COUNT, DataType::UInt64, false));
        columns.push(Arc::new(UInt64Array::from_iter_values(self.rows.iter().map(|r| r.count))));
        fields.push(Field::new(AVG_RATING, DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from_iter(self.rows.iter().map(|r| r.avg_rating))));

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }

    /// Parquet encoding of [`Self::to_record_batch`].
    pub fn to_parquet_bytes(&self) -> Result<Bytes> {
        let batch = self.to_record_batch()?;
        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(Bytes::from(buffer))
    }
}

fn push_line(out: &mut String, cells: &[String], widths: &[usize]) {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect();
    let _ = writeln!(out, "{}", padded.join("  ").trim_end());
}

/// The summaries of one run, keyed by name in the order they were computed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryReport {
    tables: IndexMap<String, SummaryTable>,
}

impl SummaryReport {
    /// Adds `table`, replacing an earlier table of the same name in place.
    pub fn insert(&mut self, table: SummaryTable) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn get(&self, name: &str) -> Option<&SummaryTable> {
        self.tables.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tables.keys().map(|k| k.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SummaryTable> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Every table rendered with [`SummaryTable::render`], separated by blank lines.
    pub fn render(&self) -> String {
        self.iter().map(|t| t.render()).collect::<Vec<_>>().join("\n")
    }
}

/// Writes every table of `report` as `<dir>/<name>.parquet` and returns the written
/// paths in report order.
///
/// # Errors
///
/// Fails on the first table that cannot be encoded or stored, tagged with
/// [`Stage::Export`]; tables written before the failure are left in place.
pub async fn export_parquet(report: &SummaryReport, dir: &str) -> Result<Vec<String>> {
    let location = get_object_store(dir).await.stage(Stage::Export)?;
    let mut written = Vec::with_capacity(report.len());

    for table in report.iter() {
        let file_name = format!("{}.parquet", table.name);
        let object_path = if location.path.as_ref().is_empty() {
            ObjectPath::from(file_name.as_str())
        } else {
            location.path.child(file_name.as_str())
        };

        let bytes = table.to_parquet_bytes().stage(Stage::Export)?;
        let size = bytes.len();
        location
            .store
            .put(&object_path, PutPayload::from_bytes(bytes))
            .await
            .stage(Stage::Export)?;

        let full_path = location.full_path(&object_path);
        info!(summary = %table.name, path = %full_path, bytes = size, "exported summary");
        written.push(full_path);
    }

    Ok(written)
}
