//! Fixtures shared by the unit tests: CSV source directories on disk and helpers for
//! reading columns back out of collected frames.

use std::path::Path;

use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use arrow::record_batch::RecordBatch;
use datafusion::prelude::DataFrame;
use tempfile::TempDir;

use crate::config::{PipelineConfig, TimeZoneMode};
use crate::engine::Engine;

/// One raw source row: user, item, rating, timestamp.
pub type RawRow<'a> = (&'a str, &'a str, &'a str, &'a str);

/// Creates an empty source directory.
pub fn source_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("ratings")
        .tempdir()
        .expect("create temp dir")
}

/// Writes `rows` as a headerless CSV file named `file_name` inside `dir`.
pub fn write_source(dir: &Path, file_name: &str, rows: &[RawRow]) -> String {
    let mut contents = String::new();
    for (user, item, rating, timestamp) in rows {
        contents.push_str(&format!("{},{},{},{}\n", user, item, rating, timestamp));
    }
    let path = dir.join(file_name);
    std::fs::write(&path, contents).expect("write source file");
    path.to_string_lossy().into_owned()
}

/// Writes each `(user, item, rating, timestamp)` tuple of owned values as CSV.
pub fn write_owned_source(dir: &Path, file_name: &str, rows: &[(String, String, f64, i64)]) -> String {
    let mut contents = String::new();
    for (user, item, rating, timestamp) in rows {
        contents.push_str(&format!("{},{},{},{}\n", user, item, rating, timestamp));
    }
    let path = dir.join(file_name);
    std::fs::write(&path, contents).expect("write source file");
    path.to_string_lossy().into_owned()
}

/// The two-file scenario: one Books row and two Toys And Games rows, two of which
/// share (U1, 1000).
pub fn scenario_dir() -> TempDir {
    let dir = source_dir();
    write_source(dir.path(), "ratings_Books.csv", &[("U1", "I1", "5", "1000")]);
    write_source(
        dir.path(),
        "ratings_Toys_And_Games.csv",
        &[("U1", "I2", "3", "1000"), ("U2", "I2", "4", "2000")],
    );
    dir
}

pub fn utc_config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        time_zone: TimeZoneMode::Utc,
        target_partitions: Some(2),
        ..PipelineConfig::for_dir(dir.path().to_string_lossy().into_owned())
    }
}

pub fn test_engine() -> Engine {
    Engine::new(&PipelineConfig {
        target_partitions: Some(2),
        ..PipelineConfig::default()
    })
}

pub async fn collect(df: DataFrame) -> Vec<RecordBatch> {
    df.collect().await.expect("collect frame")
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> &'a arrow::array::ArrayRef {
    let index = batch.schema().index_of(name).expect("column present");
    batch.column(index)
}

/// All values of a string column across batches; nulls become empty strings.
pub fn strings(batches: &[RecordBatch], name: &str) -> Vec<String> {
    let mut out = Vec::new();
    for batch in batches {
        let array = cast(column(batch, name), &DataType::Utf8).expect("cast to utf8");
        let array = array.as_string::<i32>();
        for i in 0..array.len() {
            out.push(if array.is_null(i) { String::new() } else { array.value(i).to_string() });
        }
    }
    out
}

/// All values of an integer column across batches, widened to i64.
pub fn ints(batches: &[RecordBatch], name: &str) -> Vec<i64> {
    let mut out = Vec::new();
    for batch in batches {
        let array = cast(column(batch, name), &DataType::Int64).expect("cast to int64");
        let array = array.as_primitive::<Int64Type>();
        out.extend(array.iter().map(|v| v.expect("non-null integer")));
    }
    out
}

pub fn floats(batches: &[RecordBatch], name: &str) -> Vec<f64> {
    let mut out = Vec::new();
    for batch in batches {
        let array = cast(column(batch, name), &DataType::Float64).expect("cast to float64");
        let array = array.as_primitive::<Float64Type>();
        out.extend(array.iter().map(|v| v.expect("non-null float")));
    }
    out
}

pub fn row_count(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

/// One typed, category-tagged row: user, item, rating, timestamp, category.
pub type TaggedRow<'a> = (&'a str, &'a str, f64, i64, &'a str);

/// Builds a table with the canonical load schema directly from typed rows.
pub fn canonical_frame(engine: &Engine, rows: &[TaggedRow]) -> DataFrame {
    use std::sync::Arc;
    use arrow::array::{Float64Array, Int64Array, StringArray};

    let schema = crate::sources::loader::canonical_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
            Arc::new(StringArray::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(rows.iter().map(|r| r.2).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(rows.iter().map(|r| r.3).collect::<Vec<_>>())),
            Arc::new(StringArray::from(rows.iter().map(|r| r.4).collect::<Vec<_>>())),
        ],
    )
    .expect("canonical batch");
    engine.read_batches(schema, vec![batch]).expect("canonical frame")
}
