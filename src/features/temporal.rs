//! Calendar decomposition of the epoch-seconds timestamp.
//!
//! The timestamp is rendered as civil time in the configured zone (by default the
//! process's local zone, not UTC) and `hour`, `day_of_week_name`, `month` and `year`
//! are read from that same civil datetime, so they always agree with
//! `timestamp_text`.
//!
//! The conversion runs batch by batch on the collected table rather than inside the
//! engine: local-zone offsets depend on the instant (DST), which `chrono::Local`
//! resolves per value.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Int32Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, Local, NaiveDateTime, Timelike, Weekday};
use datafusion::prelude::DataFrame;

use crate::config::TimeZoneMode;
use crate::engine::Engine;
use crate::error::{PipelineError, Result, Stage};
use crate::features::require_columns;
use crate::sources::loader::TIMESTAMP;

pub const TIMESTAMP_TEXT: &str = "timestamp_text";
pub const HOUR: &str = "hour";
pub const DAY_OF_WEEK_NAME: &str = "day_of_week_name";
pub const MONTH: &str = "month";
pub const YEAR: &str = "year";

/// Rendering of `timestamp_text`.
pub const TIMESTAMP_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Civil years that render as four digits.
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1000..=9999;

/// Weekday names, Monday first.
pub const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Calendar fields of one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CivilFields {
    pub timestamp_text: String,
    pub hour: i32,
    pub day_of_week_name: &'static str,
    pub month: i32,
    pub year: i32,
}

pub fn day_name(weekday: Weekday) -> &'static str {
    DAY_NAMES[weekday.num_days_from_monday() as usize]
}

/// Civil datetime of `epoch_secs` in `zone`, or `None` outside chrono's range.
pub fn civil_datetime(epoch_secs: i64, zone: TimeZoneMode) -> Option<NaiveDateTime> {
    let utc = DateTime::from_timestamp(epoch_secs, 0)?;
    Some(match zone {
        TimeZoneMode::Local => utc.with_timezone(&Local).naive_local(),
        TimeZoneMode::Utc => utc.naive_utc(),
    })
}

/// Calendar fields of `epoch_secs`, or `None` when its civil year is outside
/// [`YEAR_RANGE`].
pub fn civil_fields(epoch_secs: i64, zone: TimeZoneMode) -> Option<CivilFields> {
    let civil = civil_datetime(epoch_secs, zone)?;
    if !YEAR_RANGE.contains(&civil.year()) {
        return None;
    }
    Some(CivilFields {
        timestamp_text: civil.format(TIMESTAMP_TEXT_FORMAT).to_string(),
        hour: civil.hour() as i32,
        day_of_week_name: day_name(civil.weekday()),
        month: civil.month() as i32,
        year: civil.year(),
    })
}

/// `input` plus the five calendar columns, in the order they are appended.
pub fn output_schema(input: &Schema) -> SchemaRef {
    let mut fields: Vec<Field> = input.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new(TIMESTAMP_TEXT, DataType::Utf8, true));
    fields.push(Field::new(HOUR, DataType::Int32, true));
    fields.push(Field::new(DAY_OF_WEEK_NAME, DataType::Utf8, true));
    fields.push(Field::new(MONTH, DataType::Int32, true));
    fields.push(Field::new(YEAR, DataType::Int32, true));
    Arc::new(Schema::new_with_metadata(fields, input.metadata().clone()))
}

/// Appends the calendar columns to one batch. Null timestamps yield null fields.
pub fn append_calendar_columns(
    batch: &RecordBatch,
    timestamp_index: usize,
    schema: &SchemaRef,
    zone: TimeZoneMode,
) -> Result<RecordBatch> {
    let timestamps = batch
        .column(timestamp_index)
        .as_primitive_opt::<Int64Type>()
        .ok_or_else(|| PipelineError::MissingColumn {
            column: format!("{} (Int64)", TIMESTAMP),
            stage: Stage::Temporal,
        })?;

    let rows = batch.num_rows();
    let mut text = StringBuilder::with_capacity(rows, rows * 19);
    let mut hour = Int32Builder::with_capacity(rows);
    let mut day = StringBuilder::with_capacity(rows, rows * 8);
    let mut month = Int32Builder::with_capacity(rows);
    let mut year = Int32Builder::with_capacity(rows);

    for i in 0..rows {
        if timestamps.is_null(i) {
            text.append_null();
            hour.append_null();
            day.append_null();
            month.append_null();
            year.append_null();
            continue;
        }
        let epoch_secs = timestamps.value(i);
        let fields = civil_fields(epoch_secs, zone).ok_or(PipelineError::InvalidTimestamp(epoch_secs))?;
        text.append_value(&fields.timestamp_text);
        hour.append_value(fields.hour);
        day.append_value(fields.day_of_week_name);
        month.append_value(fields.month);
        year.append_value(fields.year);
    }

    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    columns.push(Arc::new(text.finish()));
    columns.push(Arc::new(hour.finish()));
    columns.push(Arc::new(day.finish()));
    columns.push(Arc::new(month.finish()));
    columns.push(Arc::new(year.finish()));

    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Adds `timestamp_text`, `hour`, `day_of_week_name`, `month` and `year` to every row.
///
/// The input is collected and the enriched batches are returned as an in-memory
/// table, so the result is materialized by construction.
pub async fn derive(engine: &Engine, df: DataFrame, zone: TimeZoneMode) -> Result<DataFrame> {
    require_columns(&df, &[TIMESTAMP], Stage::Temporal)?;

    let input_schema = df.schema().inner().clone();
    let timestamp_index = input_schema.index_of(TIMESTAMP)?;
    let schema = output_schema(&input_schema);

    let batches = df.collect().await?;
    let enriched = batches
        .iter()
        .map(|batch| append_calendar_columns(batch, timestamp_index, &schema, zone))
        .collect::<Result<Vec<_>>>()?;

    engine.read_batches(schema, enriched)
}
