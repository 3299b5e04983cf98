//! Summaries of the enriched dataset.
//!
//! [`aggregator`] computes grouped count / mean-rating tables; [`report`] holds the
//! results and renders or exports them.

pub mod aggregator;
pub mod report;

pub use aggregator::{
    aggregate, run_all, standard_requests, AggregateRequest, GroupKey, GroupValue, SequenceCutoff, Summary,
};
pub use report::{export_parquet, SummaryReport, SummaryTable};
