// Test module organization for features
// Only compiled during testing via #[cfg(test)] in features/mod.rs

use crate::config::TimeZoneMode;
use crate::error::{PipelineError, Stage};
use crate::sources::loader::{CATEGORY, ITEM_ID, RATING, TIMESTAMP, USER_ID};
use crate::test_support::*;
