// Test module organization for sources
// Only compiled during testing via #[cfg(test)] in sources/mod.rs

use crate::sources::loader::*;
use crate::sources::source_enumerator::*;
use crate::test_support::*;
