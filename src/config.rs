//! Run configuration.
//!
//! Configuration is read from an optional TOML file; every field has a default so an
//! empty file (or no file) is a valid configuration. The CLI layers its flags on top.
//!
//! ```toml
//! source_dir = "/data/ratings"
//! delimiter = ","
//! time_zone = "local"
//! sequence_cutoff = 50
//! target_partitions = 8
//!
//! [naming]
//! prefix_len = 8
//! suffix_len = 4
//! extension = ".csv"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// Default positional rule: `ratings_` prefix and `.csv` suffix.
pub const DEFAULT_PREFIX_LEN: usize = 8;
pub const DEFAULT_SUFFIX_LEN: usize = 4;
pub const DEFAULT_EXTENSION: &str = ".csv";

/// Rows with a sequence number above this are left out of the sequence summaries.
pub const DEFAULT_SEQUENCE_CUTOFF: u64 = 50;

/// Zone used when rendering epoch seconds as calendar fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeZoneMode {
    /// The process's local time zone, DST-aware per instant.
    #[default]
    Local,
    Utc,
}

/// Positional filename rule used to derive category labels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceNaming {
    pub prefix_len: usize,
    pub suffix_len: usize,
    /// Only files ending in this extension are treated as rating sources.
    pub extension: String,
}

impl Default for SourceNaming {
    fn default() -> Self {
        Self {
            prefix_len: DEFAULT_PREFIX_LEN,
            suffix_len: DEFAULT_SUFFIX_LEN,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one rating file per category (local path or `s3://bucket/prefix`).
    pub source_dir: String,
    pub naming: SourceNaming,
    pub delimiter: char,
    pub time_zone: TimeZoneMode,
    pub sequence_cutoff: u64,
    /// Engine parallelism; `None` keeps the engine default (number of cores).
    pub target_partitions: Option<usize>,
    /// Engine record batch size; `None` keeps the engine default.
    pub batch_size: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: String::new(),
            naming: SourceNaming::default(),
            delimiter: ',',
            time_zone: TimeZoneMode::default(),
            sequence_cutoff: DEFAULT_SEQUENCE_CUTOFF,
            target_partitions: None,
            batch_size: None,
        }
    }
}

impl PipelineConfig {
    /// Configuration with defaults for everything but the source directory.
    pub fn for_dir(source_dir: impl Into<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(contents).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.delimiter_byte()?;
        if self.naming.suffix_len < self.naming.extension.chars().count() {
            return Err(PipelineError::Config(format!(
                "suffix_len {} is shorter than extension '{}'",
                self.naming.suffix_len, self.naming.extension
            )));
        }
        if self.target_partitions == Some(0) {
            return Err(PipelineError::Config("target_partitions must be at least 1".to_string()));
        }
        if self.batch_size == Some(0) {
            return Err(PipelineError::Config("batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// The CSV reader takes a single-byte delimiter.
    pub fn delimiter_byte(&self) -> Result<u8> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(PipelineError::Config(format!(
                "delimiter '{}' is not a single ASCII character",
                self.delimiter
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.naming.prefix_len, 8);
        assert_eq!(config.naming.suffix_len, 4);
        assert_eq!(config.sequence_cutoff, 50);
        assert_eq!(config.time_zone, TimeZoneMode::Local);
    }

    #[test]
    fn test_full_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            source_dir = "s3://bucket/ratings"
            delimiter = "\t"
            time_zone = "utc"
            sequence_cutoff = 10
            target_partitions = 2

            [naming]
            prefix_len = 4
            suffix_len = 4
            extension = ".tsv"
            "#,
        )
        .unwrap();

        assert_eq!(config.source_dir, "s3://bucket/ratings");
        assert_eq!(config.delimiter_byte().unwrap(), b'\t');
        assert_eq!(config.time_zone, TimeZoneMode::Utc);
        assert_eq!(config.sequence_cutoff, 10);
        assert_eq!(config.target_partitions, Some(2));
        assert_eq!(config.naming.extension, ".tsv");
        assert_eq!(config.batch_size, None);
    }

    #[test]
    fn test_rejects_non_ascii_delimiter() {
        let err = PipelineConfig::from_toml_str("delimiter = \"§\"").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_time_zone() {
        let err = PipelineConfig::from_toml_str("time_zone = \"mars\"").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_rejects_suffix_shorter_than_extension() {
        let err = PipelineConfig::from_toml_str(
            "[naming]\nsuffix_len = 2\nextension = \".csv\"",
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_partitions() {
        let err = PipelineConfig::from_toml_str("target_partitions = 0").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
