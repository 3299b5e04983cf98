//! Discovery of per-category rating files.
//!
//! Each category is a single file whose name encodes the category label positionally:
//! a fixed-length prefix, the label with underscores for spaces, then a fixed-length
//! suffix. With the default rule (8 and 4 characters) `ratings_Toys_And_Games.csv`
//! carries the label `Toys And Games`.

use tracing::{debug, info};

use crate::config::{SourceNaming, DEFAULT_PREFIX_LEN, DEFAULT_SUFFIX_LEN};
use crate::error::{PipelineError, Result};
use crate::utils::file_interaction_local_and_cloud::{get_object_store, is_remote};

/// One rating file and the category label derived from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Path the engine reads (local path or `s3://` URL).
    pub path: String,
    pub category_label: String,
}

/// Derives a category label with the default 8/4 positional rule.
///
/// ```
/// # use ratings_explorer::sources::source_enumerator::extract_category;
/// assert_eq!(extract_category("ratings_Toys_And_Games.csv").unwrap(), "Toys And Games");
/// assert!(extract_category("short.csv").is_err());
/// ```
pub fn extract_category(file_name: &str) -> Result<String> {
    extract_category_with(file_name, DEFAULT_PREFIX_LEN, DEFAULT_SUFFIX_LEN)
}

/// Strips `prefix_len` leading and `suffix_len` trailing characters and replaces every
/// underscore with a space.
///
/// Lengths count characters, not bytes, so multi-byte labels are never split.
///
/// # Errors
///
/// [`PipelineError::InvalidFilename`] if the name has fewer than
/// `prefix_len + suffix_len` characters.
pub fn extract_category_with(file_name: &str, prefix_len: usize, suffix_len: usize) -> Result<String> {
    let min_len = prefix_len + suffix_len;
    let char_count = file_name.chars().count();
    if char_count < min_len {
        return Err(PipelineError::InvalidFilename {
            file_name: file_name.to_string(),
            min_len,
        });
    }
    Ok(file_name
        .chars()
        .skip(prefix_len)
        .take(char_count - min_len)
        .map(|c| if c == '_' { ' ' } else { c })
        .collect())
}

/// Lists the rating files directly under `dir`, sorted by path.
///
/// Only files ending in `naming.extension` are considered; hidden files are skipped.
/// A matching file whose name is too short for the positional rule fails the whole
/// enumeration.
pub async fn enumerate_sources(dir: &str, naming: &SourceNaming) -> Result<Vec<SourceDescriptor>> {
    let file_paths = if is_remote(dir) {
        list_remote(dir).await?
    } else {
        list_local(dir).await?
    };

    let mut descriptors = Vec::new();
    for (file_name, path) in file_paths {
        if file_name.starts_with('.') || !file_name.ends_with(&naming.extension) {
            debug!(file = %file_name, "skipping non-source file");
            continue;
        }
        let category_label = extract_category_with(&file_name, naming.prefix_len, naming.suffix_len)?;
        descriptors.push(SourceDescriptor { path, category_label });
    }
    descriptors.sort_by(|a, b| a.path.cmp(&b.path));

    info!(dir, sources = descriptors.len(), "enumerated rating sources");
    Ok(descriptors)
}

async fn list_local(dir: &str) -> Result<Vec<(String, String)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        // Follows symlinks, so a linked rating file counts as a file.
        if !tokio::fs::metadata(entry.path()).await?.is_file() {
            debug!(path = %entry.path().display(), "skipping non-file entry");
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path().to_string_lossy().into_owned();
        files.push((file_name, path));
    }
    Ok(files)
}

async fn list_remote(dir: &str) -> Result<Vec<(String, String)>> {
    let location = get_object_store(dir).await?;
    let listing = location.store.list_with_delimiter(Some(&location.path)).await?;
    let files = listing
        .objects
        .iter()
        .filter_map(|meta| {
            let file_name = meta.location.filename()?.to_string();
            let mut path = location.full_path(&meta.location);
            if location.anonymous {
                // Carried through to the engine so it registers an unsigned store
                path.push_str("?anon=true");
            }
            Some((file_name, path))
        })
        .collect();
    Ok(files)
}
