use std::sync::Arc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use object_store::{ObjectStore, aws::AmazonS3Builder, local::LocalFileSystem, path::Path as ObjectPath};
use url::Url;
use crate::error::{PipelineError, Result};

/// Cache key for S3 stores that distinguishes between authenticated and anonymous access
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct S3CacheKey {
    bucket: String,
    anonymous: bool,
}

/// Global cache for S3 stores, keyed by (bucket, anonymous) tuple.
///
/// Rating sources are listed once per run and summary exports write several objects to
/// the same bucket, so the store (and its credential chain) is built once per bucket and
/// reused. Uses DashMap for lock-free concurrent access.
///
/// Credentials come from `AmazonS3Builder::from_env()`, which refreshes IAM role, ECS,
/// EKS and SSO credentials on its own. Static keys set through environment variables
/// never expire, so rotating them requires a restart.
static S3_STORE_CACHE: Lazy<DashMap<S3CacheKey, Arc<dyn ObjectStore>>> =
    Lazy::new(DashMap::new);

/// A location resolved against its backing store.
///
/// `root` is the prefix that turns an object path from `store` back into a path the
/// execution engine can read: `"s3://bucket/"` for S3, `"/"` for local Unix paths.
#[derive(Debug, Clone)]
pub struct StoreLocation {
    pub store: Arc<dyn ObjectStore>,
    pub path: ObjectPath,
    pub root: String,
    /// Whether the location was given with `?anon=true`.
    pub anonymous: bool,
}

impl StoreLocation {
    /// Full engine-readable path for an object listed from this store.
    pub fn full_path(&self, location: &ObjectPath) -> String {
        format!("{}{}", self.root, location)
    }
}

/// Gets or creates a cached S3 store for the given bucket.
///
/// # Arguments
///
/// * `bucket` - S3 bucket name (without "s3://" prefix)
/// * `anonymous` - If true, uses unsigned requests (for public buckets)
///
/// # Errors
///
/// Returns an error if the store cannot be built (invalid bucket name, missing
/// credentials when `anonymous` is false).
pub fn get_cached_s3_store(
    bucket: &str,
    anonymous: bool
) -> Result<Arc<dyn ObjectStore>> {
    let cache_key = S3CacheKey {
        bucket: bucket.to_string(),
        anonymous,
    };
    let entry = S3_STORE_CACHE.entry(cache_key);
    let store = entry.or_try_insert_with(|| {
        create_s3_store(bucket, anonymous)
    })?;
    Ok(Arc::clone(store.value()))
}

/// Returns true for `s3://` locations.
pub fn is_remote(file_path: &str) -> bool {
    file_path.starts_with("s3://")
}

/// Removes a trailing `?query` from a remote location and reports whether it asked
/// for anonymous access.
///
/// The execution engine reads plain object URLs, so the `anon` flag has to be consumed
/// before the path reaches it.
///
/// ```
/// # use ratings_explorer::utils::file_interaction_local_and_cloud::split_anonymous_flag;
/// assert_eq!(split_anonymous_flag("s3://b/k.csv?anon=true"), ("s3://b/k.csv".to_string(), true));
/// assert_eq!(split_anonymous_flag("s3://b/k.csv"), ("s3://b/k.csv".to_string(), false));
/// assert_eq!(split_anonymous_flag("/data/k.csv"), ("/data/k.csv".to_string(), false));
/// ```
pub fn split_anonymous_flag(file_path: &str) -> (String, bool) {
    match file_path.split_once('?') {
        Some((base, query)) if is_remote(file_path) => {
            let anonymous = query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .any(|(k, v)| k == "anon" && (v == "true" || v == "1"));
            (base.to_string(), anonymous)
        }
        _ => (file_path.to_string(), false),
    }
}

/// Resolves a path string to an `ObjectStore` and an object path inside it.
///
/// # Supported Path Formats
///
/// * **S3**: `"s3://bucket/key"` or `"s3://bucket/key?anon=true"` → AWS S3 (cached by bucket)
/// * **Local**: absolute or relative paths → local filesystem
///
/// Relative local paths are resolved against the current directory. Windows paths keep
/// their drive letter as the store root.
///
/// # Errors
///
/// Returns an error if the S3 URL is malformed or has no bucket, the store cannot be
/// built, or the current directory cannot be determined.
pub async fn get_object_store(file_path: &str) -> Result<StoreLocation> {
    if is_remote(file_path) {
        let url = Url::parse(file_path)?;
        let bucket = url.host_str()
            .ok_or_else(|| PipelineError::Config(format!("invalid S3 URL '{}': no bucket specified", file_path)))?;
        let key = url.path().trim_start_matches('/');

        let anonymous = url.query_pairs()
            .any(|(k, v)| k == "anon" && (v == "true" || v == "1"));

        let store = get_cached_s3_store(bucket, anonymous)?;
        let path = ObjectPath::from(key);

        Ok(StoreLocation {
            store,
            path,
            root: format!("s3://{}/", bucket),
            anonymous,
        })
    } else {
        use std::path::Path as StdPath;

        let std_path = StdPath::new(file_path);
        let absolute_path = if std_path.is_absolute() {
            std_path.to_path_buf()
        } else {
            std::env::current_dir()?.join(std_path)
        };

        #[cfg(windows)]
        let (root, relative) = {
            let path_str = absolute_path.to_string_lossy();
            if let Some(pos) = path_str.find(":\\") {
                let root = format!("{}:\\", &path_str[..pos]);
                let relative = path_str[pos+2..].trim_start_matches('\\').replace('\\', "/");
                (root, relative)
            } else {
                return Err(PipelineError::Config(format!("invalid Windows path '{}'", file_path)));
            }
        };

        #[cfg(not(windows))]
        let (root, relative) = {
            let path_str = absolute_path.to_string_lossy();
            let relative = path_str.trim_start_matches('/');
            ("/".to_string(), relative.to_string())
        };

        let local_store = LocalFileSystem::new_with_prefix(&root)?;
        let store: Arc<dyn ObjectStore> = Arc::new(local_store);
        let path = ObjectPath::from(relative);

        Ok(StoreLocation {
            store,
            path,
            root,
            anonymous: false,
        })
    }
}

/// Creates an S3 `ObjectStore` for a specific bucket.
///
/// Prefer [`get_cached_s3_store`]; this builds a fresh store every call.
///
/// Credentials are resolved with `from_env()`: environment variables, the AWS
/// credentials file, then instance/task/pod roles and SSO tokens.
pub fn create_s3_store(
    bucket: &str,
    anonymous: bool
) -> Result<Arc<dyn ObjectStore>> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket);

    if anonymous {
        // Skip credential loading and request signing for public buckets
        builder = builder.with_skip_signature(true);
    }

    let s3_store = builder.build()?;
    Ok(Arc::new(s3_store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_anonymous_flag_ignores_other_params() {
        let (path, anonymous) = split_anonymous_flag("s3://bucket/a.csv?region=x&anon=1");
        assert_eq!(path, "s3://bucket/a.csv");
        assert!(anonymous);

        let (path, anonymous) = split_anonymous_flag("s3://bucket/a.csv?anon=false");
        assert_eq!(path, "s3://bucket/a.csv");
        assert!(!anonymous);
    }

    #[test]
    fn test_local_question_mark_is_kept() {
        let (path, anonymous) = split_anonymous_flag("/tmp/odd?name.csv");
        assert_eq!(path, "/tmp/odd?name.csv");
        assert!(!anonymous);
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn test_local_location_round_trips_to_full_path() {
        let location = get_object_store("/var/data/ratings").await.unwrap();
        assert_eq!(location.root, "/");
        assert_eq!(location.path.as_ref(), "var/data/ratings");
        let child = ObjectPath::from("var/data/ratings/ratings_Books.csv");
        assert_eq!(location.full_path(&child), "/var/data/ratings/ratings_Books.csv");
    }

    #[tokio::test]
    async fn test_s3_location_root() {
        let location = get_object_store("s3://public-bucket/ratings?anon=true").await.unwrap();
        assert_eq!(location.root, "s3://public-bucket/");
        assert_eq!(location.path.as_ref(), "ratings");
        assert!(location.anonymous);
    }
}
