use std::{path::PathBuf, sync::Arc};

use url::Url;

use super::{Blobstore, MemoryBlobstore, SimpleFilesystemBlobstore};
use crate::Error;

/// Constructs a new instance of a [Blobstore] from an URI.
///
/// The following schemes are supported by the following stores:
/// - `memory://` ([MemoryBlobstore])
/// - `fs:///absolute/path` ([SimpleFilesystemBlobstore])
pub async fn from_addr(uri: &str) -> Result<Arc<dyn Blobstore>, Error> {
    let url =
        Url::parse(uri).map_err(|e| Error::InvalidRequest(format!("unable to parse url: {}", e)))?;

    let blobstore: Arc<dyn Blobstore> = match url.scheme() {
        "memory" => {
            // memory doesn't support host or path in the URL.
            if url.has_host() || !url.path().is_empty() {
                return Err(Error::InvalidRequest("invalid url".to_string()));
            }
            Arc::<MemoryBlobstore>::default()
        }
        "fs" => {
            // fs needs a path, but may not have a host.
            if url.has_host() {
                return Err(Error::InvalidRequest("no host allowed".to_string()));
            }
            if url.path().is_empty() || url.path() == "/" {
                return Err(Error::InvalidRequest(
                    "cowardly refusing to store blobs in /".to_string(),
                ));
            }
            Arc::new(SimpleFilesystemBlobstore::new(PathBuf::from(url.path())).await?)
        }
        scheme => {
            return Err(Error::InvalidRequest(format!(
                "unknown scheme: {}",
                scheme
            )))
        }
    };

    Ok(blobstore)
}

#[cfg(test)]
mod tests {
    use lazy_static::lazy_static;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::from_addr;

    lazy_static! {
        static ref TMPDIR_FS_1: TempDir = TempDir::new().unwrap();
        static ref TMPDIR_FS_2: TempDir = TempDir::new().unwrap();
    }

    #[rstest]
    /// This uses an unsupported scheme.
    #[case::unsupported_scheme("http://foo.example/test", false)]
    /// This correctly sets the scheme, and doesn't set a path.
    #[case::memory_valid("memory://", true)]
    /// This sets a memory url host to `foo`
    #[case::memory_invalid_host("memory://foo", false)]
    /// This sets a memory url path to "/", which is invalid.
    #[case::memory_invalid_root_path("memory:///", false)]
    /// This configures fs with a valid path.
    #[case::fs_valid_path(&format!("fs://{}", TMPDIR_FS_1.path().to_str().unwrap()), true)]
    /// This configures fs with a host and a valid path, which should fail.
    #[case::fs_invalid_host(&format!("fs://foo.example{}", TMPDIR_FS_2.path().to_str().unwrap()), false)]
    /// This configures fs with /, which should fail.
    #[case::fs_invalid_root("fs:///", false)]
    #[tokio::test]
    async fn test_from_addr_tokio(#[case] uri_str: &str, #[case] exp_succeed: bool) {
        if exp_succeed {
            from_addr(uri_str).await.expect("should succeed");
        } else {
            assert!(from_addr(uri_str).await.is_err(), "should fail");
        }
    }
}
