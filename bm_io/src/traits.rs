//! Capability traits consumed by the mirroring pipeline.
//!
//! Network fetches, archive extraction and native binary rewriting sit behind
//! these traits so tests can inject mock implementations that simulate
//! failures or record what would have been run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use bm_core::{ElfFix, Error};

/// Fetches remote files into a local cache directory.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` into `dir/file_name` and return the local path.
    ///
    /// An existing file is reused unless `force` is set.
    async fn fetch(
        &self,
        url: &str,
        dir: &Path,
        file_name: &str,
        force: bool,
    ) -> Result<PathBuf, Error>;

    /// Check the SHA-256 digest of a fetched file.
    fn verify(&self, path: &Path, expected_sha256: &str) -> Result<(), Error>;
}

/// Unpacks archives.
#[cfg_attr(test, automock)]
pub trait Extractor: Send + Sync {
    /// Extract `archive` into a fresh directory and return that directory.
    fn extract(&self, archive: &Path) -> Result<PathBuf, Error>;
}

/// Runs the native relocation rewriters.
///
/// File paths are relative to the current working directory, which the
/// caller sets to the install directory.
#[cfg_attr(test, automock)]
pub trait BinaryPatcher: Send + Sync {
    fn patch_elf(&self, fix: &ElfFix) -> Result<(), Error>;

    /// Rewrite placeholder-prefixed load commands of a Mach-O file.
    fn patch_macho(&self, file: &Path) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_fetcher_reports_network_failure() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch().returning(|url, _, _, _| {
            Err(Error::NetworkFailure {
                message: format!("connection reset fetching {url}"),
            })
        });

        let result = mock
            .fetch("https://example.com/a.tar.gz", Path::new("/tmp"), "a.tar.gz", false)
            .await;
        match result {
            Err(Error::NetworkFailure { message }) => assert!(message.contains("a.tar.gz")),
            other => panic!("expected NetworkFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mock_fetcher_receives_target_location() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .withf(|url, dir, file_name, force| {
                url.ends_with("/zlib.rb") && dir.ends_with("src") && file_name == "zlib.rb" && !force
            })
            .times(1)
            .returning(|_, dir, file_name, _| Ok(dir.join(file_name)));

        let path = mock
            .fetch("https://example.com/zlib.rb", Path::new("/cache/src"), "zlib.rb", false)
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("/cache/src/zlib.rb"));
    }

    #[test]
    fn mock_patcher_is_usable_as_trait_object() {
        let mut mock = MockBinaryPatcher::new();
        mock.expect_patch_macho()
            .withf(|file| file == Path::new("lib/libmagic.dylib"))
            .times(1)
            .returning(|_| Ok(()));

        let patcher: Box<dyn BinaryPatcher> = Box::new(mock);
        patcher.patch_macho(Path::new("lib/libmagic.dylib")).unwrap();
    }

    #[test]
    fn capability_mocks_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MockFetcher>();
        assert_send_sync::<MockExtractor>();
        assert_send_sync::<MockBinaryPatcher>();
    }
}
