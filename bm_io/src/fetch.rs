use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::traits::Fetcher;
use bm_core::{Download, Error};

/// Directory, inside each cache directory, holding per-file lock files.
const LOCKS_DIR: &str = ".locks";

/// Upper bound for a whole request, body included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP implementation of [`Fetcher`].
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// A fetcher whose requests fail with [`Error::NetworkFailure`] once
    /// `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bottle-mirror/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("failed to build HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dir: &Path,
        file_name: &str,
        force: bool,
    ) -> Result<PathBuf, Error> {
        let target = dir.join(file_name);
        if !force && target.is_file() {
            tracing::debug!(path = %target.display(), "reusing cached file");
            return Ok(target);
        }

        tracing::debug!(url, path = %target.display(), "fetching");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::NetworkFailure {
                message: format!("failed to fetch {url}: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(Error::NetworkFailure {
                message: format!("HTTP {} fetching {url}", response.status()),
            });
        }

        let body = response.bytes().await.map_err(|e| Error::NetworkFailure {
            message: format!("failed to read response from {url}: {e}"),
        })?;

        write_cache_file(dir, file_name, &body)
    }

    fn verify(&self, path: &Path, expected_sha256: &str) -> Result<(), Error> {
        let actual = sha256_file(path)?;
        if !actual.eq_ignore_ascii_case(expected_sha256) {
            return Err(Error::ChecksumMismatch {
                expected: expected_sha256.to_string(),
                actual,
                file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            });
        }
        Ok(())
    }
}

/// Store `data` as `dir/file_name`.
///
/// The data goes to a temporary file in `dir` that is persisted over the
/// target, under an exclusive lock so concurrent processes never interleave
/// writes to the same artifact.
pub fn write_cache_file(dir: &Path, file_name: &str, data: &[u8]) -> Result<PathBuf, Error> {
    let target = dir.join(file_name);
    let locks_dir = dir.join(LOCKS_DIR);
    fs::create_dir_all(&locks_dir).map_err(|e| Error::fs("create", &locks_dir, e))?;

    let lock_path = locks_dir.join(format!("{file_name}.lock"));
    let lock_file = File::create(&lock_path).map_err(|e| Error::fs("create", &lock_path, e))?;
    lock_file
        .lock_exclusive()
        .map_err(|e| Error::fs("lock", &lock_path, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::fs("create a temp file in", dir, e))?;
    tmp.write_all(data)
        .and_then(|_| tmp.flush())
        .map_err(|e| Error::fs("write", tmp.path(), e))?;
    tmp.persist(&target)
        .map_err(|e| Error::fs("persist", &target, e.error))?;

    // Lock is released when lock_file is dropped
    Ok(target)
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String, Error> {
    let mut file = File::open(path).map_err(|e| Error::fs("open", path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| Error::fs("read", path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fetch a download into `dir`, verifying it when its checksum is known.
pub async fn fetch_download(
    fetcher: &dyn Fetcher,
    download: &Download,
    dir: &Path,
    force: bool,
) -> Result<PathBuf, Error> {
    let path = fetcher
        .fetch(&download.url, dir, &download.file_name, force)
        .await?;
    if let Some(sha256) = &download.sha256 {
        fetcher.verify(&path, sha256)?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockFetcher;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hex(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    #[tokio::test]
    async fn fetches_into_cache_dir() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bottles/zlib.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bottle bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let fetcher = HttpFetcher::new();
        let url = format!("{}/bottles/zlib.tar.gz", server.uri());

        let first = fetcher
            .fetch(&url, tmp.path(), "zlib.tar.gz", false)
            .await
            .unwrap();
        assert_eq!(fs::read(&first).unwrap(), b"bottle bytes");

        // Second fetch is served from the cache
        let second = fetcher
            .fetch(&url, tmp.path(), "zlib.tar.gz", false)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn force_refetches_cached_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/formula-linux.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(2)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("index.json"), "stale").unwrap();
        let fetcher = HttpFetcher::new();
        let url = format!("{}/formula-linux.json", server.uri());

        for _ in 0..2 {
            let path = fetcher
                .fetch(&url, tmp.path(), "index.json", true)
                .await
                .unwrap();
            assert_eq!(fs::read_to_string(path).unwrap(), "[]");
        }
    }

    #[tokio::test]
    async fn http_error_is_network_failure_and_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let fetcher = HttpFetcher::new();
        let err = fetcher
            .fetch(&format!("{}/missing.tar.gz", server.uri()), tmp.path(), "missing.tar.gz", false)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NetworkFailure { ref message } if message.contains("404")));
        assert!(!tmp.path().join("missing.tar.gz").exists());
    }

    #[tokio::test]
    async fn stalled_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let fetcher = HttpFetcher::with_timeout(Duration::from_millis(200));
        let err = fetcher
            .fetch(&format!("{}/slow.tar.gz", server.uri()), tmp.path(), "slow.tar.gz", false)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NetworkFailure { .. }));
        assert!(!tmp.path().join("slow.tar.gz").exists());
    }

    #[test]
    fn verify_accepts_matching_digest_in_any_case() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.tar.gz");
        fs::write(&file, b"payload").unwrap();

        let fetcher = HttpFetcher::new();
        fetcher.verify(&file, &hex(b"payload")).unwrap();
        fetcher
            .verify(&file, &hex(b"payload").to_uppercase())
            .unwrap();
    }

    #[test]
    fn verify_rejects_wrong_digest() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.tar.gz");
        fs::write(&file, b"payload").unwrap();

        let err = HttpFetcher::new()
            .verify(&file, &hex(b"other"))
            .unwrap_err();
        match err {
            Error::ChecksumMismatch {
                expected,
                actual,
                file_name,
            } => {
                assert_eq!(expected, hex(b"other"));
                assert_eq!(actual, hex(b"payload"));
                assert_eq!(file_name.as_deref(), Some("a.tar.gz"));
            }
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }

    #[test]
    fn cache_write_replaces_existing_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f.rb"), "old").unwrap();

        let path = write_cache_file(tmp.path(), "f.rb", b"new").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "new");
    }

    #[tokio::test]
    async fn fetch_download_skips_verify_without_checksum() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .returning(|_, dir, name, _| Ok(dir.join(name)));
        mock.expect_verify().never();

        let download = Download::new("https://example.com/patches/fix.patch");
        let path = fetch_download(&mock, &download, Path::new("/cache/src"), false)
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("/cache/src/fix.patch"));
    }

    #[tokio::test]
    async fn fetch_download_verifies_known_checksum() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .returning(|_, dir, name, _| Ok(dir.join(name)));
        mock.expect_verify()
            .withf(|_, sha| sha == "abc")
            .times(1)
            .returning(|_, sha| {
                Err(Error::ChecksumMismatch {
                    expected: sha.to_string(),
                    actual: "def".to_string(),
                    file_name: None,
                })
            });

        let download = Download::new("https://example.com/zlib.tar.gz").with_sha256("abc");
        let err = fetch_download(&mock, &download, Path::new("/cache/bin"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }
}
