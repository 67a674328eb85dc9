//! Test utilities for bottle-mirror
//!
//! - `TestContext` wraps a temp directory and a mock server that plays the
//!   role of a package repository
//! - Fixture builders for bottle tarballs, index records and formula files
//!
//! # Example
//!
//! ```ignore
//! use bm_io::test_utils::TestContext;
//!
//! #[tokio::test]
//! async fn test_update() {
//!     let ctx = TestContext::new().await;
//!     let a = ctx.mount_package("a", "1.0", &["b"], &[("lib/liba.so", b"ELF")], None).await;
//!     let b = ctx.mount_package("b", "1.0", &[], &[], None).await;
//!     ctx.mount_index(&[a, b]).await;
//!     // build a Mirror over ctx.repositories() and run it
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bm_core::{InstallPlan, LINUX_ARCH, Repositories, Repository};

/// Repository name used by fixtures; bottle URLs contain it.
pub const TEST_REPOSITORY: &str = "testbrew";

// ============================================================================
// Fixtures
// ============================================================================

/// Build a gzipped bottle tarball laid out as `<name>/<version>/...`.
///
/// When `formula` is given it is stored as `<name>/<version>/.brew/<name>.rb`.
pub fn bottle_tarball(
    name: &str,
    version: &str,
    files: &[(&str, &[u8])],
    formula: Option<&str>,
) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tar::Builder;

    let mut builder = Builder::new(Vec::new());
    let brew_file = formula.map(|text| (format!(".brew/{name}.rb"), text.as_bytes()));
    let entries = files
        .iter()
        .map(|(rel, content)| (rel.to_string(), *content))
        .chain(brew_file);

    for (rel_path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header
            .set_path(format!("{name}/{version}/{rel_path}"))
            .unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append(&header, content).unwrap();
    }

    let tar_data = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_data).unwrap();
    encoder.finish().unwrap()
}

/// One JSON index record with a single `x86_64_linux` bottle.
pub fn index_record(
    name: &str,
    version: &str,
    deps: &[&str],
    bottle_url: &str,
    bottle_sha: &str,
    source_url: &str,
) -> serde_json::Value {
    json!({
        "name": name,
        "versions": {"stable": version},
        "revision": 0,
        "urls": {"stable": {"url": source_url}},
        "bottle": {"stable": {"files": {
            LINUX_ARCH: {"url": bottle_url, "sha256": bottle_sha}
        }}},
        "dependencies": deps,
    })
}

/// A formula file declaring the package source and one patch archive served
/// by the mock server at `/patches/<name>-fix.tar.gz`.
pub fn formula_with_patch(base_url: &str, name: &str) -> String {
    format!(
        r#"class Fixture < Formula
  desc "Fixture package"
  url "{base_url}/src/{name}-1.0.tar.gz"

  patch do
    url "{base_url}/patches/{name}-fix.tar.gz"
  end
end
"#
    )
}

/// Compute SHA256 hex digest of data.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

static CWD: Mutex<()> = Mutex::new(());

/// Serializes tests that change the process working directory.
pub fn cwd_lock() -> MutexGuard<'static, ()> {
    CWD.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// TestContext
// ============================================================================

/// Temp directory plus a mock server serving an index, bottles and sources.
pub struct TestContext {
    pub tmp: TempDir,
    pub mock_server: MockServer,
}

impl TestContext {
    pub async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let tmp = TempDir::new().expect("failed to create temp dir");
        Self { tmp, mock_server }
    }

    /// Root that plan directories are placed under.
    pub fn root(&self) -> PathBuf {
        self.tmp.path().join("root")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.tmp.path().join("cache")
    }

    pub fn repository(&self) -> Repository {
        let uri = self.mock_server.uri();
        Repository::new(
            TEST_REPOSITORY,
            &format!("{uri}/api/formula-linux.json"),
            &format!("{uri}/formula/{{}}.rb"),
        )
    }

    /// Only `x86_64_linux`, served by the mock repository.
    pub fn repositories(&self) -> Repositories {
        let mut repos = Repositories::empty();
        repos.insert(LINUX_ARCH, self.repository());
        repos
    }

    /// A plan for a plugin at `<root>/plugin`, with no copies or fixes.
    pub fn plan(&self) -> InstallPlan {
        let root = self.root();
        InstallPlan {
            full_version: None,
            ignore_deps: Default::default(),
            install_dir: root.join("plugin/src/plugin"),
            thirdparty_dir: root.join("plugin/thirdparty"),
            base_dir: root.join("plugin"),
            source_plugins_dir: root.join("sources"),
            deletes: Vec::new(),
            copies: Vec::new(),
            fixes: Vec::new(),
        }
    }

    /// Mount a bottle and its source archive; returns the index record.
    pub async fn mount_package(
        &self,
        name: &str,
        version: &str,
        deps: &[&str],
        files: &[(&str, &[u8])],
        formula: Option<&str>,
    ) -> serde_json::Value {
        let uri = self.mock_server.uri();
        let bottle = bottle_tarball(name, version, files, formula);
        let sha = sha256_hex(&bottle);

        let bottle_path =
            format!("/{TEST_REPOSITORY}/bottles/{name}-{version}.{LINUX_ARCH}.bottle.tar.gz");
        Mock::given(method("GET"))
            .and(path(bottle_path.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bottle))
            .mount(&self.mock_server)
            .await;

        let source_path = format!("/src/{name}-{version}.tar.gz");
        self.mount_source(&source_path).await;

        index_record(
            name,
            version,
            deps,
            &format!("{uri}{bottle_path}"),
            &sha,
            &format!("{uri}{source_path}"),
        )
    }

    /// Serve a small source archive at `path`.
    pub async fn mount_source(&self, source_path: &str) {
        Mock::given(method("GET"))
            .and(path(source_path.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"source archive".to_vec()))
            .mount(&self.mock_server)
            .await;
    }

    /// Serve `records` as the repository index.
    pub async fn mount_index(&self, records: &[serde_json::Value]) {
        Mock::given(method("GET"))
            .and(path("/api/formula-linux.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(records))
            .mount(&self.mock_server)
            .await;
    }

    /// Paths of every request the mock server has received so far.
    pub async fn requested_paths(&self) -> Vec<String> {
        self.mock_server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect()
    }

    /// Write a file under the plan root, creating parents.
    pub fn write_file(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }
}

/// True when `dir` exists and holds at least one entry.
pub fn is_non_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottle_tarball_is_gzip() {
        let tarball = bottle_tarball("testpkg", "1.0", &[("bin/testpkg", b"#!/bin/sh")], None);
        assert_eq!(tarball[0], 0x1f);
        assert_eq!(tarball[1], 0x8b);
    }

    #[test]
    fn sha256_hex_is_lowercase_hex() {
        let hash = sha256_hex(b"hello world");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn mounted_package_record_points_at_mock_server() {
        let ctx = TestContext::new().await;
        let record = ctx.mount_package("wget", "1.21", &["openssl@1.1"], &[], None).await;

        let url = record["bottle"]["stable"]["files"][LINUX_ARCH]["url"]
            .as_str()
            .unwrap();
        assert!(url.starts_with(&ctx.mock_server.uri()));
        assert!(url.contains(TEST_REPOSITORY));
        assert_eq!(record["dependencies"][0], "openssl@1.1");
    }
}
