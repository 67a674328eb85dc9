//! Fetchable artifacts: bottles, source archives, patches and formula files.

/// Suffixes accepted as a direct archive link when an index source record
/// carries neither a tag nor a revision.
const DIRECT_ARCHIVE_SUFFIXES: &[&str] = &[
    ".tar.gz", ".tgz", ".tar.xz", ".txz", ".tar.bz2", ".tbz", ".tbz2", ".tar.lz", ".tar.zst",
    ".tar", ".zip", ".7z", ".gz", ".xz", ".bz2",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub url: String,
    pub file_name: String,
    pub sha256: Option<String>,
}

impl Download {
    /// Create a download whose file name is the last path segment of `url`.
    pub fn new(url: &str) -> Self {
        let url = url.trim_end_matches('/').to_string();
        let file_name = last_segment(&url).to_string();
        Self {
            url,
            file_name,
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Build a download from an index source record.
    ///
    /// Source-control records (`url` plus `tag` and/or `revision`) are
    /// rewritten to a GitHub archive link, preferring `revision` over `tag`.
    /// Returns `None` when the record cannot be turned into an archive
    /// download: a bare repository URL, or a tag/revision on a non-GitHub
    /// host.
    pub fn from_source(
        url: &str,
        tag: Option<&str>,
        revision: Option<&str>,
        sha256: Option<&str>,
    ) -> Option<Self> {
        let url = url.trim_end_matches('/');
        let tag = tag.filter(|t| !t.is_empty());
        let revision = revision.filter(|r| !r.is_empty());

        let download = match revision.or(tag) {
            None => {
                if !is_direct_archive(url) {
                    return None;
                }
                Download::new(url)
            }
            Some(commitish) => {
                if !url.starts_with("https://github.com/") {
                    return None;
                }
                let repo_url = url.strip_suffix(".git").unwrap_or(url);
                let repo_name = last_segment(repo_url);
                Download::new(&format!("{repo_url}/archive/{commitish}.tar.gz"))
                    .with_file_name(format!("{repo_name}-{commitish}.tar.gz"))
            }
        };

        Some(match sha256 {
            Some(sha) if !sha.is_empty() => download.with_sha256(sha),
            _ => download,
        })
    }
}

fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

fn is_direct_archive(url: &str) -> bool {
    let name = last_segment(url).to_ascii_lowercase();
    DIRECT_ARCHIVE_SUFFIXES
        .iter()
        .any(|suffix| name.len() > suffix.len() && name.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_defaults_to_last_segment() {
        let dl = Download::new("https://www.clamav.net/downloads/production/clamav-0.102.2.tar.gz/");
        assert_eq!(
            dl.url,
            "https://www.clamav.net/downloads/production/clamav-0.102.2.tar.gz"
        );
        assert_eq!(dl.file_name, "clamav-0.102.2.tar.gz");
        assert_eq!(dl.sha256, None);
    }

    #[test]
    fn revision_builds_github_archive_url() {
        let dl = Download::from_source("https://github.com/x/y.git", None, Some("abc123"), None)
            .unwrap();
        assert_eq!(dl.url, "https://github.com/x/y/archive/abc123.tar.gz");
        assert_eq!(dl.file_name, "y-abc123.tar.gz");
    }

    #[test]
    fn revision_is_preferred_over_tag() {
        let dl = Download::from_source(
            "https://github.com/coccinelle/coccinelle.git",
            Some("1.0.8"),
            Some("d678c34afc0cfb479ad34f2225c57b1b8d3ebeae"),
            None,
        )
        .unwrap();
        assert_eq!(
            dl.file_name,
            "coccinelle-d678c34afc0cfb479ad34f2225c57b1b8d3ebeae.tar.gz"
        );
    }

    #[test]
    fn tag_is_used_without_revision() {
        let dl =
            Download::from_source("https://github.com/x/y", Some("v1.2"), None, Some("")).unwrap();
        assert_eq!(dl.url, "https://github.com/x/y/archive/v1.2.tar.gz");
        assert_eq!(dl.sha256, None);
    }

    #[test]
    fn bare_repository_url_yields_no_download() {
        assert_eq!(
            Download::from_source("https://github.com/x/y.git", None, None, None),
            None
        );
        assert_eq!(
            Download::from_source("https://github.com/x/y", Some(""), Some(""), None),
            None
        );
    }

    #[test]
    fn direct_archive_keeps_checksum() {
        let dl = Download::from_source(
            "https://libarchive.org/downloads/libarchive-3.4.3.tar.xz",
            None,
            None,
            Some("deadbeef"),
        )
        .unwrap();
        assert_eq!(dl.file_name, "libarchive-3.4.3.tar.xz");
        assert_eq!(dl.sha256.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn non_github_source_control_is_rejected() {
        assert_eq!(
            Download::from_source("https://gitlab.com/x/y.git", Some("v1"), None, None),
            None
        );
    }
}
