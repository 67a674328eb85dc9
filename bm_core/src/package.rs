use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::Repository;
use crate::download::Download;
use crate::formula::FormulaRecord;

/// A declared dependency: `openssl@1.1` becomes `("openssl", "1.1")`.
///
/// The version hint is informational; no constraint solving happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub version_hint: String,
}

impl Dependency {
    pub fn parse(spec: &str) -> Self {
        let (name, version_hint) = spec.split_once('@').unwrap_or((spec, ""));
        Self {
            name: name.to_string(),
            version_hint: version_hint.to_string(),
        }
    }
}

/// One installable unit of a repository: a formula and its bottles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPackage {
    pub name: String,
    pub version: String,
    /// Empty when the index revision is 0.
    pub revision: String,
    /// Bottle downloads keyed by OS/architecture tag.
    pub download_urls: BTreeMap<String, Download>,
    /// Upstream Ruby formula.
    pub formula_download: Download,
    /// Source archives and patches.
    pub source_downloads: Vec<Download>,
    pub depends: Vec<Dependency>,
}

impl BinaryPackage {
    /// Map one index record to a package of `repo`.
    ///
    /// Bottles whose URL does not mention the repository name are dropped:
    /// some indexes list bottle URLs that belong to a sibling repository.
    pub fn from_record(record: &FormulaRecord, repo: &Repository) -> Result<Self, String> {
        if record.name.trim().is_empty() {
            return Err("record has an empty name".to_string());
        }
        if record.versions.stable.trim().is_empty() {
            return Err(format!("'{}' has no stable version", record.name));
        }

        let source = &record.urls.stable;
        let source_downloads: Vec<Download> = Download::from_source(
            &source.url,
            source.tag.as_deref(),
            source.revision.as_deref(),
            source.checksum.as_deref(),
        )
        .into_iter()
        .collect();

        let download_urls = record
            .bottle
            .stable
            .files
            .iter()
            .filter(|(_, file)| file.url.contains(&repo.name))
            .map(|(arch, file)| {
                (
                    arch.clone(),
                    Download::new(&file.url).with_sha256(file.sha256.clone()),
                )
            })
            .collect();

        let revision = match record.revision {
            0 => String::new(),
            n => n.to_string(),
        };

        Ok(Self {
            name: record.name.clone(),
            version: record.versions.stable.clone(),
            revision,
            download_urls,
            formula_download: Download::new(&repo.formula_url(&record.name)),
            source_downloads,
            depends: record
                .dependencies
                .iter()
                .map(|dep| Dependency::parse(dep))
                .collect(),
        })
    }

    /// `version`, suffixed with `_revision` when the revision is non-empty.
    pub fn full_version(&self) -> String {
        if self.revision.is_empty() {
            self.version.clone()
        } else {
            format!("{}_{}", self.version, self.revision)
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}@{}", self.name, self.full_version())
    }

    /// Register source URLs found in the package's own formula file.
    ///
    /// URLs already known are skipped. Returns the number of downloads added.
    pub fn add_formula_source_downloads<I>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;
        for url in urls {
            let download = Download::new(&url);
            if self
                .source_downloads
                .iter()
                .any(|known| known.url == download.url)
            {
                continue;
            }
            self.source_downloads.push(download);
            added += 1;
        }
        added
    }
}

impl fmt::Display for BinaryPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}
