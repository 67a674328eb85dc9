//! Repositories and their parsed package catalogs.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::formula::FormulaRecord;
use crate::{BinaryPackage, Error};

/// Some index dependencies name a package that only exists as `<name>-git`.
pub const GIT_SUFFIX_FALLBACK: &str = "-git";

/// macOS bottle tags served by the `homebrew` repository.
pub const MACOS_ARCHES: &[&str] = &[
    "big_sur",
    "catalina",
    "mojave",
    "high_sierra",
    "sierra",
    "el_capitan",
    "mavericks",
    "yosemite",
];

pub const LINUX_ARCH: &str = "x86_64_linux";

/// A package index for one OS family.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    /// Also the token that bottle URLs of this repository contain.
    pub name: String,
    pub index_url: String,
    /// Formula URL with a `{}` placeholder for the package name.
    pub formula_url_template: String,
}

impl Repository {
    pub fn new(name: &str, index_url: &str, formula_url_template: &str) -> Self {
        Self {
            name: name.to_string(),
            index_url: index_url.to_string(),
            formula_url_template: formula_url_template.to_string(),
        }
    }

    pub fn linuxbrew() -> Self {
        Self::new(
            "linuxbrew",
            "https://formulae.brew.sh/api/formula-linux.json",
            "https://raw.githubusercontent.com/Homebrew/linuxbrew-core/master/Formula/{}.rb",
        )
    }

    pub fn homebrew() -> Self {
        Self::new(
            "homebrew",
            "https://formulae.brew.sh/api/formula.json",
            "https://raw.githubusercontent.com/Homebrew/homebrew-core/master/Formula/{}.rb",
        )
    }

    pub fn formula_url(&self, package: &str) -> String {
        self.formula_url_template.replace("{}", package)
    }

    /// File name of the cached index document.
    pub fn index_file_name(&self) -> String {
        format!("formula-{}.json", self.name)
    }
}

/// Mapping from bottle tag to the repository serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repositories {
    by_arch: BTreeMap<String, Repository>,
}

impl Repositories {
    pub fn empty() -> Self {
        Self {
            by_arch: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, arch: &str, repository: Repository) {
        self.by_arch.insert(arch.to_string(), repository);
    }

    pub fn for_arch(&self, arch: &str) -> Result<&Repository, Error> {
        self.by_arch
            .get(arch)
            .ok_or_else(|| Error::UnsupportedArchitecture {
                arch: arch.to_string(),
            })
    }

    pub fn arches(&self) -> impl Iterator<Item = &str> {
        self.by_arch.keys().map(String::as_str)
    }
}

impl Default for Repositories {
    fn default() -> Self {
        let mut repos = Self::empty();
        repos.insert(LINUX_ARCH, Repository::linuxbrew());
        for arch in MACOS_ARCHES {
            repos.insert(arch, Repository::homebrew());
        }
        repos
    }
}

/// A record dropped while loading a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    /// Record name, when one could be read.
    pub name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub kept: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// All packages of one repository, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    repository: String,
    packages: BTreeMap<String, BinaryPackage>,
    report: ParseReport,
}

impl Catalog {
    /// Parse every record independently. Malformed or incomplete records are
    /// skipped and listed in the report instead of failing the whole load.
    pub fn from_records(repo: &Repository, records: Vec<serde_json::Value>) -> Self {
        let mut packages = BTreeMap::new();
        let mut report = ParseReport::default();

        for value in records {
            let name = value
                .get("name")
                .and_then(|n| n.as_str())
                .map(str::to_string);

            let parsed = serde_json::from_value::<FormulaRecord>(value)
                .map_err(|e| e.to_string())
                .and_then(|record| BinaryPackage::from_record(&record, repo));

            match parsed {
                Ok(package) => {
                    report.kept += 1;
                    packages.insert(package.name.clone(), package);
                }
                Err(reason) => {
                    tracing::warn!(
                        repository = %repo.name,
                        record = name.as_deref().unwrap_or("<unnamed>"),
                        "skipping incomplete package: {}",
                        reason
                    );
                    report.skipped.push(SkippedRecord { name, reason });
                }
            }
        }

        Self {
            repository: repo.name.clone(),
            packages,
            report,
        }
    }

    /// Parse a JSON index document, which must be an array of records.
    pub fn from_json(repo: &Repository, json: &str) -> Result<Self, Error> {
        let records: Vec<serde_json::Value> =
            serde_json::from_str(json).map_err(|e| Error::IndexUnavailable {
                repository: repo.name.clone(),
                message: format!("index is not a JSON array of records: {e}"),
            })?;
        Ok(Self::from_records(repo, records))
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn report(&self) -> &ParseReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&BinaryPackage> {
        self.packages.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BinaryPackage> {
        self.packages.get_mut(name)
    }

    /// Find a dependency by name, falling back to `<name>-git`.
    pub fn lookup_dependency(&self, name: &str) -> Option<&BinaryPackage> {
        self.packages
            .get(name)
            .or_else(|| self.packages.get(&format!("{name}{GIT_SUFFIX_FALLBACK}")))
    }

    pub fn packages(&self) -> impl Iterator<Item = &BinaryPackage> {
        self.packages.values()
    }
}
