//! Raw formula records as published in a repository's JSON index, and the
//! line scanner used on formula files shipped inside bottles.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Archive suffixes recognized on `url "..."` lines of a formula file.
pub const FORMULA_ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tar.xz", ".tar.bz2", ".zip"];

/// One record of the index. Fields the mirror does not use are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FormulaRecord {
    pub name: String,
    pub versions: Versions,
    #[serde(default)]
    pub revision: u32,
    pub urls: SourceUrls,
    pub bottle: Bottle,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Versions {
    pub stable: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SourceUrls {
    pub stable: StableSource,
}

/// Stable source of a formula: a tarball, or a repository with tag/revision.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StableSource {
    pub url: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Bottle {
    pub stable: BottleStable,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BottleStable {
    pub files: BTreeMap<String, BottleFile>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BottleFile {
    pub url: String,
    pub sha256: String,
}

static URL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^url\s+"([^"]+)""#).expect("url line pattern is valid"));

/// Collect the archive URLs declared on `url "..."` lines of a Ruby formula.
///
/// These are usually patches and resources that the index does not list.
pub fn formula_source_urls(formula: &str) -> Vec<String> {
    formula
        .lines()
        .filter_map(|line| URL_LINE.captures(line.trim()))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|url| {
            FORMULA_ARCHIVE_SUFFIXES
                .iter()
                .any(|suffix| url.ends_with(suffix))
        })
        .collect()
}
