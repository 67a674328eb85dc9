//! Install plans: which files of a bottle land where, what to delete first,
//! and which relocation fixes to apply afterwards.
//!
//! Plans are configured per `(package, arch)` in a TOML preset file and
//! validated when the file is loaded.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use crate::relocate::Fix;
use crate::{Error, Repositories, Repository};

/// A path inside an extracted bottle or the install directory.
///
/// In preset files a trailing `/` marks a directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum CopyTarget {
    File(PathBuf),
    Directory(PathBuf),
}

impl CopyTarget {
    pub fn parse(spec: &str) -> Self {
        if spec.ends_with('/') || spec.ends_with(std::path::MAIN_SEPARATOR) {
            CopyTarget::Directory(PathBuf::from(spec.trim_end_matches(['/', '\\'])))
        } else {
            CopyTarget::File(PathBuf::from(spec))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            CopyTarget::File(p) | CopyTarget::Directory(p) => p,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, CopyTarget::Directory(_))
    }

    /// Render back to the preset notation.
    pub fn spec(&self) -> String {
        match self {
            CopyTarget::File(p) => p.to_string_lossy().into_owned(),
            CopyTarget::Directory(p) => format!("{}/", p.to_string_lossy()),
        }
    }
}

/// What must exist in the install directory after a copy ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    File(PathBuf),
    NonEmptyDirectory(PathBuf),
}

impl Expectation {
    pub fn path(&self) -> &Path {
        match self {
            Expectation::File(p) | Expectation::NonEmptyDirectory(p) => p,
        }
    }
}

/// Copy `src` (relative to the extraction directory) to `dst` (relative to
/// the install directory).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CopyOp {
    pub src: CopyTarget,
    pub dst: CopyTarget,
}

impl CopyOp {
    pub fn parse(src: &str, dst: &str) -> Self {
        Self {
            src: CopyTarget::parse(src),
            dst: CopyTarget::parse(dst),
        }
    }

    /// The artifact this copy must produce under `install_dir`.
    pub fn expectation(&self, install_dir: &Path) -> Result<Expectation, Error> {
        let dst = install_dir.join(self.dst.path());
        match (&self.src, &self.dst) {
            (CopyTarget::File(src), CopyTarget::Directory(_)) => {
                let file_name = src.file_name().ok_or_else(|| Error::InvalidPreset {
                    message: format!("copy source '{}' has no file name", src.display()),
                })?;
                Ok(Expectation::File(dst.join(file_name)))
            }
            (CopyTarget::Directory(_), CopyTarget::Directory(_)) => {
                Ok(Expectation::NonEmptyDirectory(dst))
            }
            (CopyTarget::File(_), CopyTarget::File(_)) => Ok(Expectation::File(dst)),
            (CopyTarget::Directory(_), CopyTarget::File(_)) => Err(Error::IllegalCopySpec {
                src: self.src.spec(),
                dst: self.dst.spec(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    /// Pinned `version[_revision]` of the root package.
    pub full_version: Option<String>,
    pub ignore_deps: BTreeSet<String>,
    pub install_dir: PathBuf,
    /// Receives formulas, sources and their provenance records.
    pub thirdparty_dir: PathBuf,
    /// Plugin tree snapshotted after a successful run.
    pub base_dir: PathBuf,
    pub source_plugins_dir: PathBuf,
    /// Paths under `install_dir` removed before installing.
    pub deletes: Vec<PathBuf>,
    pub copies: Vec<CopyOp>,
    /// Applied in order with the install directory as working directory.
    pub fixes: Vec<Fix>,
}

impl InstallPlan {
    /// Resolve relative directories against `root`.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        for dir in [
            &mut self.install_dir,
            &mut self.thirdparty_dir,
            &mut self.base_dir,
            &mut self.source_plugins_dir,
        ] {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        }
        self
    }

    /// Where the source snapshot of `base_dir` is archived.
    pub fn saved_sources_dir(&self) -> PathBuf {
        match self.base_dir.file_name() {
            Some(name) => self.source_plugins_dir.join(name),
            None => self.source_plugins_dir.clone(),
        }
    }

    /// Check the plan for configuration bugs that would only surface later.
    pub fn validate(&self) -> Result<(), Error> {
        for op in &self.copies {
            for path in [op.src.path(), op.dst.path()] {
                if !is_contained(path) {
                    return Err(Error::InvalidPreset {
                        message: format!(
                            "copy path '{}' must be relative and stay inside its directory",
                            path.display()
                        ),
                    });
                }
            }
            op.expectation(&self.install_dir)?;
        }
        for path in &self.deletes {
            if !is_contained(path) {
                return Err(Error::InvalidPreset {
                    message: format!(
                        "delete path '{}' must be relative to the install directory",
                        path.display()
                    ),
                });
            }
        }
        Ok(())
    }
}

fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Key of a preset: package name and bottle tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PresetKey {
    pub package: String,
    pub arch: String,
}

impl PresetKey {
    pub fn new(package: &str, arch: &str) -> Self {
        Self {
            package: package.to_string(),
            arch: arch.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPreset {
    package: String,
    arch: String,
    #[serde(default)]
    full_version: Option<String>,
    #[serde(default)]
    ignore_deps: Vec<String>,
    install_dir: PathBuf,
    thirdparty_dir: PathBuf,
    base_dir: PathBuf,
    source_plugins_dir: PathBuf,
    #[serde(default)]
    deletes: Vec<PathBuf>,
    /// Copies run in file order.
    #[serde(default)]
    copies: toml::Table,
    #[serde(default)]
    fixes: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPresetFile {
    #[serde(default)]
    repositories: BTreeMap<String, Repository>,
    #[serde(default)]
    preset: Vec<RawPreset>,
}

impl TryFrom<RawPreset> for (PresetKey, InstallPlan) {
    type Error = Error;

    fn try_from(raw: RawPreset) -> Result<Self, Error> {
        let fixes = raw
            .fixes
            .iter()
            .map(|parts| Fix::parse(parts))
            .collect::<Result<Vec<_>, _>>()?;

        let copies = raw
            .copies
            .iter()
            .map(|(src, dst)| match dst.as_str() {
                Some(dst) => Ok(CopyOp::parse(src, dst)),
                None => Err(in_preset(
                    &raw.package,
                    &raw.arch,
                    Error::InvalidPreset {
                        message: format!("copy destination for '{src}' must be a string"),
                    },
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let plan = InstallPlan {
            full_version: raw.full_version.filter(|v| !v.is_empty()),
            ignore_deps: raw.ignore_deps.into_iter().collect(),
            install_dir: raw.install_dir,
            thirdparty_dir: raw.thirdparty_dir,
            base_dir: raw.base_dir,
            source_plugins_dir: raw.source_plugins_dir,
            deletes: raw.deletes,
            copies,
            fixes,
        };
        plan.validate()
            .map_err(|e| in_preset(&raw.package, &raw.arch, e))?;

        Ok((PresetKey::new(&raw.package, &raw.arch), plan))
    }
}

fn in_preset(package: &str, arch: &str, err: Error) -> Error {
    Error::InvalidPreset {
        message: format!("{package} on {arch}: {err}"),
    }
}

/// Install plans keyed by `(package, arch)`, plus repository overrides.
#[derive(Debug, Clone, Default)]
pub struct PresetTable {
    plans: BTreeMap<PresetKey, InstallPlan>,
    order: Vec<PresetKey>,
    repositories: BTreeMap<String, Repository>,
}

impl PresetTable {
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let raw: RawPresetFile = toml::from_str(text).map_err(|e| Error::InvalidPreset {
            message: e.to_string(),
        })?;

        let mut table = PresetTable {
            repositories: raw.repositories,
            ..Default::default()
        };
        for preset in raw.preset {
            let (key, plan) = <(PresetKey, InstallPlan)>::try_from(preset)?;
            if table.plans.insert(key.clone(), plan).is_some() {
                return Err(Error::InvalidPreset {
                    message: format!("duplicate preset for {} on {}", key.package, key.arch),
                });
            }
            table.order.push(key);
        }
        Ok(table)
    }

    pub fn get(&self, package: &str, arch: &str) -> Result<&InstallPlan, Error> {
        self.plans
            .get(&PresetKey::new(package, arch))
            .ok_or_else(|| Error::MissingPreset {
                package: package.to_string(),
                arch: arch.to_string(),
            })
    }

    /// Presets in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&PresetKey, &InstallPlan)> {
        self.order.iter().filter_map(|k| self.plans.get(k).map(|p| (k, p)))
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// The default repositories with this file's overrides applied.
    pub fn repositories(&self) -> Repositories {
        let mut repos = Repositories::default();
        for (arch, repo) in &self.repositories {
            repos.insert(arch, repo.clone());
        }
        repos
    }
}
