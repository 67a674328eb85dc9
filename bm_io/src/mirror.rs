//! The update pipeline: clean targets, resolve, materialize, validate, patch,
//! clean up and archive.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::extract::TarballExtractor;
use crate::fetch::HttpFetcher;
use crate::index::load_catalog;
use crate::install::{copy_tree, validate_installation};
use crate::materialize::{CacheDirs, Materializer};
use crate::patch::{SystemPatcher, apply_fixes};
use crate::traits::{BinaryPatcher, Extractor, Fetcher};
use bm_core::{BinaryPackage, Catalog, Error, InstallPlan, Repositories, resolve};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CleanTargets,
    ResolveIndex,
    MaterializeRoot,
    MaterializeDependencies,
    Validate,
    Patch,
    CleanupTemp,
    ArchiveSources,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CleanTargets => "clean targets",
            Stage::ResolveIndex => "resolve index",
            Stage::MaterializeRoot => "materialize root",
            Stage::MaterializeDependencies => "materialize dependencies",
            Stage::Validate => "validate",
            Stage::Patch => "patch",
            Stage::CleanupTemp => "cleanup temp",
            Stage::ArchiveSources => "archive sources",
        };
        f.write_str(name)
    }
}

fn enter(stage: Stage, package: &str) {
    tracing::info!(%stage, package, "stage");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub package: String,
    /// Qualified names, root first, in installation order.
    pub installed: Vec<String>,
    pub fixes_applied: usize,
    pub archived_to: PathBuf,
}

/// Mirrors packages from the repositories into plugin directories.
///
/// Catalogs are loaded at most once per repository and reused by every
/// later call on the same `Mirror`.
pub struct Mirror {
    repositories: Repositories,
    fetcher: Box<dyn Fetcher>,
    extractor: Box<dyn Extractor>,
    patcher: Box<dyn BinaryPatcher>,
    cache_root: PathBuf,
    cache: CacheDirs,
    catalogs: BTreeMap<String, Catalog>,
}

impl Mirror {
    pub fn new(
        repositories: Repositories,
        fetcher: Box<dyn Fetcher>,
        extractor: Box<dyn Extractor>,
        patcher: Box<dyn BinaryPatcher>,
        cache_root: &Path,
    ) -> Self {
        Self {
            repositories,
            fetcher,
            extractor,
            patcher,
            cache_root: cache_root.to_path_buf(),
            cache: CacheDirs::new(cache_root),
            catalogs: BTreeMap::new(),
        }
    }

    /// A mirror that fetches over HTTP and patches with the system tools.
    pub fn with_system_tools(repositories: Repositories, cache_root: &Path) -> Self {
        Self::new(
            repositories,
            Box::new(HttpFetcher::new()),
            Box::new(TarballExtractor::new()),
            Box::new(SystemPatcher::new(cache_root)),
            cache_root,
        )
    }

    /// Load the catalog serving `arch` unless already loaded; returns the
    /// repository name it is stored under.
    async fn ensure_catalog(&mut self, arch: &str) -> Result<String, Error> {
        let repository = self.repositories.for_arch(arch)?.clone();
        if !self.catalogs.contains_key(&repository.name) {
            let catalog =
                load_catalog(&repository, self.fetcher.as_ref(), &self.cache_root).await?;
            self.catalogs.insert(repository.name.clone(), catalog);
        }
        Ok(repository.name)
    }

    pub async fn catalog(&mut self, arch: &str) -> Result<&Catalog, Error> {
        let repository = self.ensure_catalog(arch).await?;
        self.catalogs
            .get(&repository)
            .ok_or_else(|| Error::IndexUnavailable {
                repository: repository.clone(),
                message: "catalog was not loaded".to_string(),
            })
    }

    pub async fn package(&mut self, name: &str, arch: &str) -> Result<BinaryPackage, Error> {
        self.catalog(arch)
            .await?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingPackage {
                name: name.to_string(),
            })
    }

    /// Resolve the dependencies of `name` without installing anything.
    pub async fn dependencies(
        &mut self,
        name: &str,
        arch: &str,
        ignore: &BTreeSet<String>,
    ) -> Result<Vec<BinaryPackage>, Error> {
        let catalog = self.catalog(arch).await?;
        let root = catalog.get(name).ok_or_else(|| Error::MissingPackage {
            name: name.to_string(),
        })?;
        Ok(resolve(root, catalog, ignore)?.into_iter().cloned().collect())
    }

    /// Run the full update of `name` for `arch` according to `plan`.
    pub async fn update_package(
        &mut self,
        name: &str,
        arch: &str,
        plan: &InstallPlan,
    ) -> Result<UpdateReport, Error> {
        enter(Stage::CleanTargets, name);
        clean_targets(plan)?;

        enter(Stage::ResolveIndex, name);
        let repository = self.ensure_catalog(arch).await?;
        let catalog = self
            .catalogs
            .get_mut(&repository)
            .ok_or_else(|| Error::IndexUnavailable {
                repository: repository.clone(),
                message: "catalog was not loaded".to_string(),
            })?;
        let dependencies = resolve_for_update(catalog, name, plan)?;

        let materializer =
            Materializer::new(self.fetcher.as_ref(), self.extractor.as_ref(), &self.cache);
        let mut extracted = Vec::new();
        let outcome = install_and_patch(
            &materializer,
            catalog,
            self.patcher.as_ref(),
            name,
            &dependencies,
            arch,
            plan,
            &mut extracted,
        )
        .await;

        enter(Stage::CleanupTemp, name);
        cleanup_extracted(&extracted);
        let (installed, fixes_applied) = outcome?;

        enter(Stage::ArchiveSources, name);
        let archived_to = archive_sources(plan)?;

        tracing::info!(package = name, installed = installed.len(), "update complete");
        Ok(UpdateReport {
            package: name.to_string(),
            installed,
            fixes_applied,
            archived_to,
        })
    }
}

/// Check the root against the pinned version and resolve its dependencies
/// before anything is fetched.
fn resolve_for_update(
    catalog: &Catalog,
    name: &str,
    plan: &InstallPlan,
) -> Result<Vec<String>, Error> {
    let root = catalog.get(name).ok_or_else(|| Error::MissingPackage {
        name: name.to_string(),
    })?;

    if let Some(expected) = &plan.full_version {
        let actual = root.full_version();
        if actual != *expected {
            return Err(Error::VersionMismatch {
                name: name.to_string(),
                expected: expected.clone(),
                actual,
            });
        }
    }

    let dependencies: Vec<String> = resolve(root, catalog, &plan.ignore_deps)?
        .into_iter()
        .map(|p| p.name.clone())
        .collect();
    tracing::info!(package = name, ?dependencies, "resolved dependencies");
    Ok(dependencies)
}

#[allow(clippy::too_many_arguments)]
async fn install_and_patch(
    materializer: &Materializer<'_>,
    catalog: &mut Catalog,
    patcher: &dyn BinaryPatcher,
    name: &str,
    dependencies: &[String],
    arch: &str,
    plan: &InstallPlan,
    extracted: &mut Vec<PathBuf>,
) -> Result<(Vec<String>, usize), Error> {
    let mut installed = Vec::new();

    enter(Stage::MaterializeRoot, name);
    for (i, package_name) in std::iter::once(name)
        .chain(dependencies.iter().map(String::as_str))
        .enumerate()
    {
        if i == 1 {
            enter(Stage::MaterializeDependencies, name);
        }
        let package = catalog
            .get_mut(package_name)
            .ok_or_else(|| Error::MissingPackage {
                name: package_name.to_string(),
            })?;
        extracted.push(materializer.process_package(package, arch, plan).await?);
        installed.push(package.qualified_name());
    }

    enter(Stage::Validate, name);
    validate_installation(&plan.install_dir, &plan.copies, name)?;

    let fixes_applied = if plan.fixes.is_empty() {
        0
    } else {
        enter(Stage::Patch, name);
        apply_fixes(patcher, &plan.fixes, &plan.install_dir)?
    };

    Ok((installed, fixes_applied))
}

/// Remove the planned deletes, empty the thirdparty directory and drop the
/// previous source snapshot.
fn clean_targets(plan: &InstallPlan) -> Result<(), Error> {
    for rel in &plan.deletes {
        let target = plan.install_dir.join(rel);
        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(&target).map_err(|e| Error::fs("remove", &target, e))?
            }
            Ok(_) => fs::remove_file(&target).map_err(|e| Error::fs("remove", &target, e))?,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) =>
            {
                continue;
            }
            Err(e) => return Err(Error::fs("inspect", &target, e)),
        }
        tracing::debug!(path = %target.display(), "deleted");
    }
    fs::create_dir_all(&plan.install_dir)
        .map_err(|e| Error::fs("create", &plan.install_dir, e))?;

    if plan.thirdparty_dir.exists() {
        fs::remove_dir_all(&plan.thirdparty_dir)
            .map_err(|e| Error::fs("remove", &plan.thirdparty_dir, e))?;
    }
    fs::create_dir_all(&plan.thirdparty_dir)
        .map_err(|e| Error::fs("create", &plan.thirdparty_dir, e))?;

    let saved = plan.saved_sources_dir();
    if saved.exists() {
        fs::remove_dir_all(&saved).map_err(|e| Error::fs("remove", &saved, e))?;
    }
    Ok(())
}

fn cleanup_extracted(dirs: &[PathBuf]) {
    for dir in dirs {
        if let Err(e) = fs::remove_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), "failed to remove extraction directory: {}", e);
        }
    }
}

fn archive_sources(plan: &InstallPlan) -> Result<PathBuf, Error> {
    let saved = plan.saved_sources_dir();
    let copied = copy_tree(&plan.base_dir, &saved)?;
    tracing::info!(dest = %saved.display(), files = copied, "archived plugin sources");
    Ok(saved)
}
