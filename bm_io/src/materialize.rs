use std::fs;
use std::path::{Path, PathBuf};

use crate::about::{About, FORMULA_NOTE, SOURCE_NOTE};
use crate::fetch::fetch_download;
use crate::install::install_files;
use crate::traits::{Extractor, Fetcher};
use bm_core::{BinaryPackage, Download, Error, InstallPlan, formula_source_urls};

/// Cache directories reused across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirs {
    /// Bottles and their extraction directories.
    pub bin: PathBuf,
    /// Formulas, source archives and patches.
    pub src: PathBuf,
}

impl CacheDirs {
    pub fn new(root: &Path) -> Self {
        Self {
            bin: root.join("bin"),
            src: root.join("src"),
        }
    }

    pub fn ensure(&self) -> Result<(), Error> {
        for dir in [&self.bin, &self.src] {
            fs::create_dir_all(dir).map_err(|e| Error::fs("create", dir, e))?;
        }
        Ok(())
    }
}

/// Fetches one package's bottle and sources, archives them with provenance
/// records, and installs the planned files.
pub struct Materializer<'a> {
    fetcher: &'a dyn Fetcher,
    extractor: &'a dyn Extractor,
    cache: &'a CacheDirs,
}

impl<'a> Materializer<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, extractor: &'a dyn Extractor, cache: &'a CacheDirs) -> Self {
        Self {
            fetcher,
            extractor,
            cache,
        }
    }

    /// Materialize `package` for `arch` and return its extraction directory.
    ///
    /// Source URLs found in the bottle's formula files are added to
    /// `package`. The caller owns the returned directory and removes it once
    /// the run is over; if this call fails it removes the directory itself.
    pub async fn process_package(
        &self,
        package: &mut BinaryPackage,
        arch: &str,
        plan: &InstallPlan,
    ) -> Result<PathBuf, Error> {
        tracing::info!(package = %package, arch, "materializing package");

        let bottle = package
            .download_urls
            .get(arch)
            .cloned()
            .ok_or_else(|| Error::MissingArchitectureVariant {
                name: package.name.clone(),
                arch: arch.to_string(),
                available: package.download_urls.keys().cloned().collect(),
            })?;

        self.cache.ensure()?;
        let archive = fetch_download(self.fetcher, &bottle, &self.cache.bin, false).await?;
        let extracted = self.extractor.extract(&archive)?;

        match self.archive_and_install(package, &bottle, plan, &extracted).await {
            Ok(()) => Ok(extracted),
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&extracted) {
                    tracing::warn!(
                        dir = %extracted.display(),
                        "failed to remove extraction directory: {}",
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    async fn archive_and_install(
        &self,
        package: &mut BinaryPackage,
        bottle: &Download,
        plan: &InstallPlan,
        extracted: &Path,
    ) -> Result<(), Error> {
        fs::create_dir_all(&plan.thirdparty_dir)
            .map_err(|e| Error::fs("create", &plan.thirdparty_dir, e))?;

        self.archive_formulas(package, bottle, extracted, &plan.thirdparty_dir)?;
        self.archive_sources(package, &plan.thirdparty_dir).await?;

        let copied = install_files(&plan.copies, extracted, &plan.install_dir)?;
        tracing::info!(package = %package, files = copied, "installed files");
        Ok(())
    }

    /// Archive the formula files the bottle was built from and register the
    /// extra sources they declare.
    fn archive_formulas(
        &self,
        package: &mut BinaryPackage,
        bottle: &Download,
        extracted: &Path,
        thirdparty_dir: &Path,
    ) -> Result<(), Error> {
        let brew_dir = extracted
            .join(&package.name)
            .join(package.full_version())
            .join(".brew");

        if !brew_dir.is_dir() {
            tracing::warn!(
                package = %package,
                dir = %brew_dir.display(),
                "bottle has no .brew directory, no formula to archive"
            );
            return Ok(());
        }

        let mut formulas: Vec<PathBuf> = fs::read_dir(&brew_dir)
            .map_err(|e| Error::fs("read", &brew_dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        formulas.sort();

        for formula in formulas {
            let file_name = archive_file(&formula, &self.cache.src)?;
            archive_file(&formula, thirdparty_dir)?;
            About {
                about_resource: file_name,
                name: package.name.clone(),
                version: package.full_version(),
                download_url: bottle.url.clone(),
                notes: FORMULA_NOTE.to_string(),
            }
            .write_to(thirdparty_dir)?;

            let text = fs::read(&formula).map_err(|e| Error::fs("read", &formula, e))?;
            let added =
                package.add_formula_source_downloads(formula_source_urls(&String::from_utf8_lossy(&text)));
            tracing::debug!(formula = %formula.display(), added, "scanned formula for sources");
        }
        Ok(())
    }

    async fn archive_sources(
        &self,
        package: &BinaryPackage,
        thirdparty_dir: &Path,
    ) -> Result<(), Error> {
        for source in &package.source_downloads {
            let fetched = fetch_download(self.fetcher, source, &self.cache.src, false).await?;
            let file_name = archive_file(&fetched, thirdparty_dir)?;
            About {
                about_resource: file_name,
                name: package.name.clone(),
                version: package.full_version(),
                download_url: source.url.clone(),
                notes: SOURCE_NOTE.to_string(),
            }
            .write_to(thirdparty_dir)?;
        }
        Ok(())
    }
}

/// Copy `file` into `dir`, returning the file name.
fn archive_file(file: &Path, dir: &Path) -> Result<String, Error> {
    let file_name = file.file_name().ok_or_else(|| Error::FileSystem {
        message: format!("{} has no file name", file.display()),
    })?;
    let target = dir.join(file_name);
    fs::copy(file, &target).map_err(|e| Error::FileSystem {
        message: format!(
            "failed to copy {} to {}: {e}",
            file.display(),
            target.display()
        ),
    })?;
    Ok(file_name.to_string_lossy().into_owned())
}
