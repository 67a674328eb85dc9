//! Update and build-all command implementations.

use console::style;
use std::path::{Path, PathBuf};

use bm_core::{CopyOp, Error, InstallPlan, PresetTable};
use bm_io::Mirror;

use crate::display::{format_header, format_update_summary};

/// Command-line values that replace the preset's.
#[derive(Debug, Default)]
pub struct UpdateOverrides {
    pub full_version: Option<String>,
    pub install_dir: Option<PathBuf>,
    pub ignore_deps: Vec<String>,
    pub copies: Vec<(String, String)>,
    pub deletes: Vec<PathBuf>,
}

impl UpdateOverrides {
    /// Apply the overrides and validate the result.
    pub fn apply(self, mut plan: InstallPlan) -> Result<InstallPlan, Error> {
        if let Some(full_version) = self.full_version {
            plan.full_version = Some(full_version);
        }
        if let Some(install_dir) = self.install_dir {
            plan.install_dir = install_dir;
        }
        if !self.ignore_deps.is_empty() {
            plan.ignore_deps = self.ignore_deps.into_iter().collect();
        }
        if !self.copies.is_empty() {
            plan.copies = self
                .copies
                .iter()
                .map(|(src, dst)| CopyOp::parse(src, dst))
                .collect();
        }
        if !self.deletes.is_empty() {
            plan.deletes = self.deletes;
        }
        plan.validate()?;
        Ok(plan)
    }
}

/// Run the update command.
pub async fn run_update(
    mirror: &mut Mirror,
    presets: &PresetTable,
    root: &Path,
    package: &str,
    arch: &str,
    overrides: UpdateOverrides,
) -> Result<(), Error> {
    let plan = overrides
        .apply(presets.get(package, arch)?.clone())?
        .rooted_at(root);
    update_one(mirror, package, arch, &plan).await
}

/// Run the build-all command.
pub async fn run_build_all(
    mirror: &mut Mirror,
    presets: &PresetTable,
    root: &Path,
) -> Result<(), Error> {
    if presets.is_empty() {
        println!(
            "{} No presets defined.",
            style("==>").cyan().bold()
        );
        return Ok(());
    }

    for (key, plan) in presets.iter() {
        let plan = plan.clone().rooted_at(root);
        update_one(mirror, &key.package, &key.arch, &plan).await?;
    }
    Ok(())
}

async fn update_one(
    mirror: &mut Mirror,
    package: &str,
    arch: &str,
    plan: &InstallPlan,
) -> Result<(), Error> {
    println!("{}", format_header(&format!("Updating {package} for {arch}")));
    println!("    install dir: {}", plan.install_dir.display());

    let report = mirror.update_package(package, arch, plan).await?;
    for line in format_update_summary(&report) {
        println!("{line}");
    }
    Ok(())
}
