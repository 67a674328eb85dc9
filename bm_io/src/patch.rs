//! Running relocation fixes against installed binaries.
//!
//! ELF files are rewritten by the external `patchelf` tool. Mach-O load
//! commands are located with goblin and their path strings overwritten in
//! place, after which the file is ad-hoc re-signed.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use goblin::mach::load_command::CommandVariant;
use goblin::mach::{Mach, MachO, SingleArch};

use crate::traits::BinaryPatcher;
use bm_core::{ElfFix, Error, Fix, relocated_load_path};

/// Changes the process working directory and restores the previous one on
/// drop, including when the scope is left through an error.
pub struct WorkingDirGuard {
    previous: PathBuf,
}

impl WorkingDirGuard {
    pub fn enter(dir: &Path) -> Result<Self, Error> {
        let previous = env::current_dir().map_err(|e| Error::FileSystem {
            message: format!("failed to read current directory: {e}"),
        })?;
        env::set_current_dir(dir).map_err(|e| Error::fs("enter", dir, e))?;
        Ok(Self { previous })
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Err(e) = env::set_current_dir(&self.previous) {
            tracing::warn!(
                dir = %self.previous.display(),
                "failed to restore working directory: {}",
                e
            );
        }
    }
}

/// Apply `fixes` in order from inside `install_dir`. Stops at the first
/// failure. Returns the number of fixes applied.
pub fn apply_fixes(
    patcher: &dyn BinaryPatcher,
    fixes: &[Fix],
    install_dir: &Path,
) -> Result<usize, Error> {
    let _cwd = WorkingDirGuard::enter(install_dir)?;

    for fix in fixes {
        tracing::info!(file = %fix.file().display(), "applying fix: {:?}", fix);
        match fix {
            Fix::Elf(elf) => patcher.patch_elf(elf)?,
            Fix::MachO { file } => patcher.patch_macho(file)?,
        }
    }
    Ok(fixes.len())
}

// ============================================================================
// ELF
// ============================================================================

/// Runs `patchelf`, found on `PATH` or under `<cache>/bin`.
pub struct PatchelfPatcher {
    cache_root: PathBuf,
}

impl PatchelfPatcher {
    /// A relative `cache_root` is anchored to the current directory now,
    /// since fixes run from inside the install directory.
    pub fn new(cache_root: &Path) -> Self {
        Self {
            cache_root: std::path::absolute(cache_root)
                .unwrap_or_else(|_| cache_root.to_path_buf()),
        }
    }

    fn cached_binary(&self) -> PathBuf {
        self.cache_root.join("bin").join("patchelf")
    }

    fn locate(&self) -> Option<PathBuf> {
        if verify_patchelf(Path::new("patchelf")) {
            return Some(PathBuf::from("patchelf"));
        }
        let cached = self.cached_binary();
        if cached.is_file() && is_executable(&cached) && verify_patchelf(&cached) {
            return Some(cached);
        }
        None
    }
}

fn verify_patchelf(path: &Path) -> bool {
    Command::new(path)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

impl BinaryPatcher for PatchelfPatcher {
    fn patch_elf(&self, fix: &ElfFix) -> Result<(), Error> {
        let patchelf = self.locate().ok_or_else(|| Error::PatchFailure {
            message: format!(
                "patchelf not found on PATH or at {}",
                self.cached_binary().display()
            ),
        })?;

        let args = fix.patchelf_args();
        tracing::debug!(patchelf = %patchelf.display(), ?args, "running patchelf");
        run_tool(&patchelf, &args)
    }

    fn patch_macho(&self, file: &Path) -> Result<(), Error> {
        Err(Error::PatchFailure {
            message: format!("{} is a Mach-O fix; patchelf cannot apply it", file.display()),
        })
    }
}

// ============================================================================
// Mach-O
// ============================================================================

/// A load-path string to overwrite, as a byte range of the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPathEdit {
    pub offset: usize,
    /// Bytes reserved for the string in its load command, NUL included.
    pub capacity: usize,
    pub new: String,
}

/// Load-command rewrites for one Mach-O file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachORewrites {
    /// `(old, new)` dependent-library paths.
    pub changes: BTreeSet<(String, String)>,
    /// New install name, when the file's own id needs one.
    pub id: Option<String>,
    /// Every string to overwrite, one per load command and architecture.
    pub edits: Vec<LoadPathEdit>,
}

impl MachORewrites {
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Scan the dylib load commands of one image. `image` holds the bytes
    /// `macho` was parsed from; `base` is where they start in the file.
    fn collect(&mut self, image: &[u8], macho: &MachO<'_>, base: usize) -> Result<(), Error> {
        for load in &macho.load_commands {
            let (command, is_id) = match &load.command {
                CommandVariant::IdDylib(command) => (command, true),
                CommandVariant::LoadDylib(command)
                | CommandVariant::LoadWeakDylib(command)
                | CommandVariant::ReexportDylib(command)
                | CommandVariant::LazyLoadDylib(command)
                | CommandVariant::LoadUpwardDylib(command) => (command, false),
                _ => continue,
            };

            let start = load.offset + command.dylib.name as usize;
            let end = load.offset + command.cmdsize as usize;
            let field = image.get(start..end).ok_or_else(|| Error::PatchFailure {
                message: format!("load command at {:#x} is truncated", base + load.offset),
            })?;
            let len = field.iter().position(|b| *b == 0).unwrap_or(field.len());
            let old = std::str::from_utf8(&field[..len]).map_err(|e| Error::PatchFailure {
                message: format!("load path at {:#x} is not UTF-8: {e}", base + start),
            })?;

            let Some(new) = relocated_load_path(old) else {
                continue;
            };
            self.edits.push(LoadPathEdit {
                offset: base + start,
                capacity: field.len(),
                new: new.clone(),
            });
            if is_id {
                self.id = Some(new);
            } else {
                self.changes.insert((old.to_string(), new));
            }
        }
        Ok(())
    }
}

/// Compute the rewrites for a thin or fat Mach-O image.
pub fn macho_rewrites(data: &[u8]) -> Result<MachORewrites, Error> {
    let parse_failure = |e: goblin::error::Error| Error::PatchFailure {
        message: format!("not a readable Mach-O file: {e}"),
    };

    let mut rewrites = MachORewrites::default();
    match Mach::parse(data).map_err(parse_failure)? {
        Mach::Binary(macho) => rewrites.collect(data, &macho, 0)?,
        Mach::Fat(fat) => {
            for (index, arch) in fat.iter_arches().enumerate() {
                let arch = arch.map_err(parse_failure)?;
                if let SingleArch::MachO(macho) = fat.get(index).map_err(parse_failure)? {
                    rewrites.collect(arch.slice(data), &macho, arch.offset as usize)?;
                }
            }
        }
    }
    Ok(rewrites)
}

/// Overwrite the load paths named by `rewrites`, NUL-padding each to the
/// space its load command reserves.
pub fn apply_rewrites(data: &mut [u8], rewrites: &MachORewrites) -> Result<(), Error> {
    for edit in &rewrites.edits {
        if edit.new.len() >= edit.capacity {
            return Err(Error::PatchFailure {
                message: format!(
                    "{} does not fit in the {} bytes of its load command \
                     (relink with -headerpad_max_install_names)",
                    edit.new, edit.capacity
                ),
            });
        }
        let field = data
            .get_mut(edit.offset..edit.offset + edit.capacity)
            .ok_or_else(|| Error::PatchFailure {
                message: format!("load path at {:#x} is out of bounds", edit.offset),
            })?;
        field.fill(0);
        field[..edit.new.len()].copy_from_slice(edit.new.as_bytes());
    }
    Ok(())
}

/// Rewrites `@@HOMEBREW_PREFIX@@` load paths to `@loader_path`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MachOPatcher;

impl MachOPatcher {
    pub fn new() -> Self {
        Self
    }
}

impl BinaryPatcher for MachOPatcher {
    fn patch_elf(&self, fix: &ElfFix) -> Result<(), Error> {
        Err(Error::PatchFailure {
            message: format!(
                "{} is an ELF fix; the Mach-O patcher cannot apply it",
                fix.file().display()
            ),
        })
    }

    fn patch_macho(&self, file: &Path) -> Result<(), Error> {
        let in_file = |e: Error| Error::PatchFailure {
            message: format!("{}: {e}", file.display()),
        };
        let mut data = fs::read(file).map_err(|e| Error::PatchFailure {
            message: format!("failed to read {}: {e}", file.display()),
        })?;
        let rewrites = macho_rewrites(&data).map_err(in_file)?;

        if rewrites.is_empty() {
            tracing::debug!(file = %file.display(), "no placeholder load paths");
            return Ok(());
        }
        for (old, new) in &rewrites.changes {
            tracing::debug!(file = %file.display(), %old, %new, "changing dependent library");
        }
        if let Some(id) = &rewrites.id {
            tracing::debug!(file = %file.display(), %id, "changing install name");
        }

        apply_rewrites(&mut data, &rewrites).map_err(in_file)?;
        fs::write(file, &data).map_err(|e| Error::PatchFailure {
            message: format!("failed to write {}: {e}", file.display()),
        })?;
        resign(file);
        Ok(())
    }
}

/// Ad-hoc re-sign a rewritten Mach-O file. Failure is logged, not fatal.
fn resign(file: &Path) {
    let result = Command::new("codesign")
        .args([
            "-s",
            "-",
            "--force",
            "--preserve-metadata=entitlements,requirements,flags,runtime",
        ])
        .arg(file)
        .output();

    match result {
        Ok(output) if output.status.success() => {}
        Ok(output) => tracing::warn!(
            file = %file.display(),
            "codesign failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => tracing::warn!(file = %file.display(), "failed to run codesign: {}", e),
    }
}

fn run_tool(tool: &Path, args: &[String]) -> Result<(), Error> {
    let output = Command::new(tool).args(args).output().map_err(|e| {
        let hint = if e.kind() == std::io::ErrorKind::NotFound {
            " (is it installed?)"
        } else {
            ""
        };
        Error::PatchFailure {
            message: format!("failed to run {}{hint}: {e}", tool.display()),
        }
    })?;

    if !output.status.success() {
        return Err(Error::PatchFailure {
            message: format!(
                "{} {} exited with {}: {}",
                tool.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}

/// Dispatches ELF fixes to patchelf and Mach-O fixes to the Mach-O patcher.
pub struct SystemPatcher {
    elf: PatchelfPatcher,
    macho: MachOPatcher,
}

impl SystemPatcher {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            elf: PatchelfPatcher::new(cache_root),
            macho: MachOPatcher::new(),
        }
    }
}

impl BinaryPatcher for SystemPatcher {
    fn patch_elf(&self, fix: &ElfFix) -> Result<(), Error> {
        self.elf.patch_elf(fix)
    }

    fn patch_macho(&self, file: &Path) -> Result<(), Error> {
        self.macho.patch_macho(file)
    }
}
