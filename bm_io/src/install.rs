//! Copying files out of extracted bottles, and checking the result.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use bm_core::{CopyOp, CopyTarget, Error, Expectation};

/// Apply a copy plan from `extracted_dir` into `install_dir`.
///
/// The on-disk kind of each source decides how it is copied: directories are
/// merged recursively into the destination, files are copied into a
/// directory destination or onto a file destination. Sources missing from
/// this bottle are skipped, so one plan can serve a package and its
/// dependencies. Returns the number of files copied.
pub fn install_files(
    copies: &[CopyOp],
    extracted_dir: &Path,
    install_dir: &Path,
) -> Result<usize, Error> {
    let mut copied = 0;

    for op in copies {
        let src = extracted_dir.join(op.src.path());
        let dst = install_dir.join(op.dst.path());

        if src.is_dir() {
            copied += copy_tree(&src, &dst)?;
        } else if src.is_file() {
            let target = match &op.dst {
                CopyTarget::Directory(_) => {
                    fs::create_dir_all(&dst).map_err(|e| Error::fs("create", &dst, e))?;
                    match src.file_name() {
                        Some(name) => dst.join(name),
                        None => continue,
                    }
                }
                CopyTarget::File(_) => {
                    if let Some(parent) = dst.parent() {
                        fs::create_dir_all(parent).map_err(|e| Error::fs("create", parent, e))?;
                    }
                    dst
                }
            };
            copy_file(&src, &target)?;
            copied += 1;
        } else {
            tracing::debug!(src = %src.display(), "copy source not in this bottle, skipping");
        }
    }

    Ok(copied)
}

/// Recursively copy the contents of `src` into `dst`, merging with whatever
/// is already there. Symlinks are followed.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize, Error> {
    let mut copied = 0;
    fs::create_dir_all(dst).map_err(|e| Error::fs("create", dst, e))?;

    for entry in WalkDir::new(src).follow_links(true).min_depth(1) {
        let entry = entry.map_err(|e| Error::FileSystem {
            message: format!("failed to walk {}: {e}", src.display()),
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::FileSystem {
                message: format!("unexpected path {}: {e}", entry.path().display()),
            })?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::fs("create", &target, e))?;
        } else {
            copy_file(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn copy_file(src: &Path, dst: &Path) -> Result<(), Error> {
    tracing::debug!(src = %src.display(), dst = %dst.display(), "copy");
    fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| Error::FileSystem {
            message: format!(
                "failed to copy {} to {}: {e}",
                src.display(),
                dst.display()
            ),
        })
}

/// Check that every artifact the copy plan promises exists in `install_dir`.
///
/// All misses are collected into a single [`Error::IncompleteInstallation`].
pub fn validate_installation(
    install_dir: &Path,
    copies: &[CopyOp],
    package: &str,
) -> Result<(), Error> {
    let mut missing: Vec<PathBuf> = Vec::new();

    for op in copies {
        match op.expectation(install_dir)? {
            Expectation::File(path) => {
                if !path.is_file() {
                    missing.push(path);
                }
            }
            Expectation::NonEmptyDirectory(path) => {
                let non_empty = fs::read_dir(&path)
                    .map(|mut entries| entries.next().is_some())
                    .unwrap_or(false);
                if !non_empty {
                    missing.push(path);
                }
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::IncompleteInstallation {
            package: package.to_string(),
            missing,
        })
    }
}
