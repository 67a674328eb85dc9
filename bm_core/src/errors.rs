use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    IndexUnavailable {
        repository: String,
        message: String,
    },
    MissingPackage {
        name: String,
    },
    UnknownDependency {
        name: String,
        required_by: String,
    },
    DependencyCycle {
        cycle: Vec<String>,
    },
    VersionMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    NetworkFailure {
        message: String,
    },
    ChecksumMismatch {
        expected: String,
        actual: String,
        file_name: Option<String>,
    },
    MissingArchitectureVariant {
        name: String,
        arch: String,
        available: Vec<String>,
    },
    UnsupportedArchitecture {
        arch: String,
    },
    ExtractionFailure {
        message: String,
    },
    FileSystem {
        message: String,
    },
    IllegalCopySpec {
        src: String,
        dst: String,
    },
    IncompleteInstallation {
        package: String,
        missing: Vec<PathBuf>,
    },
    PatchFailure {
        message: String,
    },
    InvalidPreset {
        message: String,
    },
    MissingPreset {
        package: String,
        arch: String,
    },
}

impl Error {
    /// Wrap an I/O error with the operation and path it concerns.
    pub fn fs(action: &str, path: &std::path::Path, err: std::io::Error) -> Self {
        Error::FileSystem {
            message: format!("failed to {} {}: {}", action, path.display(), err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IndexUnavailable {
                repository,
                message,
            } => {
                write!(
                    f,
                    "package index for '{}' is unavailable: {}\n  hint: check your network connection; the index is required to resolve packages",
                    repository, message
                )
            }
            Error::MissingPackage { name } => {
                write!(
                    f,
                    "package '{}' not found in the index\n  hint: check the package name and the selected architecture",
                    name
                )
            }
            Error::UnknownDependency { name, required_by } => {
                write!(
                    f,
                    "unknown dependency '{}' required by '{}'\n  hint: the index entry is missing or incomplete; use --ignore-dep {} to skip it",
                    name, required_by, name
                )
            }
            Error::DependencyCycle { cycle } => {
                let rendered = cycle.join(" -> ");
                write!(
                    f,
                    "dependency cycle detected: {}\n  hint: this is likely an index bug; please report it upstream",
                    rendered
                )
            }
            Error::VersionMismatch {
                name,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "incorrect version for '{}': index has {}, expected {}\n  hint: update the pinned full_version in the preset after reviewing the new release",
                    name, actual, expected
                )
            }
            Error::NetworkFailure { message } => {
                write!(
                    f,
                    "network error: {}\n  hint: check your internet connection and try again",
                    message
                )
            }
            Error::ChecksumMismatch {
                expected,
                actual,
                file_name,
            } => {
                write!(f, "checksum verification failed")?;
                if let Some(name) = file_name {
                    write!(f, " for '{}'", name)?;
                }
                write!(f, "\n  expected: {}\n  got:      {}", expected, actual)?;
                write!(
                    f,
                    "\n  hint: delete the cached file and fetch again; a persistent mismatch means the upstream artifact changed"
                )
            }
            Error::MissingArchitectureVariant {
                name,
                arch,
                available,
            } => {
                write!(f, "no '{}' bottle for package '{}'", arch, name)?;
                if !available.is_empty() {
                    write!(f, " (available for: {})", available.join(", "))?;
                }
                Ok(())
            }
            Error::UnsupportedArchitecture { arch } => {
                write!(
                    f,
                    "no repository is configured for architecture '{}'\n  hint: add a [repositories.{}] table to the preset file",
                    arch, arch
                )
            }
            Error::ExtractionFailure { message } => {
                write!(f, "extraction failed: {}", message)
            }
            Error::FileSystem { message } => {
                write!(f, "filesystem error: {}", message)
            }
            Error::IllegalCopySpec { src, dst } => {
                write!(
                    f,
                    "illegal copy from directory '{}' to file '{}'\n  hint: directory sources need a directory destination ending with '/'",
                    src, dst
                )
            }
            Error::IncompleteInstallation { package, missing } => {
                write!(f, "these files were not installed for {}:", package)?;
                for path in missing {
                    write!(f, "\n  {}", path.display())?;
                }
                Ok(())
            }
            Error::PatchFailure { message } => {
                write!(f, "binary patching failed: {}", message)
            }
            Error::InvalidPreset { message } => {
                write!(f, "invalid preset: {}", message)
            }
            Error::MissingPreset { package, arch } => {
                write!(
                    f,
                    "no preset for package '{}' on '{}'\n  hint: add a [[preset]] entry with the install, thirdparty and source directories",
                    package, arch
                )
            }
        }
    }
}

impl std::error::Error for Error {}
