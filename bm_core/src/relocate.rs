//! Relocation fixes applied to installed binaries.
//!
//! This module only decides what to run. Executing `patchelf` or rewriting
//! Mach-O load commands is done by a `BinaryPatcher` in `bm_io`.

use std::path::{Path, PathBuf};

use crate::Error;

/// Token that Homebrew bottles embed in Mach-O load commands.
pub const MACHO_PLACEHOLDER: &str = "@@HOMEBREW_PREFIX@@";

/// One `patchelf` operation. File paths are relative to the install directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfFix {
    SetSoname {
        soname: String,
        file: PathBuf,
    },
    SetRpath {
        rpath: String,
        file: PathBuf,
    },
    ReplaceNeeded {
        old: String,
        new: String,
        file: PathBuf,
    },
    SetInterpreter {
        interpreter: String,
        file: PathBuf,
    },
}

impl ElfFix {
    /// Command-line arguments for `patchelf`.
    pub fn patchelf_args(&self) -> Vec<String> {
        let file = |p: &Path| p.to_string_lossy().into_owned();
        match self {
            ElfFix::SetSoname { soname, file: f } => {
                vec!["--set-soname".into(), soname.clone(), file(f)]
            }
            ElfFix::SetRpath { rpath, file: f } => {
                vec!["--set-rpath".into(), rpath.clone(), file(f)]
            }
            ElfFix::ReplaceNeeded { old, new, file: f } => {
                vec!["--replace-needed".into(), old.clone(), new.clone(), file(f)]
            }
            ElfFix::SetInterpreter {
                interpreter,
                file: f,
            } => vec!["--set-interpreter".into(), interpreter.clone(), file(f)],
        }
    }

    pub fn file(&self) -> &Path {
        match self {
            ElfFix::SetSoname { file, .. }
            | ElfFix::SetRpath { file, .. }
            | ElfFix::ReplaceNeeded { file, .. }
            | ElfFix::SetInterpreter { file, .. } => file,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fix {
    Elf(ElfFix),
    /// Rewrite placeholder-prefixed load commands of a Mach-O file.
    MachO { file: PathBuf },
}

impl Fix {
    /// Parse the `["patchelf", "--set-rpath", "$ORIGIN/.", "lib/x.so"]` form
    /// used in preset files. The leading dashes of patchelf flags are optional.
    pub fn parse(parts: &[String]) -> Result<Self, Error> {
        let invalid = |why: &str| Error::InvalidPreset {
            message: format!("fix {:?}: {}", parts, why),
        };

        let (fixer, args) = parts.split_first().ok_or_else(|| invalid("empty fix"))?;
        match fixer.as_str() {
            "patchmacho" => match args {
                [file] => Ok(Fix::MachO {
                    file: PathBuf::from(file),
                }),
                _ => Err(invalid("patchmacho takes exactly one file")),
            },
            "patchelf" => {
                let (op, rest) = args
                    .split_first()
                    .ok_or_else(|| invalid("missing patchelf operation"))?;
                let elf = match (op.trim_start_matches('-'), rest) {
                    ("set-soname", [soname, file]) => ElfFix::SetSoname {
                        soname: soname.clone(),
                        file: PathBuf::from(file),
                    },
                    ("set-rpath", [rpath, file]) => ElfFix::SetRpath {
                        rpath: rpath.clone(),
                        file: PathBuf::from(file),
                    },
                    ("replace-needed", [old, new, file]) => ElfFix::ReplaceNeeded {
                        old: old.clone(),
                        new: new.clone(),
                        file: PathBuf::from(file),
                    },
                    ("set-interpreter", [interpreter, file]) => ElfFix::SetInterpreter {
                        interpreter: interpreter.clone(),
                        file: PathBuf::from(file),
                    },
                    ("set-soname" | "set-rpath" | "replace-needed" | "set-interpreter", _) => {
                        return Err(invalid("wrong number of arguments"));
                    }
                    _ => return Err(invalid("unknown patchelf operation")),
                };
                Ok(Fix::Elf(elf))
            }
            _ => Err(invalid("unknown fixer, expected 'patchelf' or 'patchmacho'")),
        }
    }

    pub fn file(&self) -> &Path {
        match self {
            Fix::Elf(elf) => elf.file(),
            Fix::MachO { file } => file,
        }
    }
}

/// The loader-relative replacement for a Mach-O load path, if it needs one.
///
/// `@@HOMEBREW_PREFIX@@/opt/xz/lib/liblzma.5.dylib` becomes
/// `@loader_path/liblzma.5.dylib`. Paths without the placeholder, such as
/// `/usr/lib/libSystem.B.dylib`, are left alone.
pub fn relocated_load_path(path: &str) -> Option<String> {
    if !path.contains(MACHO_PLACEHOLDER) {
        return None;
    }
    let dylib = path.rsplit('/').next().unwrap_or(path);
    Some(format!("@loader_path/{dylib}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rewrites_placeholder_paths_only() {
        assert_eq!(
            relocated_load_path("@@HOMEBREW_PREFIX@@/opt/xz/lib/liblzma.5.dylib").as_deref(),
            Some("@loader_path/liblzma.5.dylib")
        );
        assert_eq!(relocated_load_path("/usr/lib/libSystem.B.dylib"), None);
        assert_eq!(relocated_load_path("@rpath/libfoo.dylib"), None);
    }

    #[test]
    fn parses_patchelf_fixes() {
        let fix = Fix::parse(&parts(&[
            "patchelf",
            "--replace-needed",
            "libz.so.1",
            "libz-lm539.so.1",
            "lib/libmagic.so",
        ]))
        .unwrap();

        assert_eq!(
            fix,
            Fix::Elf(ElfFix::ReplaceNeeded {
                old: "libz.so.1".to_string(),
                new: "libz-lm539.so.1".to_string(),
                file: PathBuf::from("lib/libmagic.so"),
            })
        );
        assert_eq!(fix.file(), Path::new("lib/libmagic.so"));
    }

    #[test]
    fn flag_dashes_are_optional() {
        let fix = Fix::parse(&parts(&["patchelf", "set-rpath", "$ORIGIN/.", "bin/7z"])).unwrap();
        let Fix::Elf(elf) = fix else {
            panic!("expected an ELF fix");
        };
        assert_eq!(elf.patchelf_args(), vec!["--set-rpath", "$ORIGIN/.", "bin/7z"]);
    }

    #[test]
    fn renders_patchelf_argument_grammar() {
        let soname = ElfFix::SetSoname {
            soname: "libarchive.so".to_string(),
            file: PathBuf::from("lib/libarchive.so"),
        };
        assert_eq!(
            soname.patchelf_args(),
            vec!["--set-soname", "libarchive.so", "lib/libarchive.so"]
        );

        let interp = ElfFix::SetInterpreter {
            interpreter: "/lib64/ld-linux-x86-64.so.2".to_string(),
            file: PathBuf::from("bin/7z"),
        };
        assert_eq!(
            interp.patchelf_args(),
            vec!["--set-interpreter", "/lib64/ld-linux-x86-64.so.2", "bin/7z"]
        );
    }

    #[test]
    fn parses_patchmacho() {
        let fix = Fix::parse(&parts(&["patchmacho", "lib/libmagic.dylib"])).unwrap();
        assert_eq!(
            fix,
            Fix::MachO {
                file: PathBuf::from("lib/libmagic.dylib")
            }
        );
    }

    #[test]
    fn rejects_malformed_fixes() {
        assert!(Fix::parse(&[]).is_err());
        assert!(Fix::parse(&parts(&["strip", "lib/x.so"])).is_err());
        assert!(Fix::parse(&parts(&["patchelf", "--set-rpath", "lib/x.so"])).is_err());
        assert!(Fix::parse(&parts(&["patchelf", "--shrink-rpath", "lib/x.so"])).is_err());
        assert!(Fix::parse(&parts(&["patchmacho"])).is_err());
    }
}
