//! bottle-mirror CLI - mirrors Homebrew bottles and their sources into plugin directories.

use clap::{Parser, Subcommand};
use console::style;
use std::fs;
use std::path::{Path, PathBuf};

use bm_core::{Error, PresetTable};
use bm_io::Mirror;

mod commands;
mod display;

use commands::update::UpdateOverrides;

#[derive(Parser)]
#[command(name = "bm")]
#[command(about = "Mirror prebuilt Homebrew bottles into relocatable plugin directories")]
#[command(version)]
struct Cli {
    /// Preset file with install plans and repository overrides
    #[arg(long, global = true, default_value = "presets.toml")]
    presets: PathBuf,

    /// Directory relative plan paths are resolved against
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Cache for indexes, bottles and sources (reused across runs)
    #[arg(long, global = true, default_value = ".cache/bottle-mirror")]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, install, patch and archive one package with its dependencies
    Update {
        /// Package name
        #[arg(long, short)]
        package: String,

        /// Bottle tag, e.g. x86_64_linux or mojave
        #[arg(long, short)]
        arch: String,

        /// Pin the expected version[_revision]
        #[arg(long)]
        full_version: Option<String>,

        /// Override the preset install directory
        #[arg(long)]
        install_dir: Option<PathBuf>,

        /// Dependency to skip (repeatable)
        #[arg(long = "ignore-dep")]
        ignore_deps: Vec<String>,

        /// Copy SRC=DST, replacing the preset copies (repeatable)
        #[arg(long = "copy", value_parser = parse_copy)]
        copies: Vec<(String, String)>,

        /// Path under the install directory to delete first (repeatable)
        #[arg(long = "delete")]
        deletes: Vec<PathBuf>,
    },

    /// Run update for every preset, in file order
    BuildAll,

    /// Show the resolved dependencies of a package
    Deps {
        /// Package name
        package: String,

        /// Bottle tag
        #[arg(long, short)]
        arch: String,

        /// Dependency to skip (repeatable)
        #[arg(long = "ignore-dep")]
        ignore_deps: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what the index knows about a package
    Info {
        /// Package name
        package: String,

        /// Bottle tag
        #[arg(long, short)]
        arch: String,
    },
}

fn parse_copy(spec: &str) -> Result<(String, String), String> {
    match spec.split_once('=') {
        Some((src, dst)) if !src.is_empty() && !dst.is_empty() => {
            Ok((src.to_string(), dst.to_string()))
        }
        _ => Err(format!("expected SRC=DST, got '{spec}'")),
    }
}

/// Load the preset file. A missing file is only an error when `required`.
fn load_presets(path: &Path, required: bool) -> Result<PresetTable, Error> {
    match fs::read_to_string(path) {
        Ok(text) => PresetTable::from_toml_str(&text).map_err(|e| match e {
            Error::InvalidPreset { message } => Error::InvalidPreset {
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        }),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(PresetTable::default())
        }
        Err(e) => Err(Error::InvalidPreset {
            message: format!("cannot read {}: {}", path.display(), e),
        }),
    }
}

fn resolve_dir(root: &Path, dir: &Path) -> PathBuf {
    if dir.is_relative() {
        root.join(dir)
    } else {
        dir.to_path_buf()
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let required = matches!(cli.command, Commands::Update { .. } | Commands::BuildAll);
    let presets = load_presets(&cli.presets, required)?;
    let cache_dir = resolve_dir(&cli.root, &cli.cache_dir);
    tracing::debug!(
        presets = presets.len(),
        cache_dir = %cache_dir.display(),
        "loaded presets"
    );
    let mut mirror = Mirror::with_system_tools(presets.repositories(), &cache_dir);

    match cli.command {
        Commands::Update {
            package,
            arch,
            full_version,
            install_dir,
            ignore_deps,
            copies,
            deletes,
        } => {
            let overrides = UpdateOverrides {
                full_version,
                install_dir,
                ignore_deps,
                copies,
                deletes,
            };
            commands::update::run_update(
                &mut mirror,
                &presets,
                &cli.root,
                &package,
                &arch,
                overrides,
            )
            .await
        }

        Commands::BuildAll => commands::update::run_build_all(&mut mirror, &presets, &cli.root).await,

        Commands::Deps {
            package,
            arch,
            ignore_deps,
            json,
        } => commands::deps::run_deps(&mut mirror, &package, &arch, ignore_deps, json).await,

        Commands::Info { package, arch } => {
            commands::info::run_info(&mut mirror, &package, &arch).await
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start runtime: {}", style("error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_update_with_overrides() {
        let cli = Cli::parse_from([
            "bm",
            "update",
            "-p",
            "libarchive",
            "-a",
            "x86_64_linux",
            "--ignore-dep",
            "gettext",
            "--copy",
            "libarchive/3.4.3/lib/libarchive.so=lib/",
            "--root",
            "/work",
        ]);

        assert_eq!(cli.root, PathBuf::from("/work"));
        match cli.command {
            Commands::Update {
                package,
                arch,
                ignore_deps,
                copies,
                ..
            } => {
                assert_eq!(package, "libarchive");
                assert_eq!(arch, "x86_64_linux");
                assert_eq!(ignore_deps, vec!["gettext"]);
                assert_eq!(
                    copies,
                    vec![(
                        "libarchive/3.4.3/lib/libarchive.so".to_string(),
                        "lib/".to_string()
                    )]
                );
            }
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn rejects_malformed_copy() {
        assert!(parse_copy("lib/").is_err());
        assert!(parse_copy("=lib/").is_err());
        assert_eq!(
            parse_copy("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
    }

    #[test]
    fn missing_presets_only_fail_when_required() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("presets.toml");

        assert!(load_presets(&path, false).unwrap().is_empty());
        assert!(matches!(
            load_presets(&path, true),
            Err(Error::InvalidPreset { .. })
        ));
    }

    #[test]
    fn relative_dirs_resolve_against_root() {
        assert_eq!(
            resolve_dir(Path::new("/work"), Path::new(".cache/bm")),
            PathBuf::from("/work/.cache/bm")
        );
        assert_eq!(
            resolve_dir(Path::new("/work"), Path::new("/var/cache")),
            PathBuf::from("/var/cache")
        );
    }
}
