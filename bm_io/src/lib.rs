pub mod about;
pub mod extract;
pub mod fetch;
pub mod index;
pub mod install;
pub mod materialize;
pub mod mirror;
pub mod patch;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use about::About;
pub use extract::{TarballExtractor, extract_tarball};
pub use fetch::{HttpFetcher, fetch_download, sha256_file};
pub use index::load_catalog;
pub use install::{copy_tree, install_files, validate_installation};
pub use materialize::{CacheDirs, Materializer};
pub use mirror::{Mirror, Stage, UpdateReport};
pub use patch::{
    LoadPathEdit, MachOPatcher, MachORewrites, PatchelfPatcher, SystemPatcher, WorkingDirGuard,
    apply_fixes, apply_rewrites, macho_rewrites,
};
pub use traits::{BinaryPatcher, Extractor, Fetcher};
