pub mod catalog;
pub mod download;
pub mod errors;
pub mod formula;
pub mod package;
pub mod plan;
pub mod relocate;
pub mod resolve;

pub use catalog::{
    Catalog, GIT_SUFFIX_FALLBACK, LINUX_ARCH, MACOS_ARCHES, ParseReport, Repositories, Repository,
    SkippedRecord,
};
pub use download::Download;
pub use errors::Error;
pub use formula::{FormulaRecord, formula_source_urls};
pub use package::{BinaryPackage, Dependency};
pub use plan::{CopyOp, CopyTarget, Expectation, InstallPlan, PresetKey, PresetTable};
pub use relocate::{ElfFix, Fix, MACHO_PLACEHOLDER, relocated_load_path};
pub use resolve::resolve;
