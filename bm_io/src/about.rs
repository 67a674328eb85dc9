use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use bm_core::Error;

pub const FORMULA_NOTE: &str = "This is a brew formula used to create this package.";
pub const SOURCE_NOTE: &str =
    "This is a source archive or patch used to create this package with brew.";

/// Provenance record stored as `<resource>.ABOUT` next to an archived file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct About {
    pub about_resource: String,
    pub name: String,
    pub version: String,
    pub download_url: String,
    pub notes: String,
}

impl About {
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.ABOUT", self.about_resource))
    }

    /// Write the record into `dir`, replacing any previous one.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, Error> {
        let path = self.path_in(dir);
        let yaml = serde_yaml::to_string(self).map_err(|e| Error::FileSystem {
            message: format!("failed to serialize {}: {e}", path.display()),
        })?;
        fs::write(&path, yaml).map_err(|e| Error::fs("write", &path, e))?;
        Ok(path)
    }

    pub fn read_from(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|e| Error::fs("read", path, e))?;
        serde_yaml::from_str(&text).map_err(|e| Error::FileSystem {
            message: format!("invalid ABOUT file {}: {e}", path.display()),
        })
    }
}
