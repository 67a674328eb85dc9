//! Deps command implementation.

use std::collections::BTreeSet;

use bm_core::{BinaryPackage, Error};
use bm_io::Mirror;

use crate::display::{format_dep_line, format_header};

/// JSON rendering of a resolved dependency list.
pub fn deps_json(packages: &[BinaryPackage]) -> serde_json::Value {
    serde_json::Value::Array(
        packages
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "full_version": p.full_version(),
                })
            })
            .collect(),
    )
}

/// Run the deps command.
pub async fn run_deps(
    mirror: &mut Mirror,
    package: &str,
    arch: &str,
    ignore_deps: Vec<String>,
    json: bool,
) -> Result<(), Error> {
    let ignore: BTreeSet<String> = ignore_deps.into_iter().collect();
    let deps = mirror.dependencies(package, arch, &ignore).await?;

    if json {
        let rendered = serde_json::to_string_pretty(&deps_json(&deps)).map_err(|e| {
            Error::FileSystem {
                message: format!("failed to render JSON: {e}"),
            }
        })?;
        println!("{rendered}");
        return Ok(());
    }

    if deps.is_empty() {
        println!("{}", format_header(&format!("{package} has no dependencies.")));
        return Ok(());
    }

    println!("{}", format_header(&format!("Dependencies for {package} ({arch}):")));
    for dep in &deps {
        println!("{}", format_dep_line(dep));
    }
    Ok(())
}
