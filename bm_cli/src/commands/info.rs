//! Info command implementation.

use console::style;

use bm_core::{BinaryPackage, Error};
use bm_io::Mirror;

use crate::display::format_header;

/// Plain-text description of a package, one line per entry.
pub fn format_package_info(package: &BinaryPackage) -> Vec<String> {
    let mut lines = vec![
        format!("version: {}", package.full_version()),
        format!("formula: {}", package.formula_download.url),
    ];

    lines.push("bottles:".to_string());
    for (arch, download) in &package.download_urls {
        lines.push(format!("  {arch}: {}", download.url));
    }

    if !package.source_downloads.is_empty() {
        lines.push("sources:".to_string());
        for source in &package.source_downloads {
            lines.push(format!("  {}", source.url));
        }
    }

    if !package.depends.is_empty() {
        lines.push("dependencies:".to_string());
        for dep in &package.depends {
            if dep.version_hint.is_empty() {
                lines.push(format!("  {}", dep.name));
            } else {
                lines.push(format!("  {} ({})", dep.name, dep.version_hint));
            }
        }
    }
    lines
}

/// Run the info command.
pub async fn run_info(mirror: &mut Mirror, package: &str, arch: &str) -> Result<(), Error> {
    let pkg = mirror.package(package, arch).await?;

    println!("{}", format_header(&style(pkg.qualified_name()).bold().to_string()));
    for line in format_package_info(&pkg) {
        println!("    {line}");
    }
    if !pkg.download_urls.contains_key(arch) {
        println!(
            "    {} no bottle for {}",
            style("warning:").yellow().bold(),
            arch
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bm_core::{Catalog, Repository};

    #[test]
    fn describes_bottles_sources_and_dependencies() {
        let repo = Repository::new(
            "linuxbrew",
            "https://example.com/i.json",
            "https://example.com/Formula/{}.rb",
        );
        let record = serde_json::json!({
            "name": "libarchive",
            "versions": {"stable": "3.4.3"},
            "urls": {"stable": {"url": "https://www.libarchive.org/downloads/libarchive-3.4.3.tar.xz"}},
            "bottle": {"stable": {"files": {
                "x86_64_linux": {"url": "https://linuxbrew.bintray.com/libarchive.tar.gz", "sha256": "00"}
            }}},
            "dependencies": ["xz", "openssl@1.1"],
        });
        let catalog = Catalog::from_records(&repo, vec![record]);

        let lines = format_package_info(catalog.get("libarchive").unwrap());

        assert_eq!(lines[0], "version: 3.4.3");
        assert_eq!(lines[1], "formula: https://example.com/Formula/libarchive.rb");
        assert!(lines.contains(&"  x86_64_linux: https://linuxbrew.bintray.com/libarchive.tar.gz".to_string()));
        assert!(lines.contains(&"  https://www.libarchive.org/downloads/libarchive-3.4.3.tar.xz".to_string()));
        assert!(lines.contains(&"  openssl (1.1)".to_string()));
    }
}
