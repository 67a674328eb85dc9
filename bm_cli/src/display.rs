//! Formatting helpers for terminal output.

use console::style;

use bm_core::BinaryPackage;
use bm_io::UpdateReport;

/// A `==>` banner line.
pub fn format_header(text: &str) -> String {
    format!("{} {}", style("==>").cyan().bold(), text)
}

pub fn format_dep_line(package: &BinaryPackage) -> String {
    format!("  {} {}", package.name, style(package.full_version()).dim())
}

/// Lines summarizing a finished update.
pub fn format_update_summary(report: &UpdateReport) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.installed.len() + 3);
    for name in &report.installed {
        lines.push(format!("    {} {}", style("✓").green(), name));
    }
    if report.fixes_applied > 0 {
        lines.push(format!("    applied {} fix(es)", report.fixes_applied));
    }
    lines.push(format!(
        "    sources archived to {}",
        report.archived_to.display()
    ));
    lines.push(format_header(&format!(
        "Updated {} ({} package(s))",
        style(&report.package).bold(),
        report.installed.len()
    )));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn strip(line: &str) -> String {
        console::strip_ansi_codes(line).into_owned()
    }

    #[test]
    fn header_has_arrow() {
        assert_eq!(strip(&format_header("Updating")), "==> Updating");
    }

    #[test]
    fn summary_lists_installed_packages_and_fixes() {
        let report = UpdateReport {
            package: "libmagic".to_string(),
            installed: vec!["libmagic@5.39".to_string(), "zlib@1.2.11".to_string()],
            fixes_applied: 2,
            archived_to: PathBuf::from("/work/sources/typecode_libmagic-linux"),
        };

        let lines: Vec<String> = format_update_summary(&report)
            .iter()
            .map(|l| strip(l))
            .collect();

        assert_eq!(lines[0], "    ✓ libmagic@5.39");
        assert_eq!(lines[1], "    ✓ zlib@1.2.11");
        assert_eq!(lines[2], "    applied 2 fix(es)");
        assert!(lines[3].ends_with("typecode_libmagic-linux"));
        assert_eq!(lines[4], "==> Updated libmagic (2 package(s))");
    }

    #[test]
    fn summary_omits_fix_line_without_fixes() {
        let report = UpdateReport {
            package: "p7zip".to_string(),
            installed: vec!["p7zip@16.02_2".to_string()],
            fixes_applied: 0,
            archived_to: PathBuf::from("/s"),
        };
        let lines = format_update_summary(&report);
        assert_eq!(lines.len(), 3);
    }
}
