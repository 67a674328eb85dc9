//! Dependency resolution over a repository catalog.
//!
//! The walk is a depth-first pre-order traversal: each dependency is emitted
//! when first discovered and its own dependencies are expanded before the
//! next sibling. The output keeps first-discovery order, holds each package
//! name once, and excludes the root.
//!
//! Indexes are expected to be acyclic, but a cycle would otherwise recurse
//! forever, so the names on the current path are tracked and revisiting one
//! is reported as [`Error::DependencyCycle`].

use std::collections::{BTreeSet, HashSet};

use crate::{BinaryPackage, Catalog, Error};

/// Resolve every package transitively required by `root`.
///
/// Names in `ignore` are neither emitted nor expanded. A name missing from
/// the catalog (after the `-git` fallback) is an [`Error::UnknownDependency`].
pub fn resolve<'a>(
    root: &'a BinaryPackage,
    catalog: &'a Catalog,
    ignore: &BTreeSet<String>,
) -> Result<Vec<&'a BinaryPackage>, Error> {
    let mut walk = Walk {
        catalog,
        ignore,
        path: vec![root.name.clone()],
        seen: HashSet::new(),
        ordered: Vec::new(),
    };
    walk.visit(root)?;
    Ok(walk.ordered)
}

struct Walk<'a, 'i> {
    catalog: &'a Catalog,
    ignore: &'i BTreeSet<String>,
    /// Package names from the root down to the package being expanded.
    path: Vec<String>,
    seen: HashSet<String>,
    ordered: Vec<&'a BinaryPackage>,
}

impl<'a> Walk<'a, '_> {
    fn visit(&mut self, package: &'a BinaryPackage) -> Result<(), Error> {
        for dep in &package.depends {
            if self.ignore.contains(&dep.name) {
                continue;
            }

            let resolved = self.catalog.lookup_dependency(&dep.name).ok_or_else(|| {
                Error::UnknownDependency {
                    name: dep.name.clone(),
                    required_by: package.name.clone(),
                }
            })?;

            if self.ignore.contains(&resolved.name) {
                continue;
            }

            if let Some(start) = self.path.iter().position(|n| *n == resolved.name) {
                let mut cycle = self.path[start..].to_vec();
                cycle.push(resolved.name.clone());
                return Err(Error::DependencyCycle { cycle });
            }

            // A package's subtree is fully expanded on first discovery, so
            // expanding it again cannot discover anything new.
            if !self.seen.insert(resolved.name.clone()) {
                continue;
            }
            self.ordered.push(resolved);

            self.path.push(resolved.name.clone());
            self.visit(resolved)?;
            self.path.pop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Repository;
    use proptest::prelude::*;
    use serde_json::json;

    fn repo() -> Repository {
        Repository::new(
            "testbrew",
            "https://example.com/index.json",
            "https://example.com/{}.rb",
        )
    }

    fn catalog(entries: &[(&str, &[&str])]) -> Catalog {
        let records = entries
            .iter()
            .map(|(name, deps)| {
                json!({
                    "name": name,
                    "versions": {"stable": "1.0"},
                    "urls": {"stable": {"url": format!("https://example.com/{name}-1.0.tar.gz")}},
                    "bottle": {"stable": {"files": {
                        "x86_64_linux": {"url": format!("https://testbrew/{name}.tar.gz"), "sha256": "00"}
                    }}},
                    "dependencies": deps,
                })
            })
            .collect();
        Catalog::from_records(&repo(), records)
    }

    fn names(packages: &[&BinaryPackage]) -> Vec<String> {
        packages.iter().map(|p| p.name.clone()).collect()
    }

    fn no_ignore() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn package_without_dependencies_resolves_to_nothing() {
        let cat = catalog(&[("zlib", &[])]);
        let resolved = resolve(cat.get("zlib").unwrap(), &cat, &no_ignore()).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn walks_depth_first_in_discovery_order() {
        let cat = catalog(&[
            ("libarchive", &["xz", "lz4", "zstd"]),
            ("xz", &["gettext"]),
            ("gettext", &[]),
            ("lz4", &[]),
            ("zstd", &["xz", "lz4"]),
        ]);

        let resolved = resolve(cat.get("libarchive").unwrap(), &cat, &no_ignore()).unwrap();
        assert_eq!(names(&resolved), vec!["xz", "gettext", "lz4", "zstd"]);
    }

    #[test]
    fn ignored_dependencies_are_not_expanded() {
        let cat = catalog(&[("a", &["b"]), ("b", &["c"]), ("c", &["d"]), ("d", &[])]);
        let ignore: BTreeSet<String> = ["c".to_string()].into();

        let resolved = resolve(cat.get("a").unwrap(), &cat, &ignore).unwrap();
        assert_eq!(names(&resolved), vec!["b"]);
    }

    #[test]
    fn falls_back_to_git_suffixed_package() {
        let cat = catalog(&[("a", &["libbsd@0.10"]), ("libbsd-git", &[])]);
        let resolved = resolve(cat.get("a").unwrap(), &cat, &no_ignore()).unwrap();
        assert_eq!(names(&resolved), vec!["libbsd-git"]);
    }

    #[test]
    fn unknown_dependency_is_fatal() {
        let cat = catalog(&[("a", &["b"]), ("b", &["ghost"])]);
        let err = resolve(cat.get("a").unwrap(), &cat, &no_ignore()).unwrap_err();
        assert_eq!(
            err,
            Error::UnknownDependency {
                name: "ghost".to_string(),
                required_by: "b".to_string(),
            }
        );
    }

    #[test]
    fn detects_cycles() {
        let cat = catalog(&[
            ("alpha", &["beta"]),
            ("beta", &["gamma"]),
            ("gamma", &["alpha"]),
        ]);

        let err = resolve(cat.get("alpha").unwrap(), &cat, &no_ignore()).unwrap_err();
        assert_eq!(
            err,
            Error::DependencyCycle {
                cycle: vec![
                    "alpha".to_string(),
                    "beta".to_string(),
                    "gamma".to_string(),
                    "alpha".to_string()
                ],
            }
        );
    }

    #[test]
    fn diamond_is_emitted_once() {
        let cat = catalog(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"]), ("d", &[])]);
        let resolved = resolve(cat.get("a").unwrap(), &cat, &no_ignore()).unwrap();
        assert_eq!(names(&resolved), vec!["b", "d", "c"]);
    }

    /// Random DAG: package `i` may only depend on packages with a larger index.
    fn dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
        (2usize..12).prop_flat_map(|n| {
            (0..n)
                .map(|i| proptest::collection::vec(i + 1..n + 1, 0..4))
                .collect::<Vec<_>>()
                .prop_map(move |edges| {
                    edges
                        .into_iter()
                        .map(|deps| deps.into_iter().filter(|d| *d < n).collect())
                        .collect()
                })
        })
    }

    fn reachable(edges: &[Vec<usize>], ignore: &BTreeSet<String>) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            for &d in &edges[i] {
                let name = format!("p{d}");
                if ignore.contains(&name) || !found.insert(name) {
                    continue;
                }
                stack.push(d);
            }
        }
        found
    }

    proptest! {
        #[test]
        fn resolves_reachable_set_once_and_stably(edges in dag(), ignored in 1usize..12) {
            let names_owned: Vec<String> = (0..edges.len()).map(|i| format!("p{i}")).collect();
            let dep_names: Vec<Vec<String>> = edges
                .iter()
                .map(|deps| deps.iter().map(|d| format!("p{d}")).collect())
                .collect();
            let dep_refs: Vec<Vec<&str>> = dep_names
                .iter()
                .map(|deps| deps.iter().map(String::as_str).collect())
                .collect();
            let entries: Vec<(&str, &[&str])> = names_owned
                .iter()
                .zip(dep_refs.iter())
                .map(|(n, d)| (n.as_str(), d.as_slice()))
                .collect();
            let cat = catalog(&entries);
            let ignore: BTreeSet<String> = [format!("p{ignored}")].into();

            let root = cat.get("p0").unwrap();
            let first = names(&resolve(root, &cat, &ignore).unwrap());
            let second = names(&resolve(root, &cat, &ignore).unwrap());

            let unique: BTreeSet<String> = first.iter().cloned().collect();
            prop_assert_eq!(unique.len(), first.len());
            prop_assert!(!first.iter().any(|n| ignore.contains(n)));
            prop_assert_eq!(unique, reachable(&edges, &ignore));
            prop_assert_eq!(first, second);
        }
    }
}
