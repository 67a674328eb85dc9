use std::fs;
use std::path::Path;

use crate::traits::Fetcher;
use bm_core::{Catalog, Error, Repository};

/// Fetch a repository's JSON index into `cache_dir` and parse it.
///
/// The index is always re-fetched so a run never resolves against a stale
/// catalog.
pub async fn load_catalog(
    repository: &Repository,
    fetcher: &dyn Fetcher,
    cache_dir: &Path,
) -> Result<Catalog, Error> {
    let unavailable = |message: String| Error::IndexUnavailable {
        repository: repository.name.clone(),
        message,
    };

    fs::create_dir_all(cache_dir)
        .map_err(|e| unavailable(format!("cannot create {}: {e}", cache_dir.display())))?;

    let path = fetcher
        .fetch(
            &repository.index_url,
            cache_dir,
            &repository.index_file_name(),
            true,
        )
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    let json = fs::read_to_string(&path)
        .map_err(|e| unavailable(format!("cannot read {}: {e}", path.display())))?;
    let catalog = Catalog::from_json(repository, &json)?;

    tracing::info!(
        repository = %repository.name,
        packages = catalog.report().kept,
        skipped = catalog.report().skipped.len(),
        "loaded package index"
    );
    Ok(catalog)
}
