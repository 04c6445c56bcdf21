//! File ingestion for crossrecon.
//!
//! Reads configured CSV/TSV datasets and stages them into a [`SqliteStore`].

pub mod csv;

use std::path::Path;

use crossrecon::config::{DatasetConfig, DatasetKind, ReconConfig};
use crossrecon::{DatasetHandle, ReconError, RunLog, SqliteStore};

/// Field delimiter for a dataset: TSV is always tab, CSV uses the configured
/// delimiter or sniffs one from the content.
pub fn delimiter_for(name: &str, config: &DatasetConfig, content: &str) -> Result<u8, ReconError> {
    match (config.kind, config.delimiter) {
        (DatasetKind::Tsv, _) => Ok(b'\t'),
        (DatasetKind::Csv, Some(c)) if c.is_ascii() => Ok(c as u8),
        (DatasetKind::Csv, Some(c)) => Err(ReconError::ConfigValidation(format!(
            "datasets.{name}.delimiter must be a single ASCII character, got '{c}'"
        ))),
        (DatasetKind::Csv, None) => Ok(csv::sniff_delimiter(content)),
    }
}

/// Read one dataset from disk and stage it as `table_name`.
pub fn stage_dataset(
    store: &SqliteStore,
    table_name: &str,
    config: &DatasetConfig,
    base_dir: &Path,
    log: &RunLog,
) -> Result<DatasetHandle, ReconError> {
    let log = log.scoped("ingest");
    let path = config.resolve_path(base_dir);
    let content = csv::read_file_as_utf8(&path).map_err(ReconError::Io)?;
    let delimiter = delimiter_for(table_name, config, &content)?;
    log::debug!(target: "crossrecon", "{}: delimiter {:?}", path.display(), delimiter as char);

    let table = csv::parse_table(&content, delimiter)
        .map_err(|e| ReconError::InvalidInput(format!("{}: {e}", path.display())))?;
    let handle = store
        .stage_table(table_name, &table.headers, table.rows)?
        .with_exclusions(&config.exclude_columns);

    log.info(
        "staged",
        &[
            ("table", &handle.table),
            ("path", &path.display()),
            ("rows", &handle.row_count),
            ("columns", &handle.columns.len()),
        ],
    );
    Ok(handle)
}

/// Stage the comparison's left and right datasets under their dataset names.
pub fn stage_pair(
    store: &SqliteStore,
    config: &ReconConfig,
    base_dir: &Path,
    log: &RunLog,
) -> Result<(DatasetHandle, DatasetHandle), ReconError> {
    let left = stage_dataset(store, &config.comparison.left, config.left(), base_dir, log)?;
    let right = stage_dataset(store, &config.comparison.right, config.right(), base_dir, log)?;
    Ok((left, right))
}
