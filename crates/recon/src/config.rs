use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cascade::CompareOptions;
use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub datasets: BTreeMap<String, DatasetConfig>,
    pub comparison: ComparisonConfig,
    #[serde(default)]
    pub report: ReportOptions,
    #[serde(default)]
    pub execution: ExecutionOptions,
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub path: PathBuf,
    #[serde(default, rename = "type")]
    pub kind: DatasetKind,
    /// Field delimiter. Sniffed from the file when absent (csv only).
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default)]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub exclude_columns: Vec<String>,
    /// Right column → left column, any casing.
    #[serde(default)]
    pub column_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    #[default]
    Csv,
    Tsv,
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ComparisonConfig {
    pub left: String,
    pub right: String,
    /// Key columns (left names). Falls back to the left dataset's
    /// `key_columns`, then to auto-detection.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Value columns (left names). Empty means every mapped column.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_true")]
    pub ignore_case: bool,
    #[serde(default = "default_true")]
    pub ignore_spaces: bool,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Preview size for the only-left / only-right exports.
    #[serde(default = "default_max_differences")]
    pub max_differences: usize,
}

impl ComparisonConfig {
    pub fn compare_options(&self) -> CompareOptions {
        CompareOptions {
            tolerance: self.tolerance,
            ignore_case: self.ignore_case,
            ignore_spaces: self.ignore_spaces,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Csv,
    Tsv,
}

impl OutputFormat {
    pub fn delimiter(&self) -> u8 {
        match self {
            Self::Csv => b',',
            Self::Tsv => b'\t',
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
        }
    }
}

fn default_tolerance() -> f64 {
    0.01
}

fn default_true() -> bool {
    true
}

fn default_max_differences() -> usize {
    1000
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Sort fields for the value-difference preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewOrder {
    /// Differing column name.
    Column,
    /// Row key values.
    Key,
    /// summary before sample before partial.
    Priority,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReportOptions {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_preview_limit")]
    pub csv_preview_limit: usize,
    /// Individual rows kept per column in the preview.
    #[serde(default = "default_sample_size")]
    pub entire_column_sample_size: usize,
    #[serde(default = "default_preview_order")]
    pub preview_order: Vec<PreviewOrder>,
    #[serde(default = "default_true")]
    pub export_full: bool,
    /// Collapse fully-differing columns in the preview.
    #[serde(default = "default_true")]
    pub annotate_entire_column: bool,
    /// Rows per file before a full export rolls over to a new part.
    #[serde(default = "default_chunk_export_size")]
    pub chunk_export_size: usize,
    #[serde(default)]
    pub export_rowlevel_audit_full: bool,
    #[serde(default)]
    pub zip_large_exports: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            csv_preview_limit: default_preview_limit(),
            entire_column_sample_size: default_sample_size(),
            preview_order: default_preview_order(),
            export_full: true,
            annotate_entire_column: true,
            chunk_export_size: default_chunk_export_size(),
            export_rowlevel_audit_full: false,
            zip_large_exports: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_preview_limit() -> usize {
    1000
}

fn default_sample_size() -> usize {
    10
}

fn default_preview_order() -> Vec<PreviewOrder> {
    vec![PreviewOrder::Column, PreviewOrder::Key, PreviewOrder::Priority]
}

fn default_chunk_export_size() -> usize {
    50_000
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionOptions {
    /// Chunk when either table has more rows than this.
    #[serde(default = "default_chunk_rows")]
    pub chunk_threshold: u64,
    #[serde(default = "default_chunk_rows")]
    pub chunk_size: u64,
    /// Log progress every N chunks.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            chunk_threshold: default_chunk_rows(),
            chunk_size: default_chunk_rows(),
            progress_every: default_progress_every(),
        }
    }
}

fn default_chunk_rows() -> u64 {
    25_000
}

fn default_progress_every() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ReconError> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| ReconError::Io(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&input)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let c = &self.comparison;
        for (role, name) in [("left", &c.left), ("right", &c.right)] {
            if !self.datasets.contains_key(name) {
                return Err(ReconError::ConfigValidation(format!(
                    "comparison.{role}: dataset '{name}' is not defined"
                )));
            }
        }
        if c.left == c.right {
            return Err(ReconError::ConfigValidation(
                "comparison.left and comparison.right must name different datasets".into(),
            ));
        }

        for (name, dataset) in &self.datasets {
            if dataset.path.as_os_str().is_empty() {
                return Err(ReconError::ConfigValidation(format!("datasets.{name}.path is empty")));
            }
            if dataset.key_columns.iter().any(|k| k.trim().is_empty()) {
                return Err(ReconError::ConfigValidation(format!(
                    "datasets.{name}.key_columns contains a blank name"
                )));
            }
            if dataset.column_map.iter().any(|(r, l)| r.trim().is_empty() || l.trim().is_empty()) {
                return Err(ReconError::ConfigValidation(format!(
                    "datasets.{name}.column_map contains a blank name"
                )));
            }
        }

        if !c.tolerance.is_finite() || c.tolerance < 0.0 {
            return Err(ReconError::ConfigValidation(format!(
                "comparison.tolerance must be a non-negative number, got {}",
                c.tolerance
            )));
        }
        if c.keys.iter().chain(&c.columns).any(|k| k.trim().is_empty()) {
            return Err(ReconError::ConfigValidation(
                "comparison.keys and comparison.columns must not contain blank names".into(),
            ));
        }
        if c.max_differences == 0 {
            return Err(ReconError::ConfigValidation("comparison.max_differences must be > 0".into()));
        }

        let r = &self.report;
        for (field, value) in [
            ("csv_preview_limit", r.csv_preview_limit),
            ("entire_column_sample_size", r.entire_column_sample_size),
            ("chunk_export_size", r.chunk_export_size),
        ] {
            if value == 0 {
                return Err(ReconError::ConfigValidation(format!("report.{field} must be > 0")));
            }
        }
        let mut seen = HashSet::new();
        if !r.preview_order.iter().all(|o| seen.insert(*o)) {
            return Err(ReconError::ConfigValidation(
                "report.preview_order lists a field twice".into(),
            ));
        }

        let e = &self.execution;
        for (field, value) in [
            ("chunk_threshold", e.chunk_threshold),
            ("chunk_size", e.chunk_size),
            ("progress_every", e.progress_every),
        ] {
            if value == 0 {
                return Err(ReconError::ConfigValidation(format!("execution.{field} must be > 0")));
            }
        }

        Ok(())
    }

    pub fn left(&self) -> &DatasetConfig {
        &self.datasets[&self.comparison.left]
    }

    pub fn right(&self) -> &DatasetConfig {
        &self.datasets[&self.comparison.right]
    }

    /// Keys the user asked for: comparison-level first, then the left dataset's.
    pub fn requested_keys(&self) -> Vec<String> {
        if !self.comparison.keys.is_empty() {
            return self.comparison.keys.clone();
        }
        self.left().key_columns.clone()
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} vs {}", self.comparison.left, self.comparison.right))
    }
}

impl DatasetConfig {
    /// Dataset path, relative paths taken from `base_dir`.
    pub fn resolve_path(&self, base_dir: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            base_dir.join(&self.path)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[datasets.left]
path = "left.csv"
key_columns = ["id"]

[datasets.right]
path = "right.csv"
column_map = { ID = "id", Total = "amount" }

[comparison]
left = "left"
right = "right"
"#;

    #[test]
    fn parse_minimal_with_defaults() {
        let config = ReconConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.display_name(), "left vs right");
        assert_eq!(config.left().kind, DatasetKind::Csv);
        assert_eq!(config.right().column_map.get("Total").map(String::as_str), Some("amount"));
        assert_eq!(config.requested_keys(), vec!["id"]);

        let c = &config.comparison;
        assert_eq!(c.tolerance, 0.01);
        assert!(c.ignore_case && c.ignore_spaces);
        assert_eq!(c.output_format, OutputFormat::Csv);
        assert_eq!(c.max_differences, 1000);

        let r = &config.report;
        assert_eq!(r.csv_preview_limit, 1000);
        assert_eq!(r.entire_column_sample_size, 10);
        assert_eq!(r.chunk_export_size, 50_000);
        assert_eq!(r.preview_order, default_preview_order());
        assert!(r.export_full && !r.export_rowlevel_audit_full && !r.zip_large_exports);

        assert_eq!(config.execution, ExecutionOptions::default());
        assert_eq!(config.execution.chunk_threshold, 25_000);
    }

    #[test]
    fn parse_full() {
        let input = format!(
            r#"{MINIMAL}
tolerance = 0.5
keys = ["ID"]
output_format = "tsv"

[report]
output_dir = "out"
preview_order = ["priority", "column"]
export_rowlevel_audit_full = true
zip_large_exports = true

[execution]
chunk_threshold = 10
chunk_size = 4
"#
        );
        let config = ReconConfig::from_toml(&input).unwrap();
        assert_eq!(config.comparison.tolerance, 0.5);
        assert_eq!(config.requested_keys(), vec!["ID"]);
        assert_eq!(config.comparison.output_format.extension(), "tsv");
        assert_eq!(config.report.preview_order, vec![PreviewOrder::Priority, PreviewOrder::Column]);
        assert!(config.report.zip_large_exports);
        assert_eq!(config.execution.chunk_size, 4);
        assert_eq!(config.execution.progress_every, 5);
    }

    #[test]
    fn required_fields_are_not_defaulted() {
        let input = r#"
[datasets.left]
path = "l.csv"
[datasets.right]
path = "r.csv"
[comparison]
left = "left"
"#;
        assert!(matches!(ReconConfig::from_toml(input), Err(ReconError::ConfigParse(_))));

        let no_path = MINIMAL.replace("path = \"left.csv\"", "");
        assert!(matches!(ReconConfig::from_toml(&no_path), Err(ReconError::ConfigParse(_))));
    }

    #[test]
    fn unknown_fields_rejected() {
        let input = format!("{MINIMAL}\ntolerence = 1.0\n");
        assert!(ReconConfig::from_toml(&input).is_err());
    }

    #[test]
    fn unknown_dataset_reference() {
        let input = MINIMAL.replace("right = \"right\"", "right = \"bank\"");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("dataset 'bank' is not defined"));
    }

    #[test]
    fn invalid_values_rejected() {
        for (needle, replacement) in [
            ("right = \"right\"\n", "right = \"right\"\ntolerance = -1.0\n"),
            ("right = \"right\"\n", "right = \"right\"\nmax_differences = 0\n"),
            ("right = \"right\"\n", "right = \"right\"\nkeys = [\" \"]\n"),
            ("right = \"right\"\n", "right = \"left\"\n"),
        ] {
            let input = MINIMAL.replacen(needle, replacement, 1);
            assert!(
                matches!(ReconConfig::from_toml(&input), Err(ReconError::ConfigValidation(_))),
                "should reject: {replacement}"
            );
        }

        let dup_order = format!("{MINIMAL}\n[report]\npreview_order = [\"key\", \"key\"]\n");
        assert!(ReconConfig::from_toml(&dup_order).is_err());
        let zero_chunk = format!("{MINIMAL}\n[execution]\nchunk_size = 0\n");
        assert!(ReconConfig::from_toml(&zero_chunk).is_err());
    }

    #[test]
    fn resolve_relative_paths() {
        let config = ReconConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(
            config.left().resolve_path(Path::new("/data/recon")),
            PathBuf::from("/data/recon/left.csv")
        );
    }
}
