//! End-to-end run: mapping, key, comparison, export.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cascade::CompareOptions;
use crate::config::{ExecutionOptions, OutputFormat, ReconConfig, ReportOptions};
use crate::engine::{ComparisonEngine, ComparisonResult};
use crate::error::ReconError;
use crate::keys::KeySpec;
use crate::mapping::{ColumnMapping, ColumnMappingResolver, MappingRequest, TableProfile};
use crate::report::{ReportArtifacts, ReportFidelityExporter};
use crate::runlog::RunLog;
use crate::selector::{AutoKeyChooser, ConfiguredKeys, KeyChooser, KeySelection, KeySelector};
use crate::store::{DatasetHandle, TableStore};

/// Non-null values sampled per column for fuzzy mapping.
pub const PROFILE_SAMPLE_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Build the right → left column mapping.
///
/// An explicit map is used as given. Otherwise both tables are profiled and
/// columns are matched by name and type.
pub fn resolve_mapping(
    store: &dyn TableStore,
    left: &DatasetHandle,
    right: &DatasetHandle,
    explicit: Option<&BTreeMap<String, String>>,
    key_columns: &[String],
    log: &RunLog,
) -> Result<ColumnMapping, ReconError> {
    let resolver = ColumnMappingResolver::new(log);
    let explicit = explicit.filter(|m| !m.is_empty());
    let profiles = match explicit {
        Some(_) => None,
        None => Some((
            TableProfile::collect(store, left, PROFILE_SAMPLE_SIZE)?,
            TableProfile::collect(store, right, PROFILE_SAMPLE_SIZE)?,
        )),
    };
    resolver.resolve(&MappingRequest {
        left,
        right,
        explicit,
        profiles: profiles.as_ref().map(|(l, r)| (l, r)),
        key_columns,
    })
}

/// Select a key with `chooser` and pin it into the mapping.
pub fn select_and_validate_key(
    store: &dyn TableStore,
    left: &DatasetHandle,
    right: &DatasetHandle,
    mapping: &ColumnMapping,
    configured: &[String],
    chooser: &mut dyn KeyChooser,
    log: &RunLog,
) -> Result<(KeySelection, ColumnMapping), ReconError> {
    let selection = KeySelector::new(store, log).select(left, right, mapping, configured, chooser)?;
    let mut pinned = mapping.clone();
    for pair in selection.key.pairs() {
        pinned = pinned.pin_key(&pair.left, &pair.right)?;
    }
    Ok((selection, pinned))
}

#[allow(clippy::too_many_arguments)]
pub fn compare(
    store: &dyn TableStore,
    left: &DatasetHandle,
    right: &DatasetHandle,
    mapping: &ColumnMapping,
    key: &KeySpec,
    value_columns: Option<&[String]>,
    options: CompareOptions,
    execution: ExecutionOptions,
    log: &RunLog,
) -> Result<ComparisonResult, ReconError> {
    ComparisonEngine::new(store, options, execution, log).compare(left, right, mapping, key, value_columns)
}

pub fn export_differences(
    store: &dyn TableStore,
    result: &ComparisonResult,
    report: &ReportOptions,
    format: OutputFormat,
    max_differences: usize,
    out_dir: &Path,
    log: &RunLog,
) -> Result<ReportArtifacts, ReconError> {
    ReportFidelityExporter::new(store, report, format, max_differences, log).export_differences(result, out_dir)
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub mapping: ColumnMapping,
    pub key: KeySelection,
    pub result: ComparisonResult,
    pub artifacts: ReportArtifacts,
    pub output_dir: PathBuf,
}

/// Runs one configured comparison over two staged datasets.
pub struct Reconciler<'s> {
    store: &'s dyn TableStore,
    config: &'s ReconConfig,
    base_dir: PathBuf,
    output_dir: Option<PathBuf>,
    log: RunLog,
}

impl<'s> Reconciler<'s> {
    pub fn new(store: &'s dyn TableStore, config: &'s ReconConfig, log: &RunLog) -> Self {
        Self {
            store,
            config,
            base_dir: PathBuf::from("."),
            output_dir: None,
            log: log.scoped("pipeline"),
        }
    }

    /// Directory relative report paths are resolved against.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Write reports here instead of the configured directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None if self.config.report.output_dir.is_absolute() => self.config.report.output_dir.clone(),
            None => self.base_dir.join(&self.config.report.output_dir),
        }
    }

    /// Configured keys when present, otherwise automatic detection.
    pub fn default_chooser(&self) -> Box<dyn KeyChooser> {
        let keys = self.config.requested_keys();
        if keys.is_empty() {
            Box::new(AutoKeyChooser::default())
        } else {
            Box::new(ConfiguredKeys::new(keys))
        }
    }

    pub fn resolve_mapping(&self, left: &DatasetHandle, right: &DatasetHandle) -> Result<ColumnMapping, ReconError> {
        resolve_mapping(
            self.store,
            left,
            right,
            Some(&self.config.right().column_map),
            &self.config.requested_keys(),
            &self.log,
        )
    }

    pub fn run(
        &self,
        left: &DatasetHandle,
        right: &DatasetHandle,
        chooser: &mut dyn KeyChooser,
    ) -> Result<RunOutcome, ReconError> {
        let comparison = &self.config.comparison;
        self.log.info("start", &[("name", &self.config.display_name())]);

        let mapping = self.resolve_mapping(left, right)?;
        let (key, mapping) = select_and_validate_key(
            self.store,
            left,
            right,
            &mapping,
            &self.config.requested_keys(),
            chooser,
            &self.log,
        )?;

        let value_columns = (!comparison.columns.is_empty()).then_some(comparison.columns.as_slice());
        let result = compare(
            self.store,
            left,
            right,
            &mapping,
            &key.key,
            value_columns,
            comparison.compare_options(),
            self.config.execution,
            &self.log,
        )?;

        let output_dir = self.output_dir();
        let artifacts = ReportFidelityExporter::new(
            self.store,
            &self.config.report,
            comparison.output_format,
            comparison.max_differences,
            &self.log,
        )
        .with_title(self.config.display_name())
        .export_differences(&result, &output_dir)?;

        self.log.info(
            "finished",
            &[
                ("matched", &result.matched),
                ("differences", &result.value_differences),
                ("approximate", &result.is_approximate()),
                ("output_dir", &output_dir.display()),
            ],
        );
        Ok(RunOutcome { mapping, key, result, artifacts, output_dir })
    }

    pub fn run_default(&self, left: &DatasetHandle, right: &DatasetHandle) -> Result<RunOutcome, ReconError> {
        let mut chooser = self.default_chooser();
        self.run(left, right, chooser.as_mut())
    }
}
