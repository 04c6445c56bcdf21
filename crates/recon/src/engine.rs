//! Aggregate comparison of two staged tables.

use serde::Serialize;

use crate::cascade::CompareOptions;
use crate::chunked::{count_direct, ChunkFailure, ChunkedExecutor};
use crate::config::ExecutionOptions;
use crate::error::ReconError;
use crate::keys::{KeySpec, KeyValidator};
use crate::mapping::ColumnMapping;
use crate::runlog::RunLog;
use crate::store::{ColumnPair, CountOp, DatasetHandle, Side, TablePair, TableStore};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Direct,
    Chunked,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Chunked => write!(f, "chunked"),
        }
    }
}

/// How the counts were produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub mode: ExecutionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    /// Windows executed across all counts.
    pub chunks: u64,
    pub failed_chunks: Vec<ChunkFailure>,
}

impl ExecutionReport {
    fn direct() -> Self {
        Self { mode: ExecutionMode::Direct, chunk_size: None, chunks: 0, failed_chunks: Vec::new() }
    }

    fn chunked(chunk_size: u64) -> Self {
        Self { mode: ExecutionMode::Chunked, chunk_size: Some(chunk_size), chunks: 0, failed_chunks: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDifference {
    pub column: ColumnPair,
    /// Matched rows whose values differ in this column.
    pub differences: u64,
}

/// Percentages, rounded to two decimals. Zero when the denominator is zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SummaryMetrics {
    pub match_rate: f64,
    pub left_coverage: f64,
    pub right_coverage: f64,
    pub difference_rate: f64,
}

impl SummaryMetrics {
    pub fn compute(left_rows: u64, right_rows: u64, matched: u64, value_differences: u64) -> Self {
        let union = (left_rows + right_rows).saturating_sub(matched);
        Self {
            match_rate: percent(matched, union),
            left_coverage: percent(matched, left_rows),
            right_coverage: percent(matched, right_rows),
            difference_rate: percent(value_differences, matched),
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let pct = part as f64 / whole as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub left_table: String,
    pub right_table: String,
    pub key: KeySpec,
    pub value_columns: Vec<ColumnPair>,
    pub left_rows: u64,
    pub right_rows: u64,
    pub matched: u64,
    pub only_left: u64,
    pub only_right: u64,
    /// Matched rows with at least one differing value column.
    pub value_differences: u64,
    pub column_differences: Vec<ColumnDifference>,
    pub metrics: SummaryMetrics,
    pub options: CompareOptions,
    pub execution: ExecutionReport,
}

impl ComparisonResult {
    /// Some chunk failed, so the counts are lower bounds.
    pub fn is_approximate(&self) -> bool {
        !self.execution.failed_chunks.is_empty()
    }

    pub fn has_differences(&self) -> bool {
        self.only_left > 0 || self.only_right > 0 || self.value_differences > 0
    }

    pub fn entire_column_different(&self, column: &ColumnDifference) -> bool {
        self.matched > 0 && column.differences == self.matched
    }

    pub fn table_pair(&self) -> TablePair {
        TablePair {
            left: self.left_table.clone(),
            right: self.right_table.clone(),
            key: self.key.pairs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ComparisonEngine<'s> {
    store: &'s dyn TableStore,
    options: CompareOptions,
    executor: ChunkedExecutor,
    log: RunLog,
}

impl<'s> ComparisonEngine<'s> {
    pub fn new(store: &'s dyn TableStore, options: CompareOptions, execution: ExecutionOptions, log: &RunLog) -> Self {
        Self {
            store,
            options,
            executor: ChunkedExecutor::new(execution, log),
            log: log.scoped("engine"),
        }
    }

    /// Count matches, orphans and value differences between two tables.
    ///
    /// The key is re-validated on both sides first; duplicates halt the run
    /// before any join is counted.
    pub fn compare(
        &self,
        left: &DatasetHandle,
        right: &DatasetHandle,
        mapping: &ColumnMapping,
        key: &KeySpec,
        value_columns: Option<&[String]>,
    ) -> Result<ComparisonResult, ReconError> {
        let left_rows = self.store.row_count(&left.table)?;
        let right_rows = self.store.row_count(&right.table)?;

        let validator = KeyValidator::new(self.store, &self.log);
        let left_key = validator.require_unique(&left.table, &key.left)?;
        let right_key = validator.require_unique(&right.table, &key.right)?;
        let key = KeySpec {
            requested: key.requested.clone(),
            left: left_key.discovered,
            right: right_key.discovered,
        };
        let pair = TablePair {
            left: left.table.clone(),
            right: right.table.clone(),
            key: key.pairs(),
        };

        let columns = match value_columns {
            Some(requested) if !requested.is_empty() => {
                self.requested_value_columns(&validator, left, right, mapping, &key, requested)?
            }
            _ => default_value_columns(left, right, mapping, &key),
        };

        for (table, cols) in [(&left.table, &key.left), (&right.table, &key.right)] {
            if let Err(e) = self.store.index_keys(table, cols) {
                self.log.warn("index_failed", &[("table", table), ("error", &e)]);
            }
        }

        let chunked = self.executor.should_chunk(left_rows, right_rows);
        let mut execution = if chunked {
            ExecutionReport::chunked(self.executor.options().chunk_size)
        } else {
            ExecutionReport::direct()
        };
        self.log.info(
            "start",
            &[
                ("left", &left.table),
                ("right", &right.table),
                ("left_rows", &left_rows),
                ("right_rows", &right_rows),
                ("mode", &execution.mode),
                ("value_columns", &columns.len()),
            ],
        );

        let rows_for = |side: Side| match side {
            Side::Left => left_rows,
            Side::Right => right_rows,
        };
        let run = |op: CountOp<'_>, execution: &mut ExecutionReport| -> Result<u64, ReconError> {
            if !chunked {
                return count_direct(self.store, &pair, &op);
            }
            let counted = self.executor.count(self.store, &pair, &op, rows_for(op.driving_side()));
            execution.chunks += counted.chunks;
            execution.failed_chunks.extend(counted.failures);
            Ok(counted.total)
        };

        let matched = run(CountOp::Matched, &mut execution)?;
        let only_left = run(CountOp::OnlyLeft, &mut execution)?;
        let only_right = run(CountOp::OnlyRight, &mut execution)?;

        let mut column_differences = Vec::with_capacity(columns.len());
        for column in &columns {
            let op = CountOp::Differing { columns: std::slice::from_ref(column), options: self.options };
            let differences = run(op, &mut execution)?;
            column_differences.push(ColumnDifference { column: column.clone(), differences });
        }
        let value_differences = match column_differences.len() {
            0 => 0,
            1 => column_differences[0].differences,
            _ => run(CountOp::Differing { columns: &columns, options: self.options }, &mut execution)?,
        };

        let metrics = SummaryMetrics::compute(left_rows, right_rows, matched, value_differences);
        let result = ComparisonResult {
            left_table: left.table.clone(),
            right_table: right.table.clone(),
            key,
            value_columns: columns,
            left_rows,
            right_rows,
            matched,
            only_left,
            only_right,
            value_differences,
            column_differences,
            metrics,
            options: self.options,
            execution,
        };

        self.log.info(
            "done",
            &[
                ("matched", &result.matched),
                ("only_left", &result.only_left),
                ("only_right", &result.only_right),
                ("value_differences", &result.value_differences),
                ("match_rate", &result.metrics.match_rate),
                ("failed_chunks", &result.execution.failed_chunks.len()),
            ],
        );
        if result.is_approximate() {
            self.log.warn("approximate", &[("failed_chunks", &result.execution.failed_chunks.len())]);
        }
        Ok(result)
    }

    fn requested_value_columns(
        &self,
        validator: &KeyValidator<'_>,
        left: &DatasetHandle,
        right: &DatasetHandle,
        mapping: &ColumnMapping,
        key: &KeySpec,
        requested: &[String],
    ) -> Result<Vec<ColumnPair>, ReconError> {
        let mut out: Vec<ColumnPair> = Vec::with_capacity(requested.len());
        for name in requested {
            let staged = validator.discover_staged_column(&left.table, name)?;
            if key.contains_left(&staged) {
                self.log.debug("skip_key_column", &[("column", &staged)]);
                continue;
            }
            if out.iter().any(|p| p.left == staged) {
                continue;
            }
            let counterpart = mapping.counterpart(&staged);
            if !right.has_column(counterpart) {
                return Err(ReconError::ColumnNotFound {
                    table: right.table.clone(),
                    column: counterpart.to_string(),
                    available: right.columns.clone(),
                });
            }
            let counterpart = counterpart.to_string();
            out.push(ColumnPair::new(staged, counterpart));
        }
        Ok(out)
    }
}

/// Every non-key, non-excluded left column whose counterpart exists on the
/// right and is not claimed by another left column.
fn default_value_columns(
    left: &DatasetHandle,
    right: &DatasetHandle,
    mapping: &ColumnMapping,
    key: &KeySpec,
) -> Vec<ColumnPair> {
    left.columns
        .iter()
        .filter(|c| !key.contains_left(c) && !left.is_excluded(c))
        .filter_map(|c| {
            let counterpart = mapping.counterpart(c);
            let claimed_elsewhere = mapping.left_for(counterpart).is_some_and(|l| l != c);
            let usable = right.has_column(counterpart)
                && !right.is_excluded(counterpart)
                && !key.right.iter().any(|k| k == counterpart)
                && !claimed_elsewhere;
            usable.then(|| ColumnPair::new(c.clone(), counterpart))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingEntry, Provenance};
    use crate::store::SqliteStore;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn rows(v: &[&[&str]]) -> Vec<Vec<String>> {
        v.iter().map(|r| strings(r)).collect()
    }

    fn fixture() -> (SqliteStore, DatasetHandle, DatasetHandle, ColumnMapping) {
        let store = SqliteStore::open_in_memory().unwrap();
        let left = store
            .stage_table(
                "left",
                &strings(&["id", "amount", "status"]),
                rows(&[&["1", "100", "open"], &["2", "200", "OPEN"], &["3", "300", "closed"], &["5", "500", "open"]]),
            )
            .unwrap();
        let right = store
            .stage_table(
                "right",
                &strings(&["ID", "Total", "Status"]),
                rows(&[&["1", "$100.00", "open"], &["2", "$200.00", " open "], &["3", "$350.00", "open"], &["6", "$1.00", "x"]]),
            )
            .unwrap();
        let mut builder = ColumnMapping::builder();
        builder.propose(MappingEntry::new("id", "id", 1.0, Provenance::Exact).key());
        builder.propose(MappingEntry::new("total", "amount", 1.0, Provenance::Explicit));
        (store, left, right, builder.build().unwrap())
    }

    fn key() -> KeySpec {
        KeySpec { requested: strings(&["id"]), left: strings(&["id"]), right: strings(&["id"]) }
    }

    fn engine(store: &SqliteStore, execution: ExecutionOptions) -> ComparisonEngine<'_> {
        ComparisonEngine::new(store, CompareOptions::default(), execution, &RunLog::new("t"))
    }

    #[test]
    fn direct_comparison_counts() {
        let (store, left, right, mapping) = fixture();
        let result = engine(&store, ExecutionOptions::default()).compare(&left, &right, &mapping, &key(), None).unwrap();

        assert_eq!((result.left_rows, result.right_rows), (4, 4));
        assert_eq!(result.matched, 3);
        assert_eq!(result.only_left, 1);
        assert_eq!(result.only_right, 1);
        assert_eq!(
            result.value_columns,
            vec![ColumnPair::new("amount", "total"), ColumnPair::new("status", "status")]
        );
        assert_eq!(result.column_differences[0].differences, 1);
        assert_eq!(result.column_differences[1].differences, 1);
        // id=3 differs in both columns, counted once.
        assert_eq!(result.value_differences, 1);
        assert_eq!(result.execution.mode, ExecutionMode::Direct);
        assert!(!result.is_approximate());
        assert!(result.has_differences());
    }

    #[test]
    fn metrics_are_rounded_percentages() {
        let m = SummaryMetrics::compute(5, 5, 4, 1);
        assert_eq!(m.match_rate, 66.67);
        assert_eq!(m.left_coverage, 80.0);
        assert_eq!(m.difference_rate, 25.0);
        assert_eq!(SummaryMetrics::compute(0, 0, 0, 0), SummaryMetrics::default());
    }

    #[test]
    fn chunked_matches_direct() {
        let (store, left, right, mapping) = fixture();
        let direct = engine(&store, ExecutionOptions::default()).compare(&left, &right, &mapping, &key(), None).unwrap();
        let small = ExecutionOptions { chunk_threshold: 2, chunk_size: 3, progress_every: 1 };
        let chunked = engine(&store, small).compare(&left, &right, &mapping, &key(), None).unwrap();

        assert_eq!(chunked.execution.mode, ExecutionMode::Chunked);
        assert!(chunked.execution.chunks > 0);
        assert_eq!(
            (chunked.matched, chunked.only_left, chunked.only_right, chunked.value_differences),
            (direct.matched, direct.only_left, direct.only_right, direct.value_differences)
        );
        assert_eq!(chunked.column_differences, direct.column_differences);
    }

    #[test]
    fn duplicate_key_halts() {
        let (store, _, right, mapping) = fixture();
        let dup = store
            .stage_table("dup", &strings(&["id", "amount"]), rows(&[&["1", "1"], &["1", "2"]]))
            .unwrap();
        let err = engine(&store, ExecutionOptions::default())
            .compare(&dup, &right, &mapping, &key(), None)
            .unwrap_err();
        assert!(matches!(err, ReconError::DuplicateKeys { ref table, duplicate_count: 1, .. } if table == "dup"));
    }

    #[test]
    fn explicit_value_columns() {
        let (store, left, right, mapping) = fixture();
        let e = engine(&store, ExecutionOptions::default());
        let requested = strings(&["Amount", "id"]);
        let result = e.compare(&left, &right, &mapping, &key(), Some(&requested)).unwrap();
        assert_eq!(result.value_columns, vec![ColumnPair::new("amount", "total")]);
        assert_eq!(result.value_differences, 1);

        let missing = strings(&["nope"]);
        assert!(matches!(
            e.compare(&left, &right, &mapping, &key(), Some(&missing)),
            Err(ReconError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn exclusions_drop_default_columns() {
        let (store, left, right, mapping) = fixture();
        let left = left.with_exclusions(["Status"]);
        let result = engine(&store, ExecutionOptions::default()).compare(&left, &right, &mapping, &key(), None).unwrap();
        assert_eq!(result.value_columns, vec![ColumnPair::new("amount", "total")]);
    }

    #[test]
    fn entire_column_flag() {
        let (store, left, right, mapping) = fixture();
        let strict = CompareOptions { tolerance: 0.0, ignore_case: false, ignore_spaces: false };
        let result = ComparisonEngine::new(&store, strict, ExecutionOptions::default(), &RunLog::new("t"))
            .compare(&left, &right, &mapping, &key(), None)
            .unwrap();
        let status = &result.column_differences[1];
        // OPEN vs " open " and closed vs open; open vs open matches.
        assert_eq!(status.differences, 2);
        assert!(!result.entire_column_different(status));
    }
}
