//! Query-capable table store.
//!
//! The engine never touches rows directly for counting; it asks the store for
//! counts, joins and projections over named staged tables. [`SqliteStore`] is
//! the in-process implementation.

mod sqlite;

pub use sqlite::SqliteStore;

use serde::Serialize;

use crate::cascade::CompareOptions;
use crate::error::StoreError;

/// A staged table. Column names are canonical and the table is never
/// mutated after staging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetHandle {
    pub table: String,
    pub columns: Vec<String>,
    pub row_count: u64,
    /// Canonical names of columns left out of value comparison.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<String>,
}

impl DatasetHandle {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn is_excluded(&self, column: &str) -> bool {
        self.excluded.iter().any(|c| c == column)
    }

    /// Exclusions are normalized on the way in.
    pub fn with_exclusions<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded = columns
            .into_iter()
            .map(|c| crate::normalize::normalize(c.as_ref()))
            .filter(|c| !c.is_empty())
            .collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// A left column and its right counterpart, both staged names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnPair {
    pub left: String,
    pub right: String,
}

impl ColumnPair {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self { left: left.into(), right: right.into() }
    }
}

/// Two staged tables and the key they join on.
#[derive(Debug, Clone)]
pub struct TablePair {
    pub left: String,
    pub right: String,
    pub key: Vec<ColumnPair>,
}

impl TablePair {
    pub fn table(&self, side: Side) -> &str {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

/// Row window over a driving table, in staging order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

/// Whole-table operations the engine counts.
#[derive(Debug, Clone, Copy)]
pub enum CountOp<'a> {
    Matched,
    OnlyLeft,
    OnlyRight,
    /// Matched rows where any of the listed columns differ.
    Differing {
        columns: &'a [ColumnPair],
        options: CompareOptions,
    },
}

impl CountOp<'_> {
    /// The table whose rows are windowed when the operation is chunked.
    pub fn driving_side(&self) -> Side {
        match self {
            Self::OnlyRight => Side::Right,
            _ => Side::Left,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::OnlyLeft => "only_left",
            Self::OnlyRight => "only_right",
            Self::Differing { .. } => "value_differences",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct KeyProfile {
    pub total_rows: u64,
    /// Rows where every key column is non-null.
    pub non_null_rows: u64,
    /// Distinct non-null key values (tuples for composite keys).
    pub unique_values: u64,
    /// Key values occurring more than once.
    pub duplicate_groups: u64,
}

impl KeyProfile {
    pub fn duplicate_count(&self) -> u64 {
        self.non_null_rows.saturating_sub(self.unique_values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateExample {
    pub values: Vec<String>,
    pub occurrences: u64,
}

impl DuplicateExample {
    pub fn describe(&self, key: &[String]) -> String {
        let parts: Vec<String> = key
            .iter()
            .zip(&self.values)
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{} (x{})", parts.join(", "), self.occurrences)
    }
}

/// One matched row: key values plus (left, right) for each requested column.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRow {
    pub key: Vec<Option<String>>,
    pub values: Vec<(Option<String>, Option<String>)>,
}

/// Rows from one side with no partner on the other.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

pub trait TableStore {
    fn row_count(&self, table: &str) -> Result<u64, StoreError>;

    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// First `limit` non-null values of a column, in staging order.
    fn sample_values(&self, table: &str, column: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    fn key_profile(&self, table: &str, key: &[String]) -> Result<KeyProfile, StoreError>;

    /// Most frequent duplicated key values.
    fn duplicate_examples(
        &self,
        table: &str,
        key: &[String],
        limit: usize,
    ) -> Result<Vec<DuplicateExample>, StoreError>;

    /// Prepare the table for repeated key joins.
    fn index_keys(&self, _table: &str, _key: &[String]) -> Result<(), StoreError> {
        Ok(())
    }

    fn count(&self, pair: &TablePair, op: &CountOp<'_>, window: Option<Window>) -> Result<u64, StoreError>;

    /// Matched rows in left staging order, restricted to a left window.
    fn matched_rows(
        &self,
        pair: &TablePair,
        columns: &[ColumnPair],
        window: Option<Window>,
    ) -> Result<Vec<MatchedRow>, StoreError>;

    /// Unmatched rows of `side`, restricted to a window over that side.
    fn unmatched_rows(&self, pair: &TablePair, side: Side, window: Option<Window>) -> Result<RowSet, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_exclusions_are_normalized() {
        let handle = DatasetHandle {
            table: "left".into(),
            columns: vec!["id".into(), "last_modified".into()],
            row_count: 0,
            excluded: Vec::new(),
        }
        .with_exclusions(["Last Modified", "  "]);
        assert!(handle.is_excluded("last_modified"));
        assert_eq!(handle.excluded.len(), 1);
    }

    #[test]
    fn duplicate_example_description() {
        let ex = DuplicateExample { values: vec!["7".into(), "A".into()], occurrences: 3 };
        assert_eq!(ex.describe(&["id".into(), "region".into()]), "id=7, region=A (x3)");
    }

    #[test]
    fn only_right_drives_from_right() {
        assert_eq!(CountOp::OnlyRight.driving_side(), Side::Right);
        assert_eq!(CountOp::Matched.driving_side(), Side::Left);
    }
}
