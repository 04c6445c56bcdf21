//! Key discovery and uniqueness validation.

use serde::Serialize;

use crate::error::ReconError;
use crate::normalize::normalize;
use crate::runlog::RunLog;
use crate::store::{ColumnPair, DuplicateExample, TableStore};

/// Duplicated key values attached to a failed validation.
pub const DUPLICATE_EXAMPLE_LIMIT: usize = 10;

/// Join key after validation.
///
/// `requested` is what the user or chooser asked for. `left` and `right` are
/// the names found in each staged schema and are the only names used in
/// queries from then on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySpec {
    pub requested: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
}

impl KeySpec {
    pub fn pairs(&self) -> Vec<ColumnPair> {
        self.left
            .iter()
            .zip(&self.right)
            .map(|(l, r)| ColumnPair::new(l.clone(), r.clone()))
            .collect()
    }

    pub fn is_composite(&self) -> bool {
        self.left.len() > 1
    }

    pub fn contains_left(&self, column: &str) -> bool {
        self.left.iter().any(|k| k == column)
    }

    pub fn label(&self) -> String {
        self.left.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValidation {
    pub table: String,
    pub requested: Vec<String>,
    pub discovered: Vec<String>,
    pub is_valid: bool,
    /// Rows with a complete (non-null) key. A valid key has
    /// `unique_values == total_rows`.
    pub total_rows: u64,
    /// Every row in the table, null keys included.
    pub table_rows: u64,
    pub unique_values: u64,
    /// Rows beyond the first for every repeated key value.
    pub duplicate_count: u64,
    /// Key values that repeat.
    pub duplicate_groups: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<DuplicateExample>,
}

impl KeyValidation {
    pub fn example_descriptions(&self) -> Vec<String> {
        self.examples.iter().map(|e| e.describe(&self.discovered)).collect()
    }

    fn into_error(self) -> ReconError {
        let examples = self.example_descriptions();
        ReconError::DuplicateKeys {
            table: self.table,
            key: self.discovered,
            duplicate_count: self.duplicate_count,
            examples,
        }
    }
}

pub struct KeyValidator<'s> {
    store: &'s dyn TableStore,
    log: RunLog,
}

impl<'s> KeyValidator<'s> {
    pub fn new(store: &'s dyn TableStore, log: &RunLog) -> Self {
        Self { store, log: log.scoped("key_validator") }
    }

    /// Find the staged column a requested name refers to.
    ///
    /// Tries the name as given, then its canonical form, then any staged
    /// column whose canonical form matches.
    pub fn discover_staged_column(&self, table: &str, requested: &str) -> Result<String, ReconError> {
        if table.trim().is_empty() {
            return Err(ReconError::InvalidInput("table name is empty".into()));
        }
        if requested.trim().is_empty() {
            return Err(ReconError::InvalidInput(format!("empty column name for table '{table}'")));
        }
        let columns = self.store.columns(table)?;

        if columns.iter().any(|c| c == requested) {
            return Ok(requested.to_string());
        }
        let canonical = normalize(requested);
        if columns.iter().any(|c| *c == canonical) {
            return Ok(canonical);
        }
        if let Some(found) = columns.iter().find(|c| normalize(c) == canonical) {
            return Ok(found.clone());
        }
        Err(ReconError::ColumnNotFound {
            table: table.to_string(),
            column: requested.to_string(),
            available: columns,
        })
    }

    /// Check that `key_columns` identify rows uniquely in `table`.
    ///
    /// Duplicates are reported in the result, not as an error.
    pub fn validate_key(&self, table: &str, key_columns: &[String]) -> Result<KeyValidation, ReconError> {
        if key_columns.is_empty() {
            return Err(ReconError::InvalidInput(format!("no key columns given for table '{table}'")));
        }
        let discovered = key_columns
            .iter()
            .map(|k| self.discover_staged_column(table, k))
            .collect::<Result<Vec<_>, _>>()?;

        let profile = self.store.key_profile(table, &discovered)?;
        let duplicate_count = profile.duplicate_count();
        let is_valid = profile.duplicate_groups == 0 && duplicate_count == 0;
        let examples = if is_valid {
            Vec::new()
        } else {
            self.store.duplicate_examples(table, &discovered, DUPLICATE_EXAMPLE_LIMIT)?
        };

        let key_label = discovered.join(",");
        if is_valid {
            self.log.info(
                "valid",
                &[
                    ("table", &table),
                    ("key", &key_label),
                    ("rows", &profile.non_null_rows),
                    ("null_keys", &profile.total_rows.saturating_sub(profile.non_null_rows)),
                ],
            );
        } else {
            self.log.warn(
                "duplicates",
                &[
                    ("table", &table),
                    ("key", &key_label),
                    ("duplicate_count", &duplicate_count),
                    ("groups", &profile.duplicate_groups),
                ],
            );
        }

        Ok(KeyValidation {
            table: table.to_string(),
            requested: key_columns.to_vec(),
            discovered,
            is_valid,
            total_rows: profile.non_null_rows,
            table_rows: profile.total_rows,
            unique_values: profile.unique_values,
            duplicate_count,
            duplicate_groups: profile.duplicate_groups,
            examples,
        })
    }

    /// [`validate_key`](Self::validate_key), with duplicates escalated to
    /// [`ReconError::DuplicateKeys`].
    pub fn require_unique(&self, table: &str, key_columns: &[String]) -> Result<KeyValidation, ReconError> {
        let validation = self.validate_key(table, key_columns)?;
        if validation.is_valid {
            Ok(validation)
        } else {
            Err(validation.into_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .stage_table(
                "orders",
                &strings(&["Order ID", "Region", "Amount"]),
                vec![
                    strings(&["1", "east", "10"]),
                    strings(&["2", "east", "20"]),
                    strings(&["2", "west", "30"]),
                    strings(&["3", "west", "40"]),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn discovers_by_exact_then_normalized_name() {
        let s = store();
        let v = KeyValidator::new(&s, &RunLog::new("t"));
        assert_eq!(v.discover_staged_column("orders", "order_id").unwrap(), "order_id");
        assert_eq!(v.discover_staged_column("orders", "Order ID").unwrap(), "order_id");
        assert_eq!(v.discover_staged_column("orders", " ORDER-ID ").unwrap(), "order_id");
    }

    #[test]
    fn undiscoverable_column_lists_available() {
        let s = store();
        let v = KeyValidator::new(&s, &RunLog::new("t"));
        match v.discover_staged_column("orders", "customer") {
            Err(ReconError::ColumnNotFound { available, .. }) => {
                assert_eq!(available, strings(&["order_id", "region", "amount"]));
            }
            other => panic!("expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn malformed_input_fails_fast() {
        let s = store();
        let v = KeyValidator::new(&s, &RunLog::new("t"));
        assert!(matches!(v.validate_key("orders", &[]), Err(ReconError::InvalidInput(_))));
        assert!(matches!(
            v.discover_staged_column("", "id"),
            Err(ReconError::InvalidInput(_))
        ));
    }

    #[test]
    fn unique_key_is_valid() {
        let s = store();
        let v = KeyValidator::new(&s, &RunLog::new("t"));
        let r = v.validate_key("orders", &strings(&["Amount"])).unwrap();
        assert!(r.is_valid);
        assert_eq!(r.duplicate_count, 0);
        assert_eq!(r.unique_values, r.total_rows);
        assert_eq!(r.discovered, strings(&["amount"]));
    }

    #[test]
    fn null_keys_are_not_counted_as_rows() {
        let s = SqliteStore::open_in_memory().unwrap();
        s.stage_table("t", &strings(&["id"]), vec![strings(&["1"]), strings(&["2"]), strings(&[""])])
            .unwrap();
        let v = KeyValidator::new(&s, &RunLog::new("t"));
        let r = v.validate_key("t", &strings(&["id"])).unwrap();
        assert!(r.is_valid);
        assert_eq!(r.duplicate_count, 0);
        assert_eq!(r.unique_values, 2);
        assert_eq!(r.unique_values, r.total_rows);
        assert_eq!(r.table_rows, 3);
    }

    #[test]
    fn duplicates_reported_not_raised() {
        let s = store();
        let v = KeyValidator::new(&s, &RunLog::new("t"));
        let r = v.validate_key("orders", &strings(&["Order ID"])).unwrap();
        assert!(!r.is_valid);
        assert_eq!(r.duplicate_count, 1);
        assert_eq!(r.example_descriptions(), vec!["order_id=2 (x2)"]);
    }

    #[test]
    fn composite_key_resolves_duplicates() {
        let s = store();
        let v = KeyValidator::new(&s, &RunLog::new("t"));
        let r = v.validate_key("orders", &strings(&["order id", "region"])).unwrap();
        assert!(r.is_valid);
        assert_eq!(r.discovered, strings(&["order_id", "region"]));
    }

    #[test]
    fn require_unique_escalates() {
        let s = store();
        let v = KeyValidator::new(&s, &RunLog::new("t"));
        let err = v.require_unique("orders", &strings(&["order_id"])).unwrap_err();
        match err {
            ReconError::DuplicateKeys { table, key, duplicate_count, examples } => {
                assert_eq!(table, "orders");
                assert_eq!(key, strings(&["order_id"]));
                assert_eq!(duplicate_count, 1);
                assert_eq!(examples.len(), 1);
            }
            other => panic!("expected DuplicateKeys, got {other:?}"),
        }
    }

    #[test]
    fn key_spec_pairs_zip_sides() {
        let spec = KeySpec {
            requested: strings(&["ID"]),
            left: strings(&["id"]),
            right: strings(&["customer_id"]),
        };
        assert_eq!(spec.pairs(), vec![ColumnPair::new("id", "customer_id")]);
        assert!(!spec.is_composite());
    }
}
