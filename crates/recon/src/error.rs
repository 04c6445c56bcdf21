use std::fmt;

/// Failure inside the table store (SQL preparation, execution, staging).
#[derive(Debug, Clone, PartialEq)]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::new(e.to_string())
    }
}

#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (unknown dataset, bad limit, etc.).
    ConfigValidation(String),
    /// Malformed call: empty key list, empty table name.
    InvalidInput(String),
    /// The two tables share no column a key could be chosen from.
    NoCommonColumns { left: String, right: String },
    /// Key selection ended without an accepted key.
    KeySelectionCancelled { last_rejection: Option<String> },
    /// Key is not unique on a table. Halts the run.
    DuplicateKeys {
        table: String,
        key: Vec<String>,
        duplicate_count: u64,
        examples: Vec<String>,
    },
    /// Requested column does not exist in the staged schema.
    ColumnNotFound {
        table: String,
        column: String,
        available: Vec<String>,
    },
    /// Neither configuration nor name matching produced a single column pair.
    NoMatchableColumns { left: String, right: String },
    /// Two explicit mapping entries target the same left column.
    MappingConflict {
        left: String,
        first: String,
        second: String,
    },
    /// Table store failure outside a chunked run.
    Store(String),
    /// Report writing or archiving failed.
    Export(String),
    /// IO error (file read, etc.).
    Io(String),
}

impl ReconError {
    /// Bracketed label shown to users.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigParse(_) | Self::ConfigValidation(_) => "CONFIG ERROR",
            Self::InvalidInput(_) => "INVALID INPUT",
            Self::NoCommonColumns { .. } | Self::KeySelectionCancelled { .. } => {
                "KEY SELECTION ERROR"
            }
            Self::DuplicateKeys { .. } => "KEY VALIDATION ERROR",
            Self::ColumnNotFound { .. } => "COLUMN NOT FOUND",
            Self::NoMatchableColumns { .. } | Self::MappingConflict { .. } => "MAPPING ERROR",
            Self::Store(_) => "STORE ERROR",
            Self::Export(_) => "EXPORT ERROR",
            Self::Io(_) => "IO ERROR",
        }
    }

    /// Actionable remedy for the user.
    pub fn suggestion(&self) -> String {
        match self {
            Self::ConfigParse(_) => {
                "check the TOML syntax and field names against the documented layout".into()
            }
            Self::ConfigValidation(_) => "fix the named field in the config file".into(),
            Self::InvalidInput(_) => "pass a table name and at least one key column".into(),
            Self::NoCommonColumns { .. } => {
                "add a column_map entry so the key column exists on both sides".into()
            }
            Self::KeySelectionCancelled { .. } => {
                "choose a key column that is unique in both tables, or a composite key".into()
            }
            Self::DuplicateKeys { key, .. } => format!(
                "deduplicate the data or use a composite key that includes '{}' plus another column",
                key.join(", ")
            ),
            Self::ColumnNotFound { available, .. } => {
                format!("use one of the available columns: {}", available.join(", "))
            }
            Self::NoMatchableColumns { .. } => {
                "provide an explicit column_map for the right dataset".into()
            }
            Self::MappingConflict { .. } => {
                "map each right column to a distinct left column".into()
            }
            Self::Store(_) => "check that the input files are well-formed and retry".into(),
            Self::Export(_) => "check that the output directory is writable and has free space".into(),
            Self::Io(_) => "check the path and file permissions".into(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::ConfigParse(msg) => format!("config parse error: {msg}"),
            Self::ConfigValidation(msg) => format!("config validation error: {msg}"),
            Self::InvalidInput(msg) => msg.clone(),
            Self::NoCommonColumns { left, right } => {
                format!("tables '{left}' and '{right}' have no common columns")
            }
            Self::KeySelectionCancelled { last_rejection: None } => {
                "key selection cancelled".into()
            }
            Self::KeySelectionCancelled { last_rejection: Some(reason) } => {
                format!("key selection cancelled after rejection: {reason}")
            }
            Self::DuplicateKeys { table, key, duplicate_count, examples } => {
                let mut msg = format!(
                    "key '{}' is not unique in table '{table}': {duplicate_count} duplicate row(s)",
                    key.join(", ")
                );
                if !examples.is_empty() {
                    msg.push_str(&format!(" (e.g. {})", examples.join("; ")));
                }
                msg
            }
            Self::ColumnNotFound { table, column, .. } => {
                format!("column '{column}' not found in table '{table}'")
            }
            Self::NoMatchableColumns { left, right } => {
                format!("no matchable columns between '{left}' and '{right}'")
            }
            Self::MappingConflict { left, first, second } => format!(
                "right columns '{first}' and '{second}' both map to left column '{left}'"
            ),
            Self::Store(msg) => format!("table store error: {msg}"),
            Self::Export(msg) => format!("export error: {msg}"),
            Self::Io(msg) => format!("IO error: {msg}"),
        }
    }
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Suggestion: {}",
            self.kind(),
            self.description(),
            self.suggestion()
        )
    }
}

impl std::error::Error for ReconError {}

impl From<StoreError> for ReconError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.message)
    }
}

impl From<std::io::Error> for ReconError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_kind_and_suggestion() {
        let err = ReconError::DuplicateKeys {
            table: "left".into(),
            key: vec!["id".into()],
            duplicate_count: 2,
            examples: vec!["id=7 (x3)".into()],
        };
        let text = err.to_string();
        assert!(text.starts_with("[KEY VALIDATION ERROR] key 'id' is not unique in table 'left'"));
        assert!(text.contains("2 duplicate row(s)"));
        assert!(text.contains("id=7 (x3)"));
        assert!(text.contains(". Suggestion: deduplicate"));
    }

    #[test]
    fn column_not_found_lists_available() {
        let err = ReconError::ColumnNotFound {
            table: "right".into(),
            column: "cust".into(),
            available: vec!["id".into(), "customer".into()],
        };
        assert_eq!(
            err.to_string(),
            "[COLUMN NOT FOUND] column 'cust' not found in table 'right'. \
             Suggestion: use one of the available columns: id, customer"
        );
    }

    #[test]
    fn store_error_converts() {
        let err: ReconError = StoreError::new("no such table: t").into();
        assert_eq!(err.kind(), "STORE ERROR");
    }
}
