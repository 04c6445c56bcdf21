//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Success, tables agree                                    |
//! | 1    | Run completed, differences found                         |
//! | 2    | CLI usage error (bad args)                               |
//! | 3    | Configuration error (unreadable, malformed, invalid)     |
//! | 4    | Key error (selection, uniqueness, column discovery)      |
//! | 5    | Mapping error (no matchable columns, conflicting map)    |
//! | 6    | Runtime error (input files, table store, report export)  |
//! | 7    | Run completed but approximate (a chunk failed)           |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `recon_exit_code` or the command's error handling

use crossrecon::ReconError;

/// Success - command completed, nothing to report.
pub const EXIT_SUCCESS: u8 = 0;

/// Differences found. Like `diff(1)`, exit 1 means "tables differ."
pub const EXIT_DIFFERENCES: u8 = 1;

/// Usage error - bad arguments. clap exits with this itself.
#[allow(dead_code)]
pub const EXIT_USAGE: u8 = 2;

/// Config file missing, malformed or failing validation.
pub const EXIT_CONFIG: u8 = 3;

/// No acceptable key: cancelled selection, duplicates, unknown column.
pub const EXIT_KEY: u8 = 4;

/// Column mapping could not be resolved.
pub const EXIT_MAPPING: u8 = 5;

/// Store, file or export failure.
pub const EXIT_RUNTIME: u8 = 6;

/// Completed, but at least one chunk failed so counts are lower bounds.
/// Takes precedence over EXIT_DIFFERENCES.
pub const EXIT_APPROXIMATE: u8 = 7;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_CONFIG,
        ReconError::NoCommonColumns { .. }
        | ReconError::KeySelectionCancelled { .. }
        | ReconError::DuplicateKeys { .. }
        | ReconError::ColumnNotFound { .. } => EXIT_KEY,
        ReconError::NoMatchableColumns { .. } | ReconError::MappingConflict { .. } => EXIT_MAPPING,
        ReconError::InvalidInput(_)
        | ReconError::Store(_)
        | ReconError::Export(_)
        | ReconError::Io(_) => EXIT_RUNTIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_errors_share_a_code() {
        let dup = ReconError::DuplicateKeys {
            table: "right".into(),
            key: vec!["id".into()],
            duplicate_count: 1,
            examples: vec![],
        };
        let missing = ReconError::ColumnNotFound {
            table: "left".into(),
            column: "x".into(),
            available: vec![],
        };
        assert_eq!(recon_exit_code(&dup), EXIT_KEY);
        assert_eq!(recon_exit_code(&missing), EXIT_KEY);
    }

    #[test]
    fn config_and_runtime_are_distinct() {
        assert_eq!(recon_exit_code(&ReconError::ConfigParse("x".into())), EXIT_CONFIG);
        assert_eq!(recon_exit_code(&ReconError::Export("x".into())), EXIT_RUNTIME);
        assert_ne!(EXIT_CONFIG, EXIT_RUNTIME);
    }
}
