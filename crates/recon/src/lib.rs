//! `crossrecon`: two-table reconciliation engine.
//!
//! Works over tables staged in a [`TableStore`]: resolves a column mapping,
//! selects and validates a join key, counts matches and value differences
//! with a typed comparison cascade, and writes tiered reports. File parsing
//! and the command line live in sibling crates.

pub mod cascade;
pub mod chunked;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod mapping;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod runlog;
pub mod selector;
pub mod store;

pub use cascade::{compare_values, values_differ, CompareOptions, DifferenceKind};
pub use config::{DatasetConfig, DatasetKind, ExecutionOptions, OutputFormat, ReconConfig, ReportOptions};
pub use engine::{ComparisonEngine, ComparisonResult, ExecutionMode, SummaryMetrics};
pub use error::{ReconError, StoreError};
pub use keys::{KeySpec, KeyValidation, KeyValidator};
pub use mapping::{ColumnMapping, ColumnMappingResolver, MappingEntry, Provenance};
pub use normalize::normalize;
pub use pipeline::{compare, export_differences, resolve_mapping, select_and_validate_key, Reconciler, RunOutcome};
pub use report::{ArtifactKind, DifferenceRecord, ReportArtifacts, ReportFidelityExporter};
pub use runlog::RunLog;
pub use selector::{AutoKeyChooser, Choice, ConfiguredKeys, KeyChooser, KeySelection, KeySelector};
pub use store::{DatasetHandle, SqliteStore, TableStore};
