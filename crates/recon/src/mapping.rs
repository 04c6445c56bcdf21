//! Right → left column correspondence.
//!
//! A [`ColumnMapping`] is only ever produced by [`ColumnMappingBuilder`],
//! which arbitrates every proposal as it arrives and refuses to let one left
//! column be the target of two right columns. [`ColumnMappingResolver`] feeds
//! the builder from explicit configuration or from fuzzy name scoring.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cascade::{parse_bool, parse_instant, parse_number};
use crate::error::{ReconError, StoreError};
use crate::normalize::{normalize, squash};
use crate::runlog::RunLog;
use crate::store::{DatasetHandle, TableStore};

/// Minimum fuzzy score for a candidate to be kept.
pub const FUZZY_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// From the dataset's `column_map`.
    Explicit,
    /// Identical canonical names.
    Exact,
    /// Scored name/type similarity.
    Fuzzy,
    /// Pinned by key selection or a caller decision.
    Manual,
}

impl Provenance {
    fn user_given(&self) -> bool {
        matches!(self, Self::Explicit | Self::Manual)
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Exact => write!(f, "exact"),
            Self::Fuzzy => write!(f, "fuzzy"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingEntry {
    pub right: String,
    pub left: String,
    pub confidence: f64,
    pub provenance: Provenance,
    pub is_key: bool,
}

impl MappingEntry {
    pub fn new(right: impl Into<String>, left: impl Into<String>, confidence: f64, provenance: Provenance) -> Self {
        Self {
            right: right.into(),
            left: left.into(),
            confidence: confidence.clamp(0.0, 1.0),
            provenance,
            is_key: false,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Key priority is absolute; otherwise strictly higher confidence wins.
    fn outranks(&self, existing: &MappingEntry) -> bool {
        match (self.is_key, existing.is_key) {
            (true, false) => true,
            (false, true) => false,
            _ => self.confidence > existing.confidence,
        }
    }
}

// ---------------------------------------------------------------------------
// Mapping value object
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnMapping {
    entries: Vec<MappingEntry>,
    /// Proposals that lost arbitration, kept for diagnostics.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rejected: Vec<MappingEntry>,
}

impl ColumnMapping {
    pub fn builder() -> ColumnMappingBuilder {
        ColumnMappingBuilder::default()
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn rejected(&self) -> &[MappingEntry] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_for_right(&self, right: &str) -> Option<&MappingEntry> {
        self.entries.iter().find(|e| e.right == right)
    }

    pub fn left_for(&self, right: &str) -> Option<&str> {
        self.entry_for_right(right).map(|e| e.left.as_str())
    }

    pub fn right_for(&self, left: &str) -> Option<&str> {
        self.entries.iter().find(|e| e.left == left).map(|e| e.right.as_str())
    }

    /// Right column a left column compares against. Unmapped columns pair
    /// with the identically named right column.
    pub fn counterpart<'a>(&'a self, left: &'a str) -> &'a str {
        self.right_for(left).unwrap_or(left)
    }

    /// New mapping with `left ↔ right` present and protected as a key.
    ///
    /// A non-key entry holding `right` is evicted, as is any other non-key
    /// entry targeting `left`.
    pub fn pin_key(&self, left: &str, right: &str) -> Result<ColumnMapping, ReconError> {
        let mut builder = ColumnMappingBuilder::default();
        for entry in &self.entries {
            if entry.left == left && entry.right != right && !entry.is_key {
                builder.rejected.push(entry.clone());
                continue;
            }
            builder.propose(entry.clone());
        }
        builder.propose(MappingEntry::new(right, left, 1.0, Provenance::Manual).key());
        let mut mapping = builder.build()?;
        let mut rejected = self.rejected.clone();
        rejected.append(&mut mapping.rejected);
        mapping.rejected = rejected;
        Ok(mapping)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// What happened to a proposal.
#[derive(Debug, Clone, PartialEq)]
pub enum Arbitration {
    Inserted,
    /// The proposal displaced this entry.
    Replaced(MappingEntry),
    /// The existing entry for the right column stood.
    Rejected,
}

#[derive(Debug, Default)]
pub struct ColumnMappingBuilder {
    entries: Vec<MappingEntry>,
    rejected: Vec<MappingEntry>,
}

impl ColumnMappingBuilder {
    /// Offer an entry. A right column already targeted is arbitrated:
    /// key beats non-key, then higher confidence, and ties keep the first.
    pub fn propose(&mut self, entry: MappingEntry) -> Arbitration {
        match self.entries.iter().position(|e| e.right == entry.right) {
            None => {
                self.entries.push(entry);
                Arbitration::Inserted
            }
            Some(idx) if entry.outranks(&self.entries[idx]) => {
                let previous = std::mem::replace(&mut self.entries[idx], entry);
                self.rejected.push(previous.clone());
                Arbitration::Replaced(previous)
            }
            Some(_) => {
                self.rejected.push(entry);
                Arbitration::Rejected
            }
        }
    }

    pub fn rejected(&self) -> &[MappingEntry] {
        &self.rejected
    }

    /// Finish the mapping.
    ///
    /// Two user-given entries (explicit or manual) targeting the same left
    /// column are a configuration conflict. Otherwise the same arbitration as
    /// [`propose`](Self::propose) picks one.
    pub fn build(mut self) -> Result<ColumnMapping, ReconError> {
        let mut kept: Vec<MappingEntry> = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            match kept.iter().position(|k| k.left == entry.left) {
                None => kept.push(entry),
                Some(idx) => {
                    let existing = &kept[idx];
                    if existing.provenance.user_given() && entry.provenance.user_given() && existing.is_key == entry.is_key {
                        return Err(ReconError::MappingConflict {
                            left: entry.left.clone(),
                            first: existing.right.clone(),
                            second: entry.right.clone(),
                        });
                    }
                    if entry.outranks(existing) {
                        let previous = std::mem::replace(&mut kept[idx], entry);
                        self.rejected.push(previous);
                    } else {
                        self.rejected.push(entry);
                    }
                }
            }
        }
        Ok(ColumnMapping {
            entries: kept,
            rejected: self.rejected,
        })
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Coarse column type inferred from sample values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dtype {
    Numeric,
    Temporal,
    Boolean,
    Text,
    Empty,
}

impl Dtype {
    pub fn infer(samples: &[String]) -> Self {
        let values: Vec<&str> = samples.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
        if values.is_empty() {
            return Self::Empty;
        }
        if values.iter().all(|v| parse_number(v).is_some()) {
            Self::Numeric
        } else if values.iter().all(|v| parse_instant(v).is_some()) {
            Self::Temporal
        } else if values.iter().all(|v| parse_bool(v).is_some()) {
            Self::Boolean
        } else {
            Self::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub column: String,
    pub dtype: Dtype,
    pub samples: Vec<String>,
}

/// Per-column samples of one staged table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableProfile {
    pub columns: Vec<ColumnProfile>,
}

impl TableProfile {
    pub fn collect(store: &dyn TableStore, table: &DatasetHandle, sample_size: usize) -> Result<Self, StoreError> {
        let mut columns = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let samples = store.sample_values(&table.table, column, sample_size)?;
            columns.push(ColumnProfile {
                column: column.clone(),
                dtype: Dtype::infer(&samples),
                samples,
            });
        }
        Ok(Self { columns })
    }

    pub fn dtype(&self, column: &str) -> Option<Dtype> {
        self.columns.iter().find(|c| c.column == column).map(|c| c.dtype)
    }
}

// ---------------------------------------------------------------------------
// Fuzzy scoring
// ---------------------------------------------------------------------------

/// Squashed left name → squashed right names that mean the same thing.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("from", &["author"]),
    ("fromemail", &["authoremail"]),
    ("emailaddress", &["authoremail", "recipientemail"]),
    ("hasattachments", &["isattachmentincluded"]),
    ("internalid", &["messageid", "transactionid"]),
    ("isincoming", &["incoming"]),
    ("modificationdate", &["lastmodifieddate"]),
    ("datecreated", &["messagedate", "createdat"]),
    ("subject", &["emailsubject"]),
    ("recipient", &["recipientemail", "emailaddress"]),
];

fn synonyms(a: &str, b: &str) -> bool {
    SYNONYMS.iter().any(|(name, others)| {
        (*name == a && others.contains(&b)) || (*name == b && others.contains(&a))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ExactName,
    PartialName,
    DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub left: String,
    pub right: String,
    pub score: f64,
    pub reason: MatchReason,
}

/// Score how likely `left` and `right` name the same column. Returns `None`
/// at or below [`FUZZY_THRESHOLD`].
pub fn score_pair(left: &str, right: &str, left_type: Option<Dtype>, right_type: Option<Dtype>) -> Option<Candidate> {
    let ls = squash(left);
    let rs = squash(right);
    let ll = left.to_lowercase();
    let rl = right.to_lowercase();

    let mut score: f64 = if ls == rs {
        0.95
    } else if ll == rl {
        0.9
    } else if !ls.is_empty() && !rs.is_empty() && (ls.contains(&rs) || rs.contains(&ls)) {
        0.8
    } else if ll.contains(&rl) || rl.contains(&ll) {
        0.7
    } else {
        0.0
    };

    if synonyms(&ls, &rs) {
        score += 0.85;
    }
    if let (Some(a), Some(b)) = (left_type, right_type) {
        if a == b && a != Dtype::Empty {
            score += 0.2;
        }
    }
    let score = score.min(1.0);
    if score <= FUZZY_THRESHOLD {
        return None;
    }

    let reason = if score >= 0.9 {
        MatchReason::ExactName
    } else if score >= 0.7 {
        MatchReason::PartialName
    } else {
        MatchReason::DataType
    };
    Some(Candidate {
        left: left.to_string(),
        right: right.to_string(),
        score,
        reason,
    })
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct MappingRequest<'a> {
    pub left: &'a DatasetHandle,
    pub right: &'a DatasetHandle,
    /// Right → left, any casing.
    pub explicit: Option<&'a BTreeMap<String, String>>,
    /// Sample-based profiles for the type bonus.
    pub profiles: Option<(&'a TableProfile, &'a TableProfile)>,
    /// Left key columns (canonical). Their mappings win every conflict.
    pub key_columns: &'a [String],
}

pub struct ColumnMappingResolver {
    log: RunLog,
}

impl ColumnMappingResolver {
    pub fn new(log: &RunLog) -> Self {
        Self { log: log.scoped("mapping") }
    }

    pub fn resolve(&self, request: &MappingRequest<'_>) -> Result<ColumnMapping, ReconError> {
        let keys: Vec<String> = request.key_columns.iter().map(|k| normalize(k)).collect();
        let mut builder = ColumnMapping::builder();

        match request.explicit {
            Some(explicit) if !explicit.is_empty() => {
                for (raw_right, raw_left) in explicit {
                    let right = normalize(raw_right);
                    let left = normalize(raw_left);
                    require_column(request.right, &right, raw_right)?;
                    require_column(request.left, &left, raw_left)?;
                    let mut entry = MappingEntry::new(right, left, 1.0, Provenance::Explicit);
                    if keys.contains(&entry.left) {
                        entry = entry.key();
                    }
                    self.offer(&mut builder, entry);
                }
            }
            _ => {
                for candidate in self.candidates(request) {
                    let provenance = if candidate.left == candidate.right {
                        Provenance::Exact
                    } else {
                        Provenance::Fuzzy
                    };
                    let mut entry = MappingEntry::new(candidate.right, candidate.left, candidate.score, provenance);
                    if keys.contains(&entry.left) {
                        entry = entry.key();
                    }
                    self.offer(&mut builder, entry);
                }
            }
        }

        let mapping = builder.build()?;
        let shared_names = request.left.columns.iter().any(|c| request.right.has_column(c));
        if mapping.is_empty() && !shared_names {
            return Err(ReconError::NoMatchableColumns {
                left: request.left.table.clone(),
                right: request.right.table.clone(),
            });
        }

        self.log.info(
            "resolved",
            &[
                ("left", &request.left.table),
                ("right", &request.right.table),
                ("entries", &mapping.len()),
                ("rejected", &mapping.rejected().len()),
            ],
        );
        Ok(mapping)
    }

    /// Best right candidate per left column, in left column order.
    pub fn candidates(&self, request: &MappingRequest<'_>) -> Vec<Candidate> {
        let mut out = Vec::new();
        for left in &request.left.columns {
            let left_type = request.profiles.and_then(|(l, _)| l.dtype(left));
            let mut best: Option<Candidate> = None;
            for right in &request.right.columns {
                let right_type = request.profiles.and_then(|(_, r)| r.dtype(right));
                if let Some(c) = score_pair(left, right, left_type, right_type) {
                    if best.as_ref().map_or(true, |b| c.score > b.score) {
                        best = Some(c);
                    }
                }
            }
            if let Some(c) = best {
                out.push(c);
            }
        }
        out
    }

    fn offer(&self, builder: &mut ColumnMappingBuilder, entry: MappingEntry) {
        let right = entry.right.clone();
        let left = entry.left.clone();
        match builder.propose(entry) {
            Arbitration::Inserted => {}
            Arbitration::Replaced(previous) => self.log.debug(
                "conflict",
                &[("right", &right), ("winner", &left), ("loser", &previous.left)],
            ),
            Arbitration::Rejected => self.log.debug(
                "conflict",
                &[("right", &right), ("loser", &left)],
            ),
        }
    }
}

fn require_column(table: &DatasetHandle, canonical: &str, raw: &str) -> Result<(), ReconError> {
    if table.has_column(canonical) {
        return Ok(());
    }
    Err(ReconError::ColumnNotFound {
        table: table.table.clone(),
        column: raw.to_string(),
        available: table.columns.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(table: &str, columns: &[&str]) -> DatasetHandle {
        DatasetHandle {
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            row_count: 0,
            excluded: Vec::new(),
        }
    }

    fn resolver() -> ColumnMappingResolver {
        ColumnMappingResolver::new(&RunLog::new("test"))
    }

    #[test]
    fn key_beats_higher_confidence_non_key() {
        let mut b = ColumnMapping::builder();
        b.propose(MappingEntry::new("r", "x", 0.99, Provenance::Fuzzy));
        let outcome = b.propose(MappingEntry::new("r", "k", 0.4, Provenance::Fuzzy).key());
        assert!(matches!(outcome, Arbitration::Replaced(ref e) if e.left == "x"));
        // A later non-key proposal cannot take it back.
        assert_eq!(b.propose(MappingEntry::new("r", "y", 1.0, Provenance::Exact)), Arbitration::Rejected);
        let m = b.build().unwrap();
        assert_eq!(m.left_for("r"), Some("k"));
        assert_eq!(m.rejected().len(), 2);
    }

    #[test]
    fn ties_keep_existing() {
        let mut b = ColumnMapping::builder();
        b.propose(MappingEntry::new("r", "a", 0.8, Provenance::Fuzzy));
        assert_eq!(b.propose(MappingEntry::new("r", "b", 0.8, Provenance::Fuzzy)), Arbitration::Rejected);
        let mut b2 = ColumnMapping::builder();
        b2.propose(MappingEntry::new("r", "a", 0.8, Provenance::Fuzzy).key());
        assert_eq!(b2.propose(MappingEntry::new("r", "b", 0.8, Provenance::Fuzzy).key()), Arbitration::Rejected);
        assert!(matches!(
            b2.propose(MappingEntry::new("r", "c", 0.9, Provenance::Fuzzy).key()),
            Arbitration::Replaced(_)
        ));
    }

    #[test]
    fn explicit_double_target_rejected_at_build() {
        let mut b = ColumnMapping::builder();
        b.propose(MappingEntry::new("total", "amount", 1.0, Provenance::Explicit));
        b.propose(MappingEntry::new("sum", "amount", 1.0, Provenance::Explicit));
        let err = b.build().unwrap_err();
        assert!(matches!(err, ReconError::MappingConflict { ref left, .. } if left == "amount"));
    }

    #[test]
    fn fuzzy_double_target_arbitrated_at_build() {
        let mut b = ColumnMapping::builder();
        b.propose(MappingEntry::new("amt", "amount", 0.8, Provenance::Fuzzy));
        b.propose(MappingEntry::new("amount", "amount", 0.95, Provenance::Exact));
        let m = b.build().unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.right_for("amount"), Some("amount"));
    }

    #[test]
    fn counterpart_falls_back_to_identity() {
        let mut b = ColumnMapping::builder();
        b.propose(MappingEntry::new("total", "amount", 1.0, Provenance::Explicit));
        let m = b.build().unwrap();
        assert_eq!(m.counterpart("amount"), "total");
        assert_eq!(m.counterpart("name"), "name");
    }

    #[test]
    fn pin_key_evicts_non_key_holder() {
        let mut b = ColumnMapping::builder();
        b.propose(MappingEntry::new("ref", "memo", 0.9, Provenance::Fuzzy));
        b.propose(MappingEntry::new("order_ref", "id", 0.7, Provenance::Fuzzy));
        let m = b.build().unwrap().pin_key("id", "ref").unwrap();
        let entry = m.entry_for_right("ref").unwrap();
        assert_eq!(entry.left, "id");
        assert!(entry.is_key);
        assert_eq!(entry.provenance, Provenance::Manual);
        assert_eq!(m.right_for("memo"), None);
        assert_eq!(m.left_for("order_ref"), None);
    }

    #[test]
    fn scoring_table() {
        let exact = score_pair("created_at", "createdat", None, None).unwrap();
        assert_eq!(exact.score, 0.95);
        assert_eq!(exact.reason, MatchReason::ExactName);

        let partial = score_pair("customer_name", "name", None, None).unwrap();
        assert_eq!(partial.score, 0.8);
        assert_eq!(partial.reason, MatchReason::PartialName);

        let synonym = score_pair("from", "author", None, None).unwrap();
        assert!((synonym.score - 0.85).abs() < 1e-9);

        let capped = score_pair("amount", "amount", Some(Dtype::Numeric), Some(Dtype::Numeric)).unwrap();
        assert_eq!(capped.score, 1.0);

        assert!(score_pair("amount", "city", Some(Dtype::Text), Some(Dtype::Text)).is_none());
    }

    #[test]
    fn dtype_inference() {
        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        assert_eq!(Dtype::infer(&s(&["$1.00", "2"])), Dtype::Numeric);
        assert_eq!(Dtype::infer(&s(&["2024-01-01", "1/2/2024"])), Dtype::Temporal);
        assert_eq!(Dtype::infer(&s(&["yes", "F"])), Dtype::Boolean);
        assert_eq!(Dtype::infer(&s(&["1", "x"])), Dtype::Text);
        assert_eq!(Dtype::infer(&[]), Dtype::Empty);
    }

    #[test]
    fn key_column_wins_shared_right_column() {
        // Both "k" and "k_id" squash-contain right column "k".
        let left = handle("l", &["k_id", "k"]);
        let right = handle("r", &["kid"]);
        let keys = vec!["k".to_string()];
        let request = MappingRequest {
            left: &left,
            right: &right,
            explicit: None,
            profiles: None,
            key_columns: &keys,
        };
        let m = resolver().resolve(&request).unwrap();
        assert_eq!(m.left_for("kid"), Some("k"));
        assert!(m.entry_for_right("kid").unwrap().is_key);
    }

    #[test]
    fn explicit_mapping_normalizes_and_checks_columns() {
        let left = handle("l", &["id", "amount"]);
        let right = handle("r", &["id", "total"]);
        let mut explicit = BTreeMap::new();
        explicit.insert("Total".to_string(), "AMOUNT".to_string());
        let keys: Vec<String> = Vec::new();
        let request = MappingRequest {
            left: &left,
            right: &right,
            explicit: Some(&explicit),
            profiles: None,
            key_columns: &keys,
        };
        let m = resolver().resolve(&request).unwrap();
        assert_eq!(m.left_for("total"), Some("amount"));
        assert_eq!(m.entries()[0].provenance, Provenance::Explicit);

        let mut with_missing = explicit.clone();
        with_missing.insert("Missing".to_string(), "id".to_string());
        let request = MappingRequest { explicit: Some(&with_missing), ..request };
        let err = resolver().resolve(&request).unwrap_err();
        assert!(matches!(err, ReconError::ColumnNotFound { ref column, .. } if column == "Missing"));
    }

    #[test]
    fn nothing_in_common_is_an_error() {
        let left = handle("l", &["alpha"]);
        let right = handle("r", &["omega"]);
        let keys: Vec<String> = Vec::new();
        let request = MappingRequest {
            left: &left,
            right: &right,
            explicit: None,
            profiles: None,
            key_columns: &keys,
        };
        assert!(matches!(
            resolver().resolve(&request),
            Err(ReconError::NoMatchableColumns { .. })
        ));
    }
}
