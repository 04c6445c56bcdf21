//! Key selection.
//!
//! [`KeySelector`] walks a small state machine:
//!
//! ```text
//! Discovering -> Presenting -> Validating -> Accepted
//!                    ^              |
//!                    +-- Retrying <-+
//! ```
//!
//! A [`KeyChooser`] makes every decision. It may pick again after a rejection
//! or cancel; the selector never retries on its own.

use serde::Serialize;

use crate::error::ReconError;
use crate::keys::{KeySpec, KeyValidation, KeyValidator};
use crate::mapping::ColumnMapping;
use crate::runlog::RunLog;
use crate::store::{DatasetHandle, Side, TableStore};

/// Substrings that make a column look like an identifier.
const KEY_INDICATORS: &[&str] = &["id", "key", "code", "number"];

/// Upper bound on presentations before the selector gives up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorState {
    Discovering,
    Presenting,
    Validating,
    Retrying,
    Accepted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateRank {
    Configured,
    Identifier,
    Other,
}

/// A left column whose mapped counterpart exists on the right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCandidate {
    pub left: String,
    pub right: String,
    pub rank: CandidateRank,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub key: Vec<String>,
    pub side: Side,
    pub reason: String,
}

/// What a chooser sees on each round.
#[derive(Debug)]
pub struct Presentation<'a> {
    pub candidates: &'a [KeyCandidate],
    /// 1-based.
    pub attempt: usize,
    pub last_rejection: Option<&'a Rejection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Left column names; more than one forms a composite key.
    Keys(Vec<String>),
    Cancel,
}

pub trait KeyChooser {
    fn choose(&mut self, presentation: &Presentation<'_>) -> Choice;
}

/// Offers one fixed key once. A rejection ends selection.
pub struct ConfiguredKeys {
    keys: Vec<String>,
    offered: bool,
}

impl ConfiguredKeys {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys, offered: false }
    }
}

impl KeyChooser for ConfiguredKeys {
    fn choose(&mut self, _presentation: &Presentation<'_>) -> Choice {
        if self.offered || self.keys.is_empty() {
            return Choice::Cancel;
        }
        self.offered = true;
        Choice::Keys(self.keys.clone())
    }
}

/// Walks the ranked candidates one single-column key at a time.
#[derive(Default)]
pub struct AutoKeyChooser {
    next: usize,
}

impl KeyChooser for AutoKeyChooser {
    fn choose(&mut self, presentation: &Presentation<'_>) -> Choice {
        match presentation.candidates.get(self.next) {
            Some(candidate) => {
                self.next += 1;
                Choice::Keys(vec![candidate.left.clone()])
            }
            None => Choice::Cancel,
        }
    }
}

/// Accepted key with both sides' validation.
#[derive(Debug, Clone, Serialize)]
pub struct KeySelection {
    pub key: KeySpec,
    pub left: KeyValidation,
    pub right: KeyValidation,
    pub attempts: usize,
    pub trace: Vec<SelectorState>,
}

/// Common columns, ranked: configured keys, then identifier-looking names,
/// then the rest. Alphabetical within a rank.
pub fn common_columns(
    left: &DatasetHandle,
    right: &DatasetHandle,
    mapping: &ColumnMapping,
    configured: &[String],
) -> Vec<KeyCandidate> {
    let configured: Vec<String> = configured.iter().map(|c| crate::normalize::normalize(c)).collect();
    let mut out: Vec<KeyCandidate> = left
        .columns
        .iter()
        .filter_map(|l| {
            let r = mapping.counterpart(l);
            if !right.has_column(r) {
                return None;
            }
            let rank = if configured.contains(l) {
                CandidateRank::Configured
            } else if KEY_INDICATORS.iter().any(|ind| l.contains(ind)) {
                CandidateRank::Identifier
            } else {
                CandidateRank::Other
            };
            Some(KeyCandidate { left: l.clone(), right: r.to_string(), rank })
        })
        .collect();
    out.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.left.cmp(&b.left)));
    out
}

pub struct KeySelector<'s> {
    validator: KeyValidator<'s>,
    max_attempts: usize,
    log: RunLog,
}

impl<'s> KeySelector<'s> {
    pub fn new(store: &'s dyn TableStore, log: &RunLog) -> Self {
        Self {
            validator: KeyValidator::new(store, log),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            log: log.scoped("key_selector"),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn validator(&self) -> &KeyValidator<'s> {
        &self.validator
    }

    /// Run selection until the chooser's key validates on both tables, or it
    /// cancels. `configured` only affects candidate ranking.
    pub fn select(
        &self,
        left: &DatasetHandle,
        right: &DatasetHandle,
        mapping: &ColumnMapping,
        configured: &[String],
        chooser: &mut dyn KeyChooser,
    ) -> Result<KeySelection, ReconError> {
        let mut trace = vec![SelectorState::Discovering];
        let candidates = common_columns(left, right, mapping, configured);
        if candidates.is_empty() {
            return Err(ReconError::NoCommonColumns {
                left: left.table.clone(),
                right: right.table.clone(),
            });
        }
        self.log.info(
            "discovered",
            &[("candidates", &candidates.len()), ("left", &left.table), ("right", &right.table)],
        );

        let mut last_rejection: Option<Rejection> = None;
        for attempt in 1..=self.max_attempts {
            trace.push(SelectorState::Presenting);
            let presentation = Presentation {
                candidates: &candidates,
                attempt,
                last_rejection: last_rejection.as_ref(),
            };
            let chosen = match chooser.choose(&presentation) {
                Choice::Keys(keys) => keys,
                Choice::Cancel => break,
            };

            trace.push(SelectorState::Validating);
            match self.validate_both(left, right, mapping, &chosen)? {
                Ok((key, left_validation, right_validation)) => {
                    trace.push(SelectorState::Accepted);
                    self.log.info("accepted", &[("key", &key.label()), ("attempts", &attempt)]);
                    return Ok(KeySelection {
                        key,
                        left: left_validation,
                        right: right_validation,
                        attempts: attempt,
                        trace,
                    });
                }
                Err(rejection) => {
                    self.log.warn(
                        "rejected",
                        &[
                            ("key", &rejection.key.join(",")),
                            ("side", &rejection.side),
                            ("reason", &rejection.reason),
                        ],
                    );
                    trace.push(SelectorState::Retrying);
                    last_rejection = Some(rejection);
                }
            }
        }

        trace.push(SelectorState::Cancelled);
        self.log.info("cancelled", &[("states", &trace.len())]);
        Err(ReconError::KeySelectionCancelled {
            last_rejection: last_rejection.map(|r| r.reason),
        })
    }

    /// Outer error: store failure. Inner error: the choice was rejected.
    #[allow(clippy::type_complexity)]
    fn validate_both(
        &self,
        left: &DatasetHandle,
        right: &DatasetHandle,
        mapping: &ColumnMapping,
        chosen: &[String],
    ) -> Result<Result<(KeySpec, KeyValidation, KeyValidation), Rejection>, ReconError> {
        let reject = |side: Side, reason: String| Rejection {
            key: chosen.to_vec(),
            side,
            reason,
        };

        let left_validation = match self.validator.validate_key(&left.table, chosen) {
            Ok(v) => v,
            Err(e) if is_choice_error(&e) => return Ok(Err(reject(Side::Left, e.to_string()))),
            Err(e) => return Err(e),
        };
        if !left_validation.is_valid {
            return Ok(Err(reject(Side::Left, duplicate_reason(&left_validation))));
        }

        let right_requested: Vec<String> = left_validation
            .discovered
            .iter()
            .map(|l| mapping.counterpart(l).to_string())
            .collect();
        let right_validation = match self.validator.validate_key(&right.table, &right_requested) {
            Ok(v) => v,
            Err(e) if is_choice_error(&e) => return Ok(Err(reject(Side::Right, e.to_string()))),
            Err(e) => return Err(e),
        };
        if !right_validation.is_valid {
            return Ok(Err(reject(Side::Right, duplicate_reason(&right_validation))));
        }

        let key = KeySpec {
            requested: chosen.to_vec(),
            left: left_validation.discovered.clone(),
            right: right_validation.discovered.clone(),
        };
        Ok(Ok((key, left_validation, right_validation)))
    }
}

fn is_choice_error(e: &ReconError) -> bool {
    matches!(e, ReconError::ColumnNotFound { .. } | ReconError::InvalidInput(_))
}

fn duplicate_reason(v: &KeyValidation) -> String {
    let mut reason = format!(
        "key '{}' has {} duplicate row(s) in table '{}'",
        v.discovered.join(", "),
        v.duplicate_count,
        v.table
    );
    let examples = v.example_descriptions();
    if !examples.is_empty() {
        reason.push_str(&format!(" (e.g. {})", examples.join("; ")));
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingEntry, Provenance};
    use crate::store::SqliteStore;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    struct Scripted(Vec<Choice>, Vec<usize>);

    impl KeyChooser for Scripted {
        fn choose(&mut self, p: &Presentation<'_>) -> Choice {
            self.1.push(p.candidates.len());
            if self.0.is_empty() {
                Choice::Cancel
            } else {
                self.0.remove(0)
            }
        }
    }

    fn fixture() -> (SqliteStore, DatasetHandle, DatasetHandle) {
        let store = SqliteStore::open_in_memory().unwrap();
        let left = store
            .stage_table(
                "left",
                &strings(&["code", "batch", "amount"]),
                vec![
                    strings(&["A", "1", "10"]),
                    strings(&["B", "1", "20"]),
                    strings(&["C", "2", "30"]),
                ],
            )
            .unwrap();
        let right = store
            .stage_table(
                "right",
                &strings(&["Code", "Batch", "Total"]),
                vec![
                    strings(&["A", "1", "10"]),
                    strings(&["B", "2", "20"]),
                    strings(&["B", "3", "25"]),
                ],
            )
            .unwrap();
        (store, left, right)
    }

    fn total_mapping() -> ColumnMapping {
        let mut b = ColumnMapping::builder();
        b.propose(MappingEntry::new("total", "amount", 1.0, Provenance::Explicit));
        b.build().unwrap()
    }

    #[test]
    fn candidates_apply_mapping_and_rank() {
        let (_s, left, right) = fixture();
        let c = common_columns(&left, &right, &total_mapping(), &strings(&["Batch"]));
        let names: Vec<&str> = c.iter().map(|k| k.left.as_str()).collect();
        assert_eq!(names, vec!["batch", "code", "amount"]);
        assert_eq!(c[0].rank, CandidateRank::Configured);
        assert_eq!(c[1].rank, CandidateRank::Identifier);
        assert_eq!(c[2].right, "total");
    }

    #[test]
    fn retry_after_rejection_then_accept_composite() {
        let (s, left, right) = fixture();
        let selector = KeySelector::new(&s, &RunLog::new("t"));
        let mut chooser = Scripted(
            vec![
                Choice::Keys(strings(&["code"])),
                Choice::Keys(strings(&["Code", "Batch"])),
            ],
            Vec::new(),
        );
        let sel = selector
            .select(&left, &right, &total_mapping(), &[], &mut chooser)
            .unwrap();
        assert_eq!(sel.key.left, strings(&["code", "batch"]));
        assert_eq!(sel.key.right, strings(&["code", "batch"]));
        assert_eq!(sel.attempts, 2);
        assert_eq!(
            sel.trace,
            vec![
                SelectorState::Discovering,
                SelectorState::Presenting,
                SelectorState::Validating,
                SelectorState::Retrying,
                SelectorState::Presenting,
                SelectorState::Validating,
                SelectorState::Accepted,
            ]
        );
    }

    #[test]
    fn unknown_column_is_a_rejection_not_an_abort() {
        let (s, left, right) = fixture();
        let selector = KeySelector::new(&s, &RunLog::new("t"));
        let mut chooser = Scripted(
            vec![Choice::Keys(strings(&["nope"])), Choice::Keys(strings(&["amount"]))],
            Vec::new(),
        );
        let sel = selector
            .select(&left, &right, &total_mapping(), &[], &mut chooser)
            .unwrap();
        assert_eq!(sel.key.right, strings(&["total"]));
    }

    #[test]
    fn cancel_propagates_last_rejection() {
        let (s, left, right) = fixture();
        let selector = KeySelector::new(&s, &RunLog::new("t"));
        let mut chooser = ConfiguredKeys::new(strings(&["code"]));
        let err = selector
            .select(&left, &right, &total_mapping(), &[], &mut chooser)
            .unwrap_err();
        match err {
            ReconError::KeySelectionCancelled { last_rejection: Some(reason) } => {
                assert!(reason.contains("table 'right'"), "{reason}");
                assert!(reason.contains("code=B (x2)"), "{reason}");
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn auto_chooser_walks_ranked_candidates() {
        let (s, left, right) = fixture();
        let selector = KeySelector::new(&s, &RunLog::new("t"));
        let mut chooser = AutoKeyChooser::default();
        let sel = selector
            .select(&left, &right, &total_mapping(), &[], &mut chooser)
            .unwrap();
        // code ranks first but repeats on the right; amount is next.
        assert_eq!(sel.key.left, strings(&["amount"]));
        assert_eq!(sel.key.right, strings(&["total"]));
        assert_eq!(sel.attempts, 2);
    }

    #[test]
    fn no_common_columns() {
        let store = SqliteStore::open_in_memory().unwrap();
        let left = store.stage_table("a", &strings(&["x"]), Vec::new()).unwrap();
        let right = store.stage_table("b", &strings(&["y"]), Vec::new()).unwrap();
        let selector = KeySelector::new(&store, &RunLog::new("t"));
        let err = selector
            .select(&left, &right, &ColumnMapping::default(), &[], &mut AutoKeyChooser::default())
            .unwrap_err();
        assert!(matches!(err, ReconError::NoCommonColumns { .. }));
    }

    #[test]
    fn attempts_are_bounded() {
        let (s, left, right) = fixture();
        let selector = KeySelector::new(&s, &RunLog::new("t")).with_max_attempts(2);
        let mut chooser = Scripted(vec![Choice::Keys(strings(&["code"])); 5], Vec::new());
        let err = selector
            .select(&left, &right, &total_mapping(), &[], &mut chooser)
            .unwrap_err();
        assert!(matches!(err, ReconError::KeySelectionCancelled { .. }));
        assert_eq!(chooser.1, vec![3, 3]);
    }
}
