//! Bounded preview of value differences.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::cascade::DifferenceKind;
use crate::config::PreviewOrder;

/// How a difference row stands for the underlying data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowType {
    /// One row standing for a column where every matched row differs.
    Summary,
    /// One of the first differing rows kept for a column.
    Sample,
    /// Any further differing row.
    Partial,
}

impl RowType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Sample => "sample",
            Self::Partial => "partial",
        }
    }
}

/// One differing cell, or a whole differing column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifferenceRecord {
    pub key: Vec<String>,
    /// Left column name.
    pub column: String,
    pub left_value: Option<String>,
    pub right_value: Option<String>,
    pub kind: DifferenceKind,
    pub entire_column_different: bool,
    pub rows_affected: u64,
    pub row_type: RowType,
}

impl DifferenceRecord {
    pub fn header(key_columns: &[String]) -> Vec<String> {
        let mut header = key_columns.to_vec();
        header.extend(
            [
                "Differing Column",
                "Left Value",
                "Right Value",
                "Status",
                "Rows Affected",
                "entire_column_different",
                "row_type",
            ]
            .map(String::from),
        );
        header
    }

    pub fn to_record(&self) -> Vec<String> {
        let mut out = self.key.clone();
        out.push(self.column.clone());
        out.push(self.left_value.clone().unwrap_or_default());
        out.push(self.right_value.clone().unwrap_or_default());
        out.push(self.kind.label().to_string());
        out.push(self.rows_affected.to_string());
        out.push(self.entire_column_different.to_string());
        out.push(self.row_type.label().to_string());
        out
    }
}

pub fn compare_records(a: &DifferenceRecord, b: &DifferenceRecord, order: &[PreviewOrder]) -> Ordering {
    order.iter().fold(Ordering::Equal, |acc, field| {
        acc.then_with(|| match field {
            PreviewOrder::Column => a.column.cmp(&b.column),
            PreviewOrder::Key => a.key.cmp(&b.key),
            PreviewOrder::Priority => a.row_type.cmp(&b.row_type),
        })
    })
}

/// Collects preview rows while matched rows stream past.
///
/// Summary rows always make the preview. Each column keeps its first
/// `sample_size` rows as samples; later rows are partials and fill whatever
/// room the limit leaves.
pub struct PreviewBuilder {
    limit: usize,
    sample_size: usize,
    summaries: Vec<DifferenceRecord>,
    samples: Vec<DifferenceRecord>,
    partials: Vec<DifferenceRecord>,
    sampled: HashMap<String, usize>,
}

impl PreviewBuilder {
    pub fn new(limit: usize, sample_size: usize) -> Self {
        Self {
            limit,
            sample_size,
            summaries: Vec::new(),
            samples: Vec::new(),
            partials: Vec::new(),
            sampled: HashMap::new(),
        }
    }

    pub fn add_summary(&mut self, record: DifferenceRecord) {
        self.summaries.push(record);
    }

    /// Offer a row-level difference. Returns the row type it was given.
    pub fn offer(&mut self, mut record: DifferenceRecord) -> RowType {
        let taken = self.sampled.entry(record.column.clone()).or_insert(0);
        if *taken < self.sample_size {
            *taken += 1;
            record.row_type = RowType::Sample;
            self.samples.push(record);
            RowType::Sample
        } else {
            record.row_type = RowType::Partial;
            if self.partials.len() < self.limit {
                self.partials.push(record);
            }
            RowType::Partial
        }
    }

    pub fn finish(self, order: &[PreviewOrder]) -> Vec<DifferenceRecord> {
        let mut rows = self.summaries;
        rows.extend(self.samples);
        let room = self.limit.saturating_sub(rows.len());
        rows.extend(self.partials.into_iter().take(room));
        rows.truncate(self.limit);
        rows.sort_by(|a, b| compare_records(a, b, order));
        rows
    }
}
