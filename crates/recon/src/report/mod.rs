//! Fidelity-tiered report exports.
//!
//! One pass over the matched rows feeds every value-difference tier:
//!
//! | Tier    | File                                     | Fully-differing columns   |
//! |---------|------------------------------------------|---------------------------|
//! | preview | `value_differences`                      | collapsed when annotating |
//! | full    | `value_differences_full[_partNNN]`       | always collapsed          |
//! | audit   | `value_differences_full_audit[_partNNN]` | never collapsed           |
//!
//! Orphan rows get a preview and a full export each. Full-tier files can be
//! bundled into a zip archive with a manifest.

pub mod archive;
pub mod preview;
pub mod summary;
mod writer;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cascade::{values_differ, DifferenceKind};
use crate::config::{OutputFormat, ReportOptions};
use crate::engine::{ColumnDifference, ComparisonResult};
use crate::error::ReconError;
use crate::runlog::RunLog;
use crate::store::{ColumnPair, MatchedRow, Side, TablePair, TableStore, Window};

pub use archive::{ExportManifest, ManifestFile, ManifestFiles, ARCHIVE_NAME, MANIFEST_NAME};
pub use preview::{DifferenceRecord, PreviewBuilder, RowType};

use archive::file_name;
use writer::{export_error, DelimitedWriter, PartWriter};

/// Rows fetched from the store per query while exporting.
pub const FETCH_BATCH: u64 = 10_000;

pub const SUMMARY_FILE: &str = "comparison_summary.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    OnlyLeft,
    OnlyLeftFull,
    OnlyRight,
    OnlyRightFull,
    ValueDifferences,
    ValueDifferencesFull,
    ValueDifferencesFullAudit,
    Summary,
    ZipArchive,
    Manifest,
}

impl ArtifactKind {
    /// Full-tier artifacts are the ones bundled into the archive.
    pub fn is_full_tier(&self) -> bool {
        matches!(
            self,
            Self::OnlyLeftFull | Self::OnlyRightFull | Self::ValueDifferencesFull | Self::ValueDifferencesFullAudit
        )
    }
}

/// Files written by one export, by kind. Split exports list every part.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ReportArtifacts {
    files: BTreeMap<ArtifactKind, Vec<PathBuf>>,
}

impl ReportArtifacts {
    fn insert(&mut self, kind: ArtifactKind, paths: Vec<PathBuf>) {
        self.files.insert(kind, paths);
    }

    pub fn get(&self, kind: ArtifactKind) -> &[PathBuf] {
        self.files.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, kind: ArtifactKind) -> bool {
        self.files.contains_key(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArtifactKind, &PathBuf)> {
        self.files.iter().flat_map(|(k, paths)| paths.iter().map(move |p| (*k, p)))
    }

    pub fn paths(&self) -> Vec<&PathBuf> {
        self.iter().map(|(_, p)| p).collect()
    }
}

// ---------------------------------------------------------------------------
// Exporter
// ---------------------------------------------------------------------------

pub struct ReportFidelityExporter<'s> {
    store: &'s dyn TableStore,
    options: ReportOptions,
    format: OutputFormat,
    max_differences: usize,
    title: String,
    log: RunLog,
}

impl<'s> ReportFidelityExporter<'s> {
    pub fn new(
        store: &'s dyn TableStore,
        options: &ReportOptions,
        format: OutputFormat,
        max_differences: usize,
        log: &RunLog,
    ) -> Self {
        Self {
            store,
            options: options.clone(),
            format,
            max_differences,
            title: String::new(),
            log: log.scoped("export"),
        }
    }

    /// Name shown at the top of the summary.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Write every report file for `result` into `out_dir`.
    pub fn export_differences(&self, result: &ComparisonResult, out_dir: &Path) -> Result<ReportArtifacts, ReconError> {
        std::fs::create_dir_all(out_dir).map_err(|e| export_error(out_dir, e))?;
        let pair = result.table_pair();
        let mut artifacts = ReportArtifacts::default();

        self.export_value_differences(result, &pair, out_dir, &mut artifacts)?;
        for side in [Side::Left, Side::Right] {
            self.export_unmatched(result, &pair, side, out_dir, &mut artifacts)?;
        }

        let mut archived: Option<(PathBuf, Vec<ManifestFile>)> = None;
        if self.options.zip_large_exports {
            let to_zip: Vec<PathBuf> = artifacts
                .iter()
                .filter(|(kind, _)| kind.is_full_tier())
                .map(|(_, p)| p.clone())
                .collect();
            if !to_zip.is_empty() {
                let (zip_path, zipped) = archive::archive_files(out_dir, &to_zip)?;
                artifacts.files.retain(|kind, _| !kind.is_full_tier());
                self.log.info(
                    "archived",
                    &[("files", &zipped.len()), ("archive", &zip_path.display())],
                );
                artifacts.insert(ArtifactKind::ZipArchive, vec![zip_path.clone()]);
                archived = Some((zip_path, zipped));
            }
        }

        let mut names: Vec<String> = artifacts.paths().iter().map(|p| file_name(p)).collect();
        names.push(SUMMARY_FILE.to_string());
        if self.options.zip_large_exports {
            names.push(MANIFEST_NAME.to_string());
        }
        let title = if self.title.is_empty() {
            format!("{} vs {}", result.left_table, result.right_table)
        } else {
            self.title.clone()
        };
        let summary_path = out_dir.join(SUMMARY_FILE);
        std::fs::write(&summary_path, summary::render(&title, result, &names))
            .map_err(|e| export_error(&summary_path, e))?;
        artifacts.insert(ArtifactKind::Summary, vec![summary_path]);

        if self.options.zip_large_exports {
            let (zip_file, zipped) = match archived {
                Some((path, zipped)) => (Some(file_name(&path)), zipped),
                None => (None, Vec::new()),
            };
            let unzipped = artifacts
                .iter()
                .filter(|(kind, _)| *kind != ArtifactKind::ZipArchive)
                .map(|(_, p)| ManifestFile::describe(p))
                .collect::<Result<Vec<_>, _>>()?;
            let manifest = ExportManifest {
                created_at: chrono::Utc::now().to_rfc3339(),
                zip_file,
                configuration: serde_json::json!({
                    "report": &self.options,
                    "comparison": &result.options,
                    "output_format": self.format,
                    "max_differences": self.max_differences,
                }),
                files: ManifestFiles { zipped_files: zipped, unzipped_files: unzipped },
                totals: serde_json::json!({
                    "left_rows": result.left_rows,
                    "right_rows": result.right_rows,
                    "matched": result.matched,
                    "only_left": result.only_left,
                    "only_right": result.only_right,
                    "value_differences": result.value_differences,
                }),
            };
            let path = manifest.write(out_dir)?;
            artifacts.insert(ArtifactKind::Manifest, vec![path]);
        }

        self.log.info(
            "done",
            &[("dir", &out_dir.display()), ("files", &artifacts.paths().len())],
        );
        Ok(artifacts)
    }

    fn path(&self, out_dir: &Path, stem: &str) -> PathBuf {
        out_dir.join(format!("{stem}.{}", self.format.extension()))
    }

    fn part_writer(&self, out_dir: &Path, stem: &str, header: Vec<String>, expected: u64) -> Result<PartWriter, ReconError> {
        PartWriter::create(
            out_dir,
            stem,
            self.format.extension(),
            self.format.delimiter(),
            header,
            self.options.chunk_export_size as u64,
            expected,
        )
    }

    // -- value differences ---------------------------------------------------

    fn export_value_differences(
        &self,
        result: &ComparisonResult,
        pair: &TablePair,
        out_dir: &Path,
        artifacts: &mut ReportArtifacts,
    ) -> Result<(), ReconError> {
        let key_columns = &result.key.left;
        let header = DifferenceRecord::header(key_columns);

        let differing: Vec<&ColumnDifference> =
            result.column_differences.iter().filter(|c| c.differences > 0).collect();
        let entire: HashSet<&str> = differing
            .iter()
            .filter(|c| result.entire_column_different(c))
            .map(|c| c.column.left.as_str())
            .collect();
        let collapse_preview = self.options.annotate_entire_column;
        let columns: Vec<ColumnPair> = differing.iter().map(|c| c.column.clone()).collect();

        let summaries: Vec<DifferenceRecord> = if entire.is_empty() {
            Vec::new()
        } else {
            self.entire_column_summaries(result, pair, &columns, &entire)?
        };

        let mut preview = PreviewBuilder::new(self.options.csv_preview_limit, self.options.entire_column_sample_size);
        if collapse_preview {
            for s in &summaries {
                preview.add_summary(s.clone());
            }
        }

        let mut full = if self.options.export_full {
            let partial_rows: u64 = differing
                .iter()
                .filter(|c| !entire.contains(c.column.left.as_str()))
                .map(|c| c.differences)
                .sum();
            let mut w = self.part_writer(
                out_dir,
                "value_differences_full",
                header.clone(),
                partial_rows + summaries.len() as u64,
            )?;
            for s in &summaries {
                w.write(&s.to_record())?;
            }
            Some(w)
        } else {
            None
        };

        let audit_stamp = chrono::Utc::now().to_rfc3339();
        let mut audit = if self.options.export_rowlevel_audit_full {
            let mut audit_header: Vec<String> = header[..header.len() - 3].to_vec();
            audit_header.push("audit_timestamp".into());
            let total: u64 = differing.iter().map(|c| c.differences).sum();
            Some(self.part_writer(out_dir, "value_differences_full_audit", audit_header, total)?)
        } else {
            None
        };

        let options = result.options;
        let mut offset = 0;
        while offset < result.left_rows && !columns.is_empty() {
            let window = Window { offset, limit: FETCH_BATCH };
            let rows = self.store.matched_rows(pair, &columns, Some(window))?;
            for row in &rows {
                for (i, column) in columns.iter().enumerate() {
                    let (left, right) = &row.values[i];
                    if !values_differ(left.as_deref(), right.as_deref(), &options) {
                        continue;
                    }
                    let record = row_record(row, column, i);

                    if let Some(w) = audit.as_mut() {
                        let mut cells = record.to_record();
                        cells.truncate(cells.len() - 3);
                        cells.push(audit_stamp.clone());
                        w.write(&cells)?;
                    }
                    let is_entire = entire.contains(column.left.as_str());
                    if let Some(w) = full.as_mut() {
                        if !is_entire {
                            w.write(&record.to_record())?;
                        }
                    }
                    if !(is_entire && collapse_preview) {
                        preview.offer(record);
                    }
                }
            }
            offset += FETCH_BATCH;
        }

        let preview_rows = preview.finish(&self.options.preview_order);
        let mut w = DelimitedWriter::create(self.path(out_dir, "value_differences"), self.format.delimiter(), &header)?;
        for r in &preview_rows {
            w.write(&r.to_record())?;
        }
        let (preview_path, preview_count) = w.finish()?;
        artifacts.insert(ArtifactKind::ValueDifferences, vec![preview_path]);

        let mut full_count = 0;
        if let Some(w) = full {
            full_count = w.rows();
            artifacts.insert(ArtifactKind::ValueDifferencesFull, w.finish()?);
        }
        let mut audit_count = 0;
        if let Some(w) = audit {
            audit_count = w.rows();
            artifacts.insert(ArtifactKind::ValueDifferencesFullAudit, w.finish()?);
        }

        self.log.info(
            "value_differences",
            &[
                ("preview", &preview_count),
                ("full", &full_count),
                ("audit", &audit_count),
                ("entire_columns", &entire.len()),
            ],
        );
        Ok(())
    }

    /// One summary row per fully-differing column, with the first matched
    /// row's values as the example.
    fn entire_column_summaries(
        &self,
        result: &ComparisonResult,
        pair: &TablePair,
        columns: &[ColumnPair],
        entire: &HashSet<&str>,
    ) -> Result<Vec<DifferenceRecord>, ReconError> {
        let mut offset = 0;
        let mut first = None;
        while offset < result.left_rows {
            let rows = self.store.matched_rows(pair, columns, Some(Window { offset, limit: FETCH_BATCH }))?;
            if let Some(row) = rows.into_iter().next() {
                first = Some(row);
                break;
            }
            offset += FETCH_BATCH;
        }
        let Some(first) = first else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for (i, column) in columns.iter().enumerate() {
            if !entire.contains(column.left.as_str()) {
                continue;
            }
            let differences = result
                .column_differences
                .iter()
                .find(|c| c.column == *column)
                .map_or(0, |c| c.differences);
            let mut record = row_record(&first, column, i);
            record.key = vec![String::new(); result.key.left.len()];
            record.entire_column_different = true;
            record.rows_affected = differences;
            record.row_type = RowType::Summary;
            out.push(record);
        }
        Ok(out)
    }

    // -- orphans -------------------------------------------------------------

    fn export_unmatched(
        &self,
        result: &ComparisonResult,
        pair: &TablePair,
        side: Side,
        out_dir: &Path,
        artifacts: &mut ReportArtifacts,
    ) -> Result<(), ReconError> {
        let (stem, preview_kind, full_kind, table_rows, expected) = match side {
            Side::Left => ("only_left", ArtifactKind::OnlyLeft, ArtifactKind::OnlyLeftFull, result.left_rows, result.only_left),
            Side::Right => ("only_right", ArtifactKind::OnlyRight, ArtifactKind::OnlyRightFull, result.right_rows, result.only_right),
        };
        let header = self.store.columns(pair.table(side))?;
        let mut preview = DelimitedWriter::create(self.path(out_dir, stem), self.format.delimiter(), &header)?;
        let mut full = if self.options.export_full {
            Some(self.part_writer(out_dir, &format!("{stem}_full"), header.clone(), expected)?)
        } else {
            None
        };

        let mut written = 0usize;
        let mut offset = 0;
        while offset < table_rows {
            if full.is_none() && written >= self.max_differences {
                break;
            }
            let set = self.store.unmatched_rows(pair, side, Some(Window { offset, limit: FETCH_BATCH }))?;
            for row in set.rows {
                let cells: Vec<String> = row.into_iter().map(Option::unwrap_or_default).collect();
                if written < self.max_differences {
                    preview.write(&cells)?;
                    written += 1;
                }
                if let Some(w) = full.as_mut() {
                    w.write(&cells)?;
                }
            }
            offset += FETCH_BATCH;
        }

        let (preview_path, _) = preview.finish()?;
        artifacts.insert(preview_kind, vec![preview_path]);
        let mut full_rows = 0;
        if let Some(w) = full {
            full_rows = w.rows();
            artifacts.insert(full_kind, w.finish()?);
        }
        self.log.info(
            "unmatched",
            &[("side", &side), ("preview", &written), ("full", &full_rows)],
        );
        Ok(())
    }
}

fn row_record(row: &MatchedRow, column: &ColumnPair, index: usize) -> DifferenceRecord {
    let (left, right) = &row.values[index];
    DifferenceRecord {
        key: row.key.iter().map(|k| k.clone().unwrap_or_default()).collect(),
        column: column.left.clone(),
        left_value: left.clone(),
        right_value: right.clone(),
        kind: DifferenceKind::classify(left.as_deref(), right.as_deref()),
        entire_column_different: false,
        rows_affected: 1,
        row_type: RowType::Partial,
    }
}
