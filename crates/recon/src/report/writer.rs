//! Delimited file writers for report exports.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::ReconError;

pub(crate) fn export_error(path: &Path, e: impl std::fmt::Display) -> ReconError {
    ReconError::Export(format!("{}: {e}", path.display()))
}

fn open(path: &Path, delimiter: u8, header: &[String]) -> Result<csv::Writer<File>, ReconError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| export_error(path, e))?;
    writer.write_record(header).map_err(|e| export_error(path, e))?;
    Ok(writer)
}

/// Single file, header written on creation.
pub(crate) struct DelimitedWriter {
    inner: csv::Writer<File>,
    path: PathBuf,
    rows: u64,
}

impl DelimitedWriter {
    pub fn create(path: PathBuf, delimiter: u8, header: &[String]) -> Result<Self, ReconError> {
        let inner = open(&path, delimiter, header)?;
        Ok(Self { inner, path, rows: 0 })
    }

    pub fn write(&mut self, record: &[String]) -> Result<(), ReconError> {
        self.inner.write_record(record).map_err(|e| export_error(&self.path, e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(PathBuf, u64), ReconError> {
        self.inner.flush().map_err(|e| export_error(&self.path, e))?;
        Ok((self.path, self.rows))
    }
}

/// Output that rolls over to `{stem}_partNNN.{ext}` every `part_size` rows.
///
/// Whether to split is fixed at creation from the expected row total; an
/// unsplit export stays one file even if more rows arrive.
pub(crate) struct PartWriter {
    dir: PathBuf,
    stem: String,
    extension: &'static str,
    delimiter: u8,
    header: Vec<String>,
    part_size: u64,
    split: bool,
    current: Option<DelimitedWriter>,
    finished: Vec<PathBuf>,
    rows: u64,
}

impl PartWriter {
    pub fn create(
        dir: &Path,
        stem: &str,
        extension: &'static str,
        delimiter: u8,
        header: Vec<String>,
        part_size: u64,
        expected_rows: u64,
    ) -> Result<Self, ReconError> {
        let part_size = part_size.max(1);
        let mut writer = Self {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            extension,
            delimiter,
            header,
            part_size,
            split: expected_rows > part_size,
            current: None,
            finished: Vec::new(),
            rows: 0,
        };
        writer.roll()?;
        Ok(writer)
    }

    fn path_for(&self, part: usize) -> PathBuf {
        if self.split {
            self.dir.join(format!("{}_part{:03}.{}", self.stem, part, self.extension))
        } else {
            self.dir.join(format!("{}.{}", self.stem, self.extension))
        }
    }

    fn roll(&mut self) -> Result<(), ReconError> {
        if let Some(done) = self.current.take() {
            let (path, _) = done.finish()?;
            self.finished.push(path);
        }
        let path = self.path_for(self.finished.len() + 1);
        self.current = Some(DelimitedWriter::create(path, self.delimiter, &self.header)?);
        Ok(())
    }

    pub fn write(&mut self, record: &[String]) -> Result<(), ReconError> {
        if self.split && self.rows > 0 && self.rows % self.part_size == 0 {
            self.roll()?;
        }
        if let Some(current) = self.current.as_mut() {
            current.write(record)?;
        }
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn finish(mut self) -> Result<Vec<PathBuf>, ReconError> {
        if let Some(done) = self.current.take() {
            let (path, _) = done.finish()?;
            self.finished.push(path);
        }
        Ok(self.finished)
    }
}
