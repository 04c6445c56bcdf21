//! Zip bundling of large exports and the JSON manifest that describes them.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::writer::export_error;
use crate::error::ReconError;

pub const ARCHIVE_NAME: &str = "reconciliation_exports.zip";
pub const MANIFEST_NAME: &str = "export_manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestFile {
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

impl ManifestFile {
    pub fn describe(path: &Path) -> Result<Self, ReconError> {
        let file = File::open(path).map_err(|e| export_error(path, e))?;
        let size = file.metadata().map_err(|e| export_error(path, e))?.len();
        let mut hasher = Sha256::new();
        io::copy(&mut BufReader::new(file), &mut hasher).map_err(|e| export_error(path, e))?;
        Ok(Self {
            name: file_name(path),
            size,
            sha256: format!("sha256:{:x}", hasher.finalize()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ManifestFiles {
    pub zipped_files: Vec<ManifestFile>,
    pub unzipped_files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportManifest {
    pub created_at: String,
    pub zip_file: Option<String>,
    pub configuration: serde_json::Value,
    pub files: ManifestFiles,
    pub totals: serde_json::Value,
}

impl ExportManifest {
    pub fn write(&self, out_dir: &Path) -> Result<PathBuf, ReconError> {
        let path = out_dir.join(MANIFEST_NAME);
        let json = serde_json::to_string_pretty(self).map_err(|e| export_error(&path, e))?;
        std::fs::write(&path, json).map_err(|e| export_error(&path, e))?;
        Ok(path)
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Deflate `files` into `out_dir/ARCHIVE_NAME` and remove the originals.
///
/// Returns the archive path and a manifest entry per archived file, taken
/// before compression.
pub fn archive_files(out_dir: &Path, files: &[PathBuf]) -> Result<(PathBuf, Vec<ManifestFile>), ReconError> {
    let zip_path = out_dir.join(ARCHIVE_NAME);
    let described = files
        .iter()
        .map(|p| ManifestFile::describe(p))
        .collect::<Result<Vec<_>, _>>()?;

    let file = File::create(&zip_path).map_err(|e| export_error(&zip_path, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for path in files {
        zip.start_file(file_name(path), options).map_err(|e| export_error(&zip_path, e))?;
        let mut source = File::open(path).map_err(|e| export_error(path, e))?;
        io::copy(&mut source, &mut zip).map_err(|e| export_error(&zip_path, e))?;
    }
    zip.finish().map_err(|e| export_error(&zip_path, e))?;

    for path in files {
        std::fs::remove_file(path).map_err(|e| export_error(path, e))?;
    }
    Ok((zip_path, described))
}
