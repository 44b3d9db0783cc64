use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::domain::{DownloadManifest, ExtractionResult};
use crate::error::HarvestError;
use crate::logging::LogContext;

#[derive(Debug, Clone)]
pub struct ArchiveVerifier {
    log: LogContext,
}

impl ArchiveVerifier {
    pub fn new(log: LogContext) -> Self {
        Self { log }
    }

    /// Missing manifest names are reported, not treated as failure. Only an archive
    /// that cannot be opened or extracted (or a destination that cannot be reset)
    /// returns an error. The archive is deleted after a successful extraction.
    pub fn verify(
        &self,
        archive: &Path,
        manifest: &DownloadManifest,
        destination: &Path,
    ) -> Result<ExtractionResult, HarvestError> {
        let _guard = self.log.enter();
        tracing::info!(
            archive = %archive.display(),
            destination = %destination.display(),
            "extracting archive"
        );

        reset_dir(destination)?;
        let extracted_names = extract_zip(archive, destination)?;

        let extracted: HashSet<&str> = extracted_names.iter().map(String::as_str).collect();
        let missing_names: Vec<String> = manifest
            .names()
            .iter()
            .filter(|name| !extracted.contains(name.as_str()))
            .cloned()
            .collect();

        if missing_names.is_empty() {
            tracing::info!(files = extracted_names.len(), "all expected files present");
        } else {
            tracing::warn!(missing = ?missing_names, "archive is missing expected files");
        }

        if let Err(err) = fs::remove_file(archive) {
            tracing::warn!(archive = %archive.display(), error = %err, "could not delete archive");
        }

        Ok(ExtractionResult {
            success: true,
            missing_names,
            extracted_names,
        })
    }
}

pub fn reset_dir(dir: &Path) -> Result<(), HarvestError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|err| HarvestError::fs(dir.display(), err))?;
    }
    fs::create_dir_all(dir).map_err(|err| HarvestError::fs(dir.display(), err))
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<String>, HarvestError> {
    let open_error = |message: String| HarvestError::ArchiveOpen {
        path: zip_path.to_path_buf(),
        message,
    };

    let file = fs::File::open(zip_path).map_err(|err| open_error(err.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|err| open_error(err.to_string()))?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| open_error(err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(open_error(format!(
                "entry {} escapes the extraction directory",
                entry.name()
            )));
        };
        let entry_path = target_dir.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| HarvestError::fs(entry_path.display(), err))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| HarvestError::fs(parent.display(), err))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| HarvestError::fs(entry_path.display(), err))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| open_error(format!("{}: {err}", entry.name())))?;

        if let Some(name) = relative.file_name().and_then(|name| name.to_str()) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
