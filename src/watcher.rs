use std::fs::{self, File};
use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use fs2::FileExt;
use regex::Regex;

use crate::domain::ArchiveFile;
use crate::error::HarvestError;
use crate::logging::LogContext;
use crate::wait::wait_until;

static PARTIAL_DOWNLOAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\.(crdownload|part|partial|download|tmp)$)|^(~\$|\.)")
        .expect("partial download pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub suffix: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            suffix: "zip".to_string(),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadWatcher {
    settings: WatchSettings,
    log: LogContext,
}

impl DownloadWatcher {
    pub fn new(settings: WatchSettings, log: LogContext) -> Self {
        Self { settings, log }
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    pub fn await_archive(&self, dir: &Path) -> Result<ArchiveFile, HarvestError> {
        let _guard = self.log.enter();
        tracing::info!(
            dir = %dir.display(),
            timeout_secs = self.settings.timeout.as_secs(),
            "waiting for archive download"
        );
        match wait_until(self.settings.interval, self.settings.timeout, || {
            self.ready_archive(dir)
        }) {
            Some(archive) => {
                tracing::info!(path = %archive.path.display(), size = archive.size, "archive ready");
                Ok(archive)
            }
            None => {
                tracing::error!(
                    dir = %dir.display(),
                    timeout_secs = self.settings.timeout.as_secs(),
                    "download timed out, no archive found"
                );
                Err(HarvestError::DownloadTimeout {
                    dir: dir.to_path_buf(),
                    waited_secs: self.settings.timeout.as_secs(),
                })
            }
        }
    }

    /// The newest archive in `dir`, if it is complete. A newer archive that is still
    /// being written hides older ones.
    pub fn ready_archive(&self, dir: &Path) -> Option<ArchiveFile> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(dir = %dir.display(), error = %err, "download dir not readable yet");
                return None;
            }
        };

        let newest = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| self.is_candidate_name(name))
            })
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                let created = metadata
                    .created()
                    .or_else(|_| metadata.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Some(ArchiveFile {
                    path: entry.path(),
                    created,
                    size: metadata.len(),
                })
            })
            .max_by_key(|archive| archive.created)?;

        if newest.size == 0 || is_locked(&newest.path) {
            tracing::debug!(path = %newest.path.display(), "archive still being written");
            return None;
        }
        Some(newest)
    }

    fn is_candidate_name(&self, name: &str) -> bool {
        let suffix = format!(".{}", self.settings.suffix.to_ascii_lowercase());
        name.to_ascii_lowercase().ends_with(&suffix) && !is_partial_download(name)
    }
}

pub fn is_partial_download(name: &str) -> bool {
    PARTIAL_DOWNLOAD.is_match(name)
}

fn is_locked(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return true;
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_names() {
        assert!(is_partial_download("reports.zip.crdownload"));
        assert!(is_partial_download("reports.zip.part"));
        assert!(is_partial_download("~$reports.zip"));
        assert!(is_partial_download(".reports.zip"));
        assert!(!is_partial_download("reports.zip"));
    }

    #[test]
    fn suffix_match_ignores_case() {
        let watcher = DownloadWatcher::new(WatchSettings::default(), LogContext::detached());
        assert!(watcher.is_candidate_name("Reports.ZIP"));
        assert!(!watcher.is_candidate_name("reports.csv"));
        assert!(!watcher.is_candidate_name("reports.zip.crdownload"));
    }
}
