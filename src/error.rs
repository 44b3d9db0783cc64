use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("page navigation failed: {0}")]
    Navigation(String),

    #[error("page interaction failed: {0}")]
    Interaction(String),

    #[error("no reports could be selected on the reports page")]
    NothingSelected,

    #[error("no completed archive appeared in {dir} within {waited_secs}s")]
    DownloadTimeout { dir: PathBuf, waited_secs: u64 },

    #[error("archive {path} could not be opened or extracted: {message}")]
    ArchiveOpen { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("nothing to segregate: {0} is empty")]
    NothingToSegregate(PathBuf),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("missing portal settings: add a \"portal\" section to report-harvest.json")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid schedule time: {0}")]
    InvalidSchedule(String),

    #[error("unknown scheduled job: {0}")]
    ScheduleNotFound(String),

    #[error("portal request failed: {0}")]
    Http(String),

    #[error("portal returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },
}

impl HarvestError {
    pub(crate) fn fs(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        HarvestError::Filesystem(format!("{context}: {err}"))
    }
}
