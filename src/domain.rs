use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::HarvestError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadManifest {
    names: Vec<String>,
}

impl DownloadManifest {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for DownloadManifest {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub path: PathBuf,
    pub created: SystemTime,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub success: bool,
    pub missing_names: Vec<String>,
    pub extracted_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    entries: Vec<ListingEntry>,
}

impl DirectoryListing {
    pub fn new(entries: Vec<ListingEntry>) -> Self {
        Self { entries }
    }

    pub fn from_names<I, S>(dir: &Path, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                ListingEntry {
                    path: dir.join(&name),
                    name,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn scan(root: &Path) -> Result<Self, HarvestError> {
        let mut files = walk_files(root)?;
        files.sort();
        let entries = files
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?.to_string();
                Some(ListingEntry { name, path })
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ListingEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameDecision {
    pub index: usize,
    pub original_name: String,
    pub resolved_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeBucket {
    pub extension: String,
    pub dir: PathBuf,
    pub files: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStage {
    Existence,
    Parse,
    Columns,
    Types,
    Completeness,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStage::Existence => write!(f, "existence"),
            ValidationStage::Parse => write!(f, "parse"),
            ValidationStage::Columns => write!(f, "columns"),
            ValidationStage::Types => write!(f, "types"),
            ValidationStage::Completeness => write!(f, "completeness"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub path: PathBuf,
    pub pass: bool,
    pub failed_stage: Option<ValidationStage>,
    pub detail: Option<String>,
}

impl ValidationVerdict {
    pub fn passed(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            pass: true,
            failed_stage: None,
            detail: None,
        }
    }

    pub fn failed(path: &Path, stage: ValidationStage, detail: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            pass: false,
            failed_stage: Some(stage),
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failure => write!(f, "failure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStage {
    Init,
    Select,
    Trigger,
    AwaitDownload,
    Verify,
    Deduplicate,
    Segregate,
    Validate,
    Summarize,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub downloaded: usize,
    pub validated: usize,
    pub renamed: usize,
    pub timestamp: String,
    pub failed_stage: Option<RunStage>,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn render_text(&self) -> String {
        format!(
            "Summary of the latest report download run.\n\n\
             Overall Status: {}\n\
             Number of Files Downloaded: {}\n\
             Number of Files Validated: {}\n\
             Number of Files Renamed: {}\n\
             Finished At: {}\n",
            self.status, self.downloaded, self.validated, self.renamed, self.timestamp
        )
    }
}

pub fn dated_dir_name(date: NaiveDate) -> String {
    date.format("%d%m%y").to_string()
}

pub(crate) fn walk_files(root: &Path) -> Result<Vec<PathBuf>, HarvestError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| HarvestError::fs(path.display(), err))?;
        for entry in entries {
            let entry = entry.map_err(|err| HarvestError::fs(path.display(), err))?;
            let file_type = entry
                .file_type()
                .map_err(|err| HarvestError::fs(entry.path().display(), err))?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                items.push(entry.path());
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_dir_uses_day_month_short_year() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(dated_dir_name(date), "070324");
    }

    #[test]
    fn scan_includes_nested_files_in_path_order() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("b")).unwrap();
        fs::write(temp.path().join("b").join("x.csv"), b"a").unwrap();
        fs::write(temp.path().join("a.csv"), b"a").unwrap();
        fs::write(temp.path().join("x.csv"), b"a").unwrap();

        let listing = DirectoryListing::scan(temp.path()).unwrap();
        assert_eq!(listing.names(), vec!["a.csv", "x.csv", "x.csv"]);
        assert!(listing.entries()[1].path.ends_with("b/x.csv"));
    }

    #[test]
    fn summary_text_lists_counts() {
        let summary = RunSummary {
            status: RunStatus::Success,
            downloaded: 3,
            validated: 2,
            renamed: 1,
            timestamp: "now".to_string(),
            failed_stage: None,
            error: None,
        };
        let text = summary.render_text();
        assert!(text.contains("Overall Status: success"));
        assert!(text.contains("Downloaded: 3"));
        assert!(text.contains("Renamed: 1"));
    }
}
