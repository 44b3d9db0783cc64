use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::{ValidationStage, ValidationVerdict};
use crate::logging::LogContext;

pub const NULL_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Empty,
    Integer,
    Float,
    Boolean,
    Text,
    Mixed,
}

impl ColumnType {
    pub fn of_cell(value: &str) -> Self {
        if looks_numeric(value) {
            if value.parse::<i64>().is_ok() {
                return ColumnType::Integer;
            }
            if value.parse::<f64>().is_ok() {
                return ColumnType::Float;
            }
        }
        if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
            ColumnType::Boolean
        } else {
            ColumnType::Text
        }
    }

    pub fn merge(self, other: ColumnType) -> Self {
        use ColumnType::*;
        match (self, other) {
            (Empty, kind) | (kind, Empty) => kind,
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Mixed,
        }
    }
}

// `f64::from_str` also takes "inf" and "NaN" spellings, which are tickers here.
fn looks_numeric(value: &str) -> bool {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    let digits = digits.strip_prefix('.').unwrap_or(digits);
    digits.starts_with(|ch: char| ch.is_ascii_digit())
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Empty => "empty",
            ColumnType::Integer => "integer",
            ColumnType::Float => "floating",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "string",
            ColumnType::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseIssue {
    Empty,
    Malformed(String),
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseIssue::Empty => write!(f, "file is empty"),
            ParseIssue::Malformed(message) => write!(f, "malformed content: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabularDataset {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub column_types: Vec<ColumnType>,
    pub null_counts: Vec<usize>,
}

impl TabularDataset {
    pub fn parse(path: &Path) -> Result<Self, ParseIssue> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|err| ParseIssue::Malformed(err.to_string()))?;

        let mut records = reader.records();
        let headers: Vec<String> = match records.next() {
            None => return Err(ParseIssue::Empty),
            Some(record) => record
                .map_err(|err| ParseIssue::Malformed(err.to_string()))?
                .iter()
                .map(str::to_string)
                .collect(),
        };
        if headers.iter().all(|header| header.trim().is_empty()) {
            return Err(ParseIssue::Empty);
        }

        let width = headers.len();
        let mut rows = Vec::new();
        let mut column_types = vec![ColumnType::Empty; width];
        let mut null_counts = vec![0usize; width];

        for record in records {
            let record = record.map_err(|err| ParseIssue::Malformed(err.to_string()))?;
            if record.iter().all(|field| field.trim().is_empty()) && record.len() <= 1 {
                continue;
            }
            if record.len() > width {
                let line = record.position().map(|pos| pos.line()).unwrap_or_default();
                return Err(ParseIssue::Malformed(format!(
                    "expected {width} fields in line {line}, saw {}",
                    record.len()
                )));
            }

            let mut row = Vec::with_capacity(width);
            for column in 0..width {
                let cell = record
                    .get(column)
                    .map(str::trim)
                    .filter(|value| !NULL_MARKERS.contains(value));
                match cell {
                    Some(value) => {
                        column_types[column] =
                            column_types[column].merge(ColumnType::of_cell(value));
                        row.push(Some(value.to_string()));
                    }
                    None => {
                        null_counts[column] += 1;
                        row.push(None);
                    }
                }
            }
            rows.push(row);
        }

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
            column_types,
            null_counts,
        })
    }

    pub fn has_nulls(&self) -> bool {
        self.null_counts.iter().any(|count| *count > 0)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationGate {
    extension: String,
    log: LogContext,
}

impl ValidationGate {
    pub fn new(extension: &str, log: LogContext) -> Self {
        Self {
            extension: extension.to_ascii_lowercase(),
            log,
        }
    }

    pub fn validate(&self, path: &Path) -> ValidationVerdict {
        let _guard = self.log.enter();
        let file = path.display();

        if !path.is_file() {
            tracing::error!(%file, "file not found");
            return ValidationVerdict::failed(path, ValidationStage::Existence, "file not found");
        }
        if !self.has_expected_extension(path) {
            tracing::error!(%file, expected = %self.extension, "invalid file format");
            return ValidationVerdict::failed(
                path,
                ValidationStage::Existence,
                format!("expected a .{} file", self.extension),
            );
        }

        let dataset = match TabularDataset::parse(path) {
            Ok(dataset) => dataset,
            Err(issue) => {
                tracing::error!(%file, %issue, "could not parse file");
                return ValidationVerdict::failed(path, ValidationStage::Parse, issue.to_string());
            }
        };
        tracing::info!(%file, rows = dataset.rows.len(), columns = dataset.headers.len(), "file loaded");

        if let Err(problem) = check_headers(&dataset.headers) {
            tracing::error!(%file, %problem, "invalid column names");
            return ValidationVerdict::failed(path, ValidationStage::Columns, problem);
        }

        for (header, kind) in dataset.headers.iter().zip(&dataset.column_types) {
            if *kind == ColumnType::Mixed {
                tracing::warn!(%file, column = %header, "column has mixed data types");
                return ValidationVerdict::failed(
                    path,
                    ValidationStage::Types,
                    format!("column '{header}' has mixed data types"),
                );
            }
            tracing::debug!(%file, column = %header, data_type = %kind, "column type");
        }

        if dataset.has_nulls() {
            let mut gaps = Vec::new();
            for (header, count) in dataset.headers.iter().zip(&dataset.null_counts) {
                if *count > 0 {
                    tracing::warn!(%file, column = %header, missing = count, "column has missing values");
                    gaps.push(format!("{header}: {count}"));
                }
            }
            return ValidationVerdict::failed(
                path,
                ValidationStage::Completeness,
                format!("missing values ({})", gaps.join(", ")),
            );
        }

        tracing::info!(%file, "file is valid");
        ValidationVerdict::passed(path)
    }

    pub fn validate_dir(&self, dir: &Path) -> Vec<ValidationVerdict> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        files.iter().map(|file| self.validate(file)).collect()
    }

    fn has_expected_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }
}

fn check_headers(headers: &[String]) -> Result<(), String> {
    let mut seen = HashSet::with_capacity(headers.len());
    for (index, header) in headers.iter().enumerate() {
        let name = header.trim();
        if name.is_empty() {
            return Err(format!("column {} has no header", index + 1));
        }
        if matches!(ColumnType::of_cell(name), ColumnType::Integer | ColumnType::Float) {
            return Err(format!("column {} header '{name}' is not textual", index + 1));
        }
        if !seen.insert(name) {
            return Err(format!("duplicate header '{name}'"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_rules() {
        assert_eq!(ColumnType::Integer.merge(ColumnType::Float), ColumnType::Float);
        assert_eq!(ColumnType::Empty.merge(ColumnType::Text), ColumnType::Text);
        assert_eq!(ColumnType::Integer.merge(ColumnType::Text), ColumnType::Mixed);
        assert_eq!(ColumnType::Boolean.merge(ColumnType::Integer), ColumnType::Mixed);
    }

    #[test]
    fn cell_kinds() {
        assert_eq!(ColumnType::of_cell("42"), ColumnType::Integer);
        assert_eq!(ColumnType::of_cell("-4.5e3"), ColumnType::Float);
        assert_eq!(ColumnType::of_cell("TRUE"), ColumnType::Boolean);
        assert_eq!(ColumnType::of_cell("RELIANCE"), ColumnType::Text);
        assert_eq!(ColumnType::of_cell(".5"), ColumnType::Float);
        assert_eq!(ColumnType::of_cell("-.5"), ColumnType::Float);
    }

    #[test]
    fn infinity_and_nan_spellings_are_text() {
        for value in ["INF", "inf", "Infinity", "-infinity", "NAN", "+NaN"] {
            assert_eq!(ColumnType::of_cell(value), ColumnType::Text, "{value}");
        }
    }

    #[test]
    fn header_rules() {
        let headers = |names: &[&str]| names.iter().map(|name| name.to_string()).collect::<Vec<_>>();
        assert!(check_headers(&headers(&["SYMBOL", "CLOSE"])).is_ok());
        assert!(check_headers(&headers(&["SYMBOL", " "])).is_err());
        assert!(check_headers(&headers(&["SYMBOL", "SYMBOL"])).is_err());
        assert!(check_headers(&headers(&["SYMBOL", "2024"])).is_err());
    }

    #[test]
    fn short_rows_are_padded_with_nulls() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("short.csv");
        fs::write(&path, "a,b,c\n1,2\n3,NA,5\n").unwrap();

        let dataset = TabularDataset::parse(&path).unwrap();
        assert_eq!(dataset.rows.len(), 2);
        assert_eq!(dataset.null_counts, vec![0, 1, 1]);
        assert_eq!(dataset.column_types[0], ColumnType::Integer);
    }

    #[test]
    fn long_rows_are_malformed() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("long.csv");
        fs::write(&path, "a,b\n1,2,3\n").unwrap();

        let issue = TabularDataset::parse(&path).unwrap_err();
        assert!(matches!(issue, ParseIssue::Malformed(_)));
    }
}
