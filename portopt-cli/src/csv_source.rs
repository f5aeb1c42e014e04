//! CSV-backed [`ReturnSource`].
//!
//! Layout: a header row `date,<asset>,<asset>,...`, then one row per period
//! with an ISO date (`YYYY-MM-DD`) and periodic returns. A blank cell or
//! `NaN` marks a missing observation (e.g. before an asset's inception).

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use portopt_core::{MatrixError, ReturnMatrix, ReturnSource};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CsvSourceError {
    #[error("csv error in {path}: {source}")]
    Csv { path: String, source: csv::Error },
    #[error("{path}: header needs a date column and at least one asset")]
    Header { path: String },
    #[error("{path} line {line}: bad date '{value}'")]
    Date {
        path: String,
        line: usize,
        value: String,
    },
    #[error("{path} line {line}, column '{column}': bad return '{value}'")]
    Value {
        path: String,
        line: usize,
        column: String,
        value: String,
    },
    #[error("{path}: {source}")]
    Matrix { path: String, source: MatrixError },
}

#[derive(Debug, Clone)]
pub struct CsvReturnSource {
    path: PathBuf,
}

impl CsvReturnSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }
}

impl ReturnSource for CsvReturnSource {
    type Error = CsvSourceError;

    fn fetch_return_matrix(&self) -> Result<ReturnMatrix, Self::Error> {
        let csv_err = |source: csv::Error| CsvSourceError::Csv {
            path: self.display(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(csv_err)?;

        let headers = reader.headers().map_err(csv_err)?.clone();
        if headers.len() < 2 {
            return Err(CsvSourceError::Header {
                path: self.display(),
            });
        }
        let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

        let mut dates = Vec::new();
        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(csv_err)?;
            // Header is line 1.
            let line = i + 2;
            let raw_date = record.get(0).unwrap_or_default();
            let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|_| {
                CsvSourceError::Date {
                    path: self.display(),
                    line,
                    value: raw_date.to_string(),
                }
            })?;
            let mut row = Vec::with_capacity(columns.len());
            for (column, cell) in columns.iter().zip(record.iter().skip(1)) {
                row.push(parse_cell(cell).ok_or_else(|| CsvSourceError::Value {
                    path: self.display(),
                    line,
                    column: column.clone(),
                    value: cell.to_string(),
                })?);
            }
            dates.push(date);
            rows.push(row);
        }

        ReturnMatrix::new(dates, columns, rows).map_err(|source| CsvSourceError::Matrix {
            path: self.display(),
            source,
        })
    }
}

/// Blank and `NaN` are missing; anything else must be a finite number.
fn parse_cell(cell: &str) -> Option<f64> {
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}
