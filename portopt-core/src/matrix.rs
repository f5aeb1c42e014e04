//! Return matrix: date-indexed periodic returns, one column per asset.
//!
//! Missing observations are stored as `NaN`. Matrices built through
//! [`ReturnMatrix::new`] have a strictly ascending date index; bootstrap
//! replicates are the one place where labels repeat or go out of order.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from building or slicing a return matrix.
#[derive(Debug, Error, PartialEq)]
pub enum MatrixError {
    #[error("return matrix has no columns")]
    NoColumns,
    #[error("return matrix has no rows")]
    NoRows,
    #[error("row {row} has {found} values, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("{labels} date labels for {rows} rows")]
    LabelCount { labels: usize, rows: usize },
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("dates must be strictly ascending (row {row}: {date})")]
    Unordered { row: usize, date: NaiveDate },
    #[error("date {0} not present in matrix")]
    MissingLabel(NaiveDate),
}

/// Date-indexed matrix of periodic fractional returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnMatrix {
    dates: Vec<NaiveDate>,
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl ReturnMatrix {
    /// Build a matrix, validating shape, column names and date order.
    pub fn new(
        dates: Vec<NaiveDate>,
        columns: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, MatrixError> {
        if let Some(row) = dates.windows(2).position(|w| w[1] <= w[0]) {
            return Err(MatrixError::Unordered {
                row: row + 1,
                date: dates[row + 1],
            });
        }
        Self::from_parts(dates, columns, rows)
    }

    /// Build a matrix whose labels may repeat (bootstrap replicates).
    pub(crate) fn from_parts(
        dates: Vec<NaiveDate>,
        columns: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, MatrixError> {
        if columns.is_empty() {
            return Err(MatrixError::NoColumns);
        }
        if rows.is_empty() {
            return Err(MatrixError::NoRows);
        }
        if dates.len() != rows.len() {
            return Err(MatrixError::LabelCount {
                labels: dates.len(),
                rows: rows.len(),
            });
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(MatrixError::DuplicateColumn(name.clone()));
            }
        }
        if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(MatrixError::RaggedRow {
                row,
                found: r.len(),
                expected: columns.len(),
            });
        }
        Ok(Self {
            dates,
            columns,
            rows,
        })
    }

    /// Build a matrix from named column vectors sharing one date index.
    pub fn from_columns(
        dates: Vec<NaiveDate>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, MatrixError> {
        let names: Vec<String> = columns.iter().map(|(n, _)| n.clone()).collect();
        let n_rows = dates.len();
        if let Some((_, values)) = columns.iter().find(|(_, v)| v.len() != n_rows) {
            return Err(MatrixError::LabelCount {
                labels: n_rows,
                rows: values.len(),
            });
        }
        let rows = (0..n_rows)
            .map(|i| columns.iter().map(|(_, v)| v[i]).collect())
            .collect();
        Self::new(dates, names, rows)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.rows[row][col]
    }

    pub(crate) fn set_value(&mut self, row: usize, col: usize, value: f64) {
        self.rows[row][col] = value;
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Copy of one column by position.
    pub fn column(&self, col: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[col]).collect()
    }

    /// Copy of one column by name.
    pub fn column_by_name(&self, name: &str) -> Result<Vec<f64>, MatrixError> {
        self.column_index(name)
            .map(|i| self.column(i))
            .ok_or_else(|| MatrixError::UnknownColumn(name.to_string()))
    }

    pub fn has_missing(&self) -> bool {
        self.rows.iter().flatten().any(|v| v.is_nan())
    }

    pub fn missing_count(&self, col: usize) -> usize {
        self.rows.iter().filter(|r| r[col].is_nan()).count()
    }

    /// Project onto the named columns, in the order given.
    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, MatrixError> {
        let idx = names
            .iter()
            .map(|n| {
                self.column_index(n.as_ref())
                    .ok_or_else(|| MatrixError::UnknownColumn(n.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let rows = self
            .rows
            .iter()
            .map(|r| idx.iter().map(|&i| r[i]).collect())
            .collect();
        Self::from_parts(
            self.dates.clone(),
            names.iter().map(|n| n.as_ref().to_string()).collect(),
            rows,
        )
    }

    /// Re-slice rows by date label, in the order (and multiplicity) given.
    ///
    /// Used to align a benchmark matrix with a bootstrap replicate: the
    /// replicate's labels identify which source rows were drawn.
    pub fn select_labels(&self, labels: &[NaiveDate]) -> Result<Self, MatrixError> {
        let lookup: HashMap<NaiveDate, usize> = self
            .dates
            .iter()
            .enumerate()
            .map(|(i, &d)| (d, i))
            .collect();
        let rows = labels
            .iter()
            .map(|d| {
                lookup
                    .get(d)
                    .map(|&i| self.rows[i].clone())
                    .ok_or(MatrixError::MissingLabel(*d))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_parts(labels.to_vec(), self.columns.clone(), rows)
    }

    /// Gather rows by position (bootstrap resampling).
    pub(crate) fn gather_rows(&self, indices: &[usize]) -> Self {
        Self {
            dates: indices.iter().map(|&i| self.dates[i]).collect(),
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Element-wise integer power, leaving `NaN` in place.
    pub fn powi(&self, exponent: i32) -> Self {
        Self {
            dates: self.dates.clone(),
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|r| r.iter().map(|v| v.powi(exponent)).collect())
                .collect(),
        }
    }

    /// BLAKE3 hash of labels, column names and values (bit-exact).
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for name in &self.columns {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
        }
        for (date, row) in self.dates.iter().zip(&self.rows) {
            hasher.update(date.to_string().as_bytes());
            for v in row {
                hasher.update(&v.to_bits().to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Upstream collaborator that supplies the full return matrix.
pub trait ReturnSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Periodic returns per asset, ascending by date, possibly with gaps.
    fn fetch_return_matrix(&self) -> Result<ReturnMatrix, Self::Error>;
}

/// Project `full` onto the user's assets and report whether any selected cell is missing.
pub fn select_user_assets<S: AsRef<str>>(
    asset_ids: &[S],
    full: &ReturnMatrix,
) -> Result<(ReturnMatrix, bool), MatrixError> {
    let selected = full.select_columns(asset_ids)?;
    let has_missing = selected.has_missing();
    Ok((selected, has_missing))
}
