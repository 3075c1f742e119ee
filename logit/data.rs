//! # Data Loading and Validation Module
//!
//! The only entry point for user-provided tables. It turns heterogeneous
//! cells into the strictly typed label vector and regressor matrix the
//! numeric core consumes, so no type dispatch ever reaches the fitter.
//!
//! - Layout: column 0 is the binary label, columns 1.. are regressors. The
//!   header supplies the dependent-variable name and the regressor names.
//! - Labels: booleans, numeric 0/1, or the strings "true"/"false" in any
//!   case.
//! - Regressors: numbers, booleans (as 0/1) or strings that parse as finite
//!   doubles.
//! - No silent coercion: anything else fails with the offending row and
//!   column.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// One dynamically typed table cell, as handed over by a host table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Missing,
}

impl Cell {
    fn describe(&self) -> String {
        match self {
            Cell::Bool(b) => b.to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Double(d) => d.to_string(),
            Cell::Text(s) => format!("\"{s}\""),
            Cell::Missing => "<missing>".to_string(),
        }
    }

    fn to_label(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            Cell::Int(0) => Some(false),
            Cell::Int(1) => Some(true),
            Cell::Double(d) if *d == 0.0 => Some(false),
            Cell::Double(d) if *d == 1.0 => Some(true),
            Cell::Text(s) => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if s.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn to_regressor(&self) -> Option<f64> {
        let value = match self {
            Cell::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Cell::Int(i) => *i as f64,
            Cell::Double(d) => *d,
            Cell::Text(s) => s.trim().parse::<f64>().ok()?,
            Cell::Missing => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl From<AnyValue<'_>> for Cell {
    fn from(value: AnyValue<'_>) -> Self {
        match value {
            AnyValue::Null => Cell::Missing,
            AnyValue::Boolean(b) => Cell::Bool(b),
            AnyValue::Int8(v) => Cell::Int(i64::from(v)),
            AnyValue::Int16(v) => Cell::Int(i64::from(v)),
            AnyValue::Int32(v) => Cell::Int(i64::from(v)),
            AnyValue::Int64(v) => Cell::Int(v),
            AnyValue::UInt8(v) => Cell::Int(i64::from(v)),
            AnyValue::UInt16(v) => Cell::Int(i64::from(v)),
            AnyValue::UInt32(v) => Cell::Int(i64::from(v)),
            AnyValue::Float32(v) => Cell::Double(f64::from(v)),
            AnyValue::Float64(v) => Cell::Double(v),
            AnyValue::String(s) => Cell::Text(s.to_string()),
            AnyValue::StringOwned(s) => Cell::Text(s.to_string()),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The input table has no data rows.")]
    EmptyDataset,
    #[error(
        "The input table has {found} column(s); a label column and at least one regressor column are required."
    )]
    TooFewColumns { found: usize },
    #[error(
        "Row {row}: label {value} is not a boolean, 0/1, or the text \"true\"/\"false\"."
    )]
    InvalidLabel { row: usize, value: String },
    #[error("Row {row}, column '{column}': value {value} is not convertible to a finite number.")]
    NonNumericRegressor {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Row {row} has {found} cells, but the table has {expected} columns.")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Inconsistent dataset shape: {0}")]
    ShapeMismatch(String),
}

/// A validated dataset: one boolean label and `p >= 1` finite regressors per
/// observation, `n >= 1` observations. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    dependent_variable: String,
    regressor_names: Vec<String>,
    labels: Array1<bool>,
    x: Array2<f64>,
}

impl Dataset {
    /// Assembles a dataset from already typed arrays, checking shapes and
    /// finiteness.
    pub fn new(
        dependent_variable: String,
        regressor_names: Vec<String>,
        labels: Array1<bool>,
        x: Array2<f64>,
    ) -> Result<Self, DataError> {
        if x.nrows() == 0 {
            return Err(DataError::EmptyDataset);
        }
        if x.ncols() == 0 {
            return Err(DataError::TooFewColumns { found: 1 });
        }
        if labels.len() != x.nrows() {
            return Err(DataError::ShapeMismatch(format!(
                "{} labels for {} rows",
                labels.len(),
                x.nrows()
            )));
        }
        if regressor_names.len() != x.ncols() {
            return Err(DataError::ShapeMismatch(format!(
                "{} regressor names for {} columns",
                regressor_names.len(),
                x.ncols()
            )));
        }
        if let Some(((row, column), value)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(DataError::NonNumericRegressor {
                row,
                column: regressor_names[column].clone(),
                value: value.to_string(),
            });
        }
        Ok(Self {
            dependent_variable,
            regressor_names,
            labels,
            x,
        })
    }

    pub fn dependent_variable(&self) -> &str {
        &self.dependent_variable
    }

    /// Regressor names in column order.
    pub fn regressor_names(&self) -> &[String] {
        &self.regressor_names
    }

    pub fn labels(&self) -> ArrayView1<'_, bool> {
        self.labels.view()
    }

    /// The regressor matrix, `n_samples x n_regressors`, without an
    /// intercept column.
    pub fn x(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_regressors(&self) -> usize {
        self.x.ncols()
    }
}

/// Accumulates rows of typed cells and converts them into a `Dataset`.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl DatasetBuilder {
    /// `columns[0]` names the label, the rest name the regressors.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<&mut Self, DataError> {
        if row.len() != self.columns.len() {
            return Err(DataError::RaggedRow {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(self)
    }

    pub fn build(self) -> Result<Dataset, DataError> {
        let num_columns = self.columns.len();
        if num_columns < 2 {
            return Err(DataError::TooFewColumns { found: num_columns });
        }
        if self.rows.is_empty() {
            return Err(DataError::EmptyDataset);
        }

        let num_regressors = num_columns - 1;
        let mut labels = Vec::with_capacity(self.rows.len());
        let mut values = Vec::with_capacity(self.rows.len() * num_regressors);

        for (row_index, row) in self.rows.iter().enumerate() {
            let label = row[0].to_label().ok_or_else(|| DataError::InvalidLabel {
                row: row_index,
                value: row[0].describe(),
            })?;
            labels.push(label);

            for (cell, column) in row[1..].iter().zip(&self.columns[1..]) {
                let value = cell
                    .to_regressor()
                    .ok_or_else(|| DataError::NonNumericRegressor {
                        row: row_index,
                        column: column.clone(),
                        value: cell.describe(),
                    })?;
                values.push(value);
            }
        }

        let x = Array2::from_shape_vec((labels.len(), num_regressors), values)
            .map_err(|e| DataError::ShapeMismatch(e.to_string()))?;
        let mut columns = self.columns;
        let regressor_names = columns.split_off(1);
        let dependent_variable = columns.remove(0);

        Dataset::new(dependent_variable, regressor_names, Array1::from(labels), x)
    }
}

/// Loads a tab-separated table with a header row into a `Dataset`.
pub fn load_dataset(path: &str) -> Result<Dataset, DataError> {
    log::info!("Loading data from '{path}'");

    let df = CsvReader::new(File::open(Path::new(path))?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    let mut builder = DatasetBuilder::new(columns);

    for i in 0..df.height() {
        let row = df
            .get_columns()
            .iter()
            .map(|column| column.get(i).map(Cell::from))
            .collect::<PolarsResult<Vec<Cell>>>()?;
        builder.push_row(row)?;
    }

    let dataset = builder.build()?;
    log::info!(
        "Loaded {} observations of '{}' with {} regressors",
        dataset.n_samples(),
        dataset.dependent_variable(),
        dataset.n_regressors()
    );
    Ok(dataset)
}
