//! Source partition reading: Parquet files → raw rows.
//!
//! A partition is one Parquet file under an entity's source directory.
//! Tabular partitions carry one row per (date, company) with every
//! owned attribute in source-column order. Matrix partitions are wide:
//! the first column is the date axis and each further column holds one
//! company's values; they are unflattened to one raw row per cell.
//! Transposed partitions store the axes swapped (company axis down the
//! first column, dates along the header) and are flipped back before
//! unflattening.
//!
//! Cells are surfaced as loosely-typed [`RawValue`]s; all parsing into
//! canonical dates and keys happens in the builders. An unreadable or
//! structurally malformed partition is fatal — the file contributes
//! nothing.

use std::fs;
use std::path::Path;

use polars::prelude::*;
use thiserror::Error;

use crate::entity::EntitySpec;

/// Errors from reading a source partition.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("partition read error: {0}")]
    Read(String),

    #[error("partition layout error: {0}")]
    Layout(String),

    #[error("unsupported column type for '{column}': {dtype}")]
    UnsupportedColumn { column: String, dtype: String },
}

/// One loosely-typed source cell.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    /// Seconds since the Unix epoch, from timestamp-typed columns.
    EpochSeconds(i64),
}

impl RawValue {
    /// Render a cell for use as a column header after transposition.
    fn header_text(&self) -> String {
        match self {
            RawValue::Null => String::new(),
            RawValue::Int(n) => n.to_string(),
            RawValue::Float(f) => f.to_string(),
            RawValue::Text(s) => s.clone(),
            RawValue::EpochSeconds(s) => s.to_string(),
        }
    }
}

/// One raw row: the company cell, the date cell, and the value cells
/// in source-column order. For unflattened matrices `values` holds a
/// single cell.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub company: RawValue,
    pub date: RawValue,
    pub values: Vec<RawValue>,
}

/// An entire partition as headers plus row-major cells.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
}

impl RawTable {
    /// Swap axes: the first column becomes the header row and the
    /// headers become the first column.
    pub fn transpose(self) -> RawTable {
        let mut headers = Vec::with_capacity(self.rows.len() + 1);
        headers.push(self.headers.first().cloned().unwrap_or_default());
        for row in &self.rows {
            headers.push(row.first().map(RawValue::header_text).unwrap_or_default());
        }

        let mut rows = Vec::with_capacity(self.headers.len().saturating_sub(1));
        for (j, name) in self.headers.iter().enumerate().skip(1) {
            let mut row = Vec::with_capacity(self.rows.len() + 1);
            row.push(RawValue::Text(name.clone()));
            for src in &self.rows {
                row.push(src.get(j).cloned().unwrap_or(RawValue::Null));
            }
            rows.push(row);
        }

        RawTable { headers, rows }
    }

    /// Wide matrix → one raw row per (company, date, value) cell.
    ///
    /// Column 0 is the date axis; every other column is one company,
    /// keyed by its header. Emission order is company-major, matching
    /// the source column order.
    pub fn unflatten(&self) -> Result<Vec<RawRow>, SourceError> {
        if self.headers.len() < 2 {
            return Err(SourceError::Layout(
                "matrix partition needs a date axis and at least one company column".into(),
            ));
        }

        let mut out = Vec::with_capacity(self.rows.len() * (self.headers.len() - 1));
        for (j, company) in self.headers.iter().enumerate().skip(1) {
            for row in &self.rows {
                out.push(RawRow {
                    company: RawValue::Text(company.clone()),
                    date: row.first().cloned().unwrap_or(RawValue::Null),
                    values: vec![row.get(j).cloned().unwrap_or(RawValue::Null)],
                });
            }
        }
        Ok(out)
    }

    /// Tabular partition → one raw row per source row.
    ///
    /// Column 0 is the date, column 1 the company key, and the rest
    /// are value cells in source-column order.
    pub fn tabular(&self) -> Result<Vec<RawRow>, SourceError> {
        let mut out = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            if row.len() < 3 {
                return Err(SourceError::Layout(format!(
                    "tabular row needs date, company, and at least one value column, got {} cells",
                    row.len()
                )));
            }
            out.push(RawRow {
                company: row[1].clone(),
                date: row[0].clone(),
                values: row[2..].to_vec(),
            });
        }
        Ok(out)
    }
}

/// Read one partition and apply the kind's transpose/unflatten
/// modifiers, yielding raw rows ready for the builders.
pub fn read_partition(path: &Path, spec: &EntitySpec) -> Result<Vec<RawRow>, SourceError> {
    let table = read_table(path)?;
    let table = if spec.transpose { table.transpose() } else { table };
    if spec.unflatten {
        table.unflatten()
    } else {
        table.tabular()
    }
}

/// Load a Parquet file into a loosely-typed table.
fn read_table(path: &Path) -> Result<RawTable, SourceError> {
    let file = fs::File::open(path)
        .map_err(|e| SourceError::Read(format!("open {}: {e}", path.display())))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| SourceError::Read(format!("read {}: {e}", path.display())))?;

    let mut headers = Vec::with_capacity(df.width());
    let mut columns: Vec<Vec<RawValue>> = Vec::with_capacity(df.width());
    for col in df.get_columns() {
        headers.push(col.name().to_string());
        columns.push(column_values(col)?);
    }

    let height = df.height();
    let mut rows = Vec::with_capacity(height);
    for i in 0..height {
        rows.push(columns.iter().map(|c| c[i].clone()).collect());
    }

    Ok(RawTable { headers, rows })
}

/// Materialize one column as raw cells, normalizing every supported
/// dtype onto the `RawValue` variants.
fn column_values(col: &Column) -> Result<Vec<RawValue>, SourceError> {
    let n = col.len();
    let mut out = Vec::with_capacity(n);

    match col.dtype() {
        DataType::Int32 => {
            let ca = col.i32().map_err(|e| SourceError::Read(e.to_string()))?;
            for i in 0..n {
                out.push(ca.get(i).map_or(RawValue::Null, |v| RawValue::Int(i64::from(v))));
            }
        }
        DataType::Int64 => {
            let ca = col.i64().map_err(|e| SourceError::Read(e.to_string()))?;
            for i in 0..n {
                out.push(ca.get(i).map_or(RawValue::Null, RawValue::Int));
            }
        }
        DataType::UInt32 => {
            let ca = col.u32().map_err(|e| SourceError::Read(e.to_string()))?;
            for i in 0..n {
                out.push(ca.get(i).map_or(RawValue::Null, |v| RawValue::Int(i64::from(v))));
            }
        }
        DataType::UInt64 => {
            let ca = col.u64().map_err(|e| SourceError::Read(e.to_string()))?;
            for i in 0..n {
                out.push(ca.get(i).map_or(RawValue::Null, |v| RawValue::Int(v as i64)));
            }
        }
        DataType::Float32 => {
            let ca = col.f32().map_err(|e| SourceError::Read(e.to_string()))?;
            for i in 0..n {
                out.push(ca.get(i).map_or(RawValue::Null, |v| RawValue::Float(f64::from(v))));
            }
        }
        DataType::Float64 => {
            let ca = col.f64().map_err(|e| SourceError::Read(e.to_string()))?;
            for i in 0..n {
                out.push(ca.get(i).map_or(RawValue::Null, RawValue::Float));
            }
        }
        DataType::String => {
            let ca = col.str().map_err(|e| SourceError::Read(e.to_string()))?;
            for i in 0..n {
                out.push(
                    ca.get(i)
                        .map_or(RawValue::Null, |v| RawValue::Text(v.to_string())),
                );
            }
        }
        DataType::Date => {
            let ca = col.date().map_err(|e| SourceError::Read(e.to_string()))?;
            for i in 0..n {
                // Days since epoch -> seconds since epoch (midnight UTC).
                out.push(
                    ca.get(i)
                        .map_or(RawValue::Null, |d| RawValue::EpochSeconds(i64::from(d) * 86_400)),
                );
            }
        }
        DataType::Datetime(unit, _) => {
            let ca = col.datetime().map_err(|e| SourceError::Read(e.to_string()))?;
            let divisor = match unit {
                TimeUnit::Milliseconds => 1_000,
                TimeUnit::Microseconds => 1_000_000,
                TimeUnit::Nanoseconds => 1_000_000_000,
            };
            for i in 0..n {
                out.push(
                    ca.get(i)
                        .map_or(RawValue::Null, |v| RawValue::EpochSeconds(v / divisor)),
                );
            }
        }
        other => {
            return Err(SourceError::UnsupportedColumn {
                column: col.name().to_string(),
                dtype: other.to_string(),
            });
        }
    }

    Ok(out)
}
