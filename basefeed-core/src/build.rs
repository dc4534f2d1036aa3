//! Record builders: raw rows → canonical records, one variant per
//! entity kind.
//!
//! Each builder parses the date cell and the company key, then only
//! the numeric fields its kind owns. Missing cells, NaN, and
//! non-numeric sentinels become unset — never zero. Zero itself is a
//! value and counts as present, including for the loan-rate range
//! derivation.

use chrono::{DateTime, NaiveDate};
use thiserror::Error;

use crate::entity::EntityKind;
use crate::record::Record;
use crate::source::{RawRow, RawValue};

/// Short-interest value-cell positions, counted after the date and
/// company columns. Positions 2–4 are carried by the feed but not
/// loaded.
const SI_UTILIZATION: usize = 0;
const SI_BAR: usize = 1;
const SI_AGE: usize = 5;
const SI_TICKETS: usize = 6;
const SI_UNITS: usize = 7;
const SI_MARKET_VALUE: usize = 8;
const SI_LOAN_RATE_AVG: usize = 9;
const SI_LOAN_RATE_MAX: usize = 10;
const SI_LOAN_RATE_MIN: usize = 11;
const SI_LOAN_RATE_STDEV: usize = 12;
const SI_VALUE_COLUMNS: usize = 13;

/// A row that could not be turned into a record.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unparseable company key: {0:?}")]
    BadCompanyKey(RawValue),

    #[error("unparseable date cell: {0:?}")]
    BadDate(RawValue),

    #[error("row too short: expected at least {expected} value cells, got {got}")]
    ShortRow { expected: usize, got: usize },
}

/// Build the canonical record for one raw row of the given kind.
pub fn build_record(kind: EntityKind, row: &RawRow) -> Result<Record, BuildError> {
    match kind {
        EntityKind::ShortInterest => build_short_interest(row),
        EntityKind::MarketCap => build_single(row, |rec, v| rec.market_cap = v),
        EntityKind::Returns => build_single(row, |rec, v| rec.rtn = v),
        EntityKind::SharesOut => build_single(row, |rec, v| rec.shares_out = v),
        EntityKind::Volume => build_single(row, |rec, v| rec.volume = v),
    }
}

fn build_short_interest(row: &RawRow) -> Result<Record, BuildError> {
    if row.values.len() < SI_VALUE_COLUMNS {
        return Err(BuildError::ShortRow {
            expected: SI_VALUE_COLUMNS,
            got: row.values.len(),
        });
    }

    let mut rec = Record::new(parse_date(&row.date)?, parse_gvkey(&row.company)?);
    rec.utilization_pct = num(&row.values[SI_UTILIZATION]);
    rec.bar = int(&row.values[SI_BAR]);
    rec.age = num(&row.values[SI_AGE]);
    rec.tickets = int(&row.values[SI_TICKETS]);
    rec.units = num(&row.values[SI_UNITS]);
    rec.market_value_usd = num(&row.values[SI_MARKET_VALUE]);
    rec.loan_rate_avg = num(&row.values[SI_LOAN_RATE_AVG]);
    rec.loan_rate_max = num(&row.values[SI_LOAN_RATE_MAX]);
    rec.loan_rate_min = num(&row.values[SI_LOAN_RATE_MIN]);
    rec.loan_rate_stdev = num(&row.values[SI_LOAN_RATE_STDEV]);

    // Derived only when both operands are present; zero counts as
    // present.
    if let (Some(max), Some(min)) = (rec.loan_rate_max, rec.loan_rate_min) {
        rec.loan_rate_range = Some(max - min);
    }

    Ok(rec)
}

/// Builder for the single-value matrix kinds: parse date and key, set
/// the one owned field.
fn build_single(
    row: &RawRow,
    set: impl FnOnce(&mut Record, Option<f64>),
) -> Result<Record, BuildError> {
    let mut rec = Record::new(parse_date(&row.date)?, parse_gvkey(&row.company)?);
    set(&mut rec, row.values.first().and_then(num));
    Ok(rec)
}

/// Parse a date cell. Timestamp-typed and plain-integer cells are
/// seconds since the Unix epoch; text cells are `%Y-%m-%d`.
fn parse_date(v: &RawValue) -> Result<NaiveDate, BuildError> {
    match v {
        RawValue::EpochSeconds(s) | RawValue::Int(s) => DateTime::from_timestamp(*s, 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| BuildError::BadDate(v.clone())),
        RawValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| BuildError::BadDate(v.clone())),
        _ => Err(BuildError::BadDate(v.clone())),
    }
}

/// Parse a company key cell into the integer gvkey.
fn parse_gvkey(v: &RawValue) -> Result<i64, BuildError> {
    match v {
        RawValue::Int(n) => Ok(*n),
        RawValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Ok(*f as i64),
        RawValue::Text(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                return Ok(n);
            }
            // Headers written from numeric axes can surface as "1001.0".
            match s.parse::<f64>() {
                Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
                _ => Err(BuildError::BadCompanyKey(v.clone())),
            }
        }
        _ => Err(BuildError::BadCompanyKey(v.clone())),
    }
}

/// Numeric cell → optional value. NaN and non-numeric text are unset.
fn num(v: &RawValue) -> Option<f64> {
    match v {
        RawValue::Int(n) => Some(*n as f64),
        RawValue::Float(f) if !f.is_nan() => Some(*f),
        RawValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
        _ => None,
    }
}

/// Integer-valued cell, truncated the way the feed publishes counts.
fn int(v: &RawValue) -> Option<i64> {
    num(v).map(|f| f as i64)
}
