//! The canonical record: one row destined for a base table.
//!
//! Every entity kind builds the same value type; a builder populates
//! only the attributes its kind owns and leaves the rest unset. Unset
//! means absent, never zero — the distinction survives all the way to
//! the NULL-aware upserts and the cleanup deletes.

use chrono::{Datelike, NaiveDate, Weekday};

/// One (date, company) row with the full optional attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub datadate: NaiveDate,
    pub gvkey: i64,

    pub utilization_pct: Option<f64>,
    pub bar: Option<i64>,
    pub age: Option<f64>,
    pub tickets: Option<i64>,
    pub units: Option<f64>,
    pub market_value_usd: Option<f64>,
    pub loan_rate_avg: Option<f64>,
    pub loan_rate_max: Option<f64>,
    pub loan_rate_min: Option<f64>,
    pub loan_rate_range: Option<f64>,
    pub loan_rate_stdev: Option<f64>,

    pub market_cap: Option<f64>,
    pub shares_out: Option<f64>,
    pub volume: Option<f64>,
    pub rtn: Option<f64>,
}

impl Record {
    /// A record for (date, company) with every optional attribute unset.
    pub fn new(datadate: NaiveDate, gvkey: i64) -> Self {
        Self {
            datadate,
            gvkey,
            utilization_pct: None,
            bar: None,
            age: None,
            tickets: None,
            units: None,
            market_value_usd: None,
            loan_rate_avg: None,
            loan_rate_max: None,
            loan_rate_min: None,
            loan_rate_range: None,
            loan_rate_stdev: None,
            market_cap: None,
            shares_out: None,
            volume: None,
            rtn: None,
        }
    }

    /// True when every optional attribute is unset. Empty records are
    /// dropped before they reach the writer.
    pub fn is_empty(&self) -> bool {
        self.utilization_pct.is_none()
            && self.bar.is_none()
            && self.age.is_none()
            && self.tickets.is_none()
            && self.units.is_none()
            && self.market_value_usd.is_none()
            && self.loan_rate_avg.is_none()
            && self.loan_rate_max.is_none()
            && self.loan_rate_min.is_none()
            && self.loan_rate_range.is_none()
            && self.loan_rate_stdev.is_none()
            && self.market_cap.is_none()
            && self.shares_out.is_none()
            && self.volume.is_none()
            && self.rtn.is_none()
    }

    /// True when the date falls on a Saturday or Sunday. Weekend
    /// records are dropped unconditionally, empty or not.
    pub fn is_weekend(&self) -> bool {
        matches!(self.datadate.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn fresh_record_is_empty() {
        let rec = Record::new(d(2020, 1, 3), 1001);
        assert!(rec.is_empty());
    }

    #[test]
    fn any_set_attribute_makes_record_non_empty() {
        let mut rec = Record::new(d(2020, 1, 3), 1001);
        rec.utilization_pct = Some(0.5);
        assert!(!rec.is_empty());

        let mut rec = Record::new(d(2020, 1, 3), 1001);
        rec.rtn = Some(0.0);
        assert!(!rec.is_empty(), "zero is a value, not absence");

        let mut rec = Record::new(d(2020, 1, 3), 1001);
        rec.tickets = Some(3);
        assert!(!rec.is_empty());
    }

    #[test]
    fn weekend_detection() {
        // 2020-01-03 was a Friday.
        assert!(!Record::new(d(2020, 1, 3), 1).is_weekend());
        assert!(Record::new(d(2020, 1, 4), 1).is_weekend());
        assert!(Record::new(d(2020, 1, 5), 1).is_weekend());
        assert!(!Record::new(d(2020, 1, 6), 1).is_weekend());
    }
}
