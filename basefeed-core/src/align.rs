//! Business-day realignment for the daily_base projection.
//!
//! Source feeds attribute values to the trading date with a one-day
//! publication lag whose sign differs by feed: the returns feed is
//! dated one day ahead of the event it reports, every other feed one
//! day behind. The shift direction per kind is a convention of the
//! publishers, not derivable — keep the table exact.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::entity::{EntityKind, Phase};

/// Next business day: Friday skips the weekend to Monday.
pub fn one_day_forward(d: NaiveDate) -> NaiveDate {
    match d.weekday() {
        Weekday::Fri => d + Duration::days(3),
        _ => d + Duration::days(1),
    }
}

/// Previous business day: Monday skips back to Friday.
pub fn one_day_backward(d: NaiveDate) -> NaiveDate {
    match d.weekday() {
        Weekday::Mon => d - Duration::days(3),
        _ => d - Duration::days(1),
    }
}

/// Apply the phase- and kind-specific shift to a record date.
///
/// TrueBase never shifts. DailyBase shifts Returns one business day
/// backward and every other kind one business day forward.
pub fn align(date: NaiveDate, kind: EntityKind, phase: Phase) -> NaiveDate {
    match phase {
        Phase::TrueBase => date,
        Phase::DailyBase => match kind {
            EntityKind::Returns => one_day_backward(date),
            _ => one_day_forward(date),
        },
    }
}
