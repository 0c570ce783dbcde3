//! Rental duration and cost.
//!
//! Durations are counted on the calendar, not by dividing milliseconds: the
//! inclusive day count is consumed month by month starting at the first day of
//! the rental, each month costing as many days as it actually has.

use chrono::{Datelike, Months, NaiveDate};

use crate::model::{Granularity, RateCard, RentalDuration, Window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub duration: RentalDuration,
    pub total_cost: u64,
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    let first = date.with_day(1).unwrap_or(date);
    match first.checked_add_months(Months::new(1)) {
        Some(next) => (next - first).num_days() as u32,
        None => 31,
    }
}

/// Split `days` starting at `start` into whole calendar months plus a rest.
pub fn month_walk(start: NaiveDate, days: u32) -> (u32, u32) {
    let mut cursor = start;
    let mut remaining = days;
    let mut months = 0;
    loop {
        let month_len = days_in_month(cursor);
        if remaining < month_len {
            break;
        }
        remaining -= month_len;
        months += 1;
        match cursor.checked_add_months(Months::new(1)) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    (months, remaining)
}

fn cost(months: u32, days: u32, hours: u32, rates: &RateCard) -> u64 {
    u64::from(months)
        .saturating_mul(rates.monthly)
        .saturating_add(u64::from(days).saturating_mul(rates.daily))
        .saturating_add(u64::from(hours).saturating_mul(rates.hourly.unwrap_or(0)))
}

/// Price a normalized window at `rates`.
///
/// Hour windows bill whole 24h blocks as days (through the month walk) and the
/// remainder at the hourly rate; a vehicle without an hourly rate bills the
/// remainder as one more day.
pub fn quote(window: &Window, granularity: Granularity, rates: &RateCard) -> Quote {
    let start = window.start.date_naive();
    let (months, days, hours) = match granularity {
        Granularity::Day => {
            let inclusive = (window.end.date_naive() - start).num_days() + 1;
            let (months, days) = month_walk(start, inclusive.max(0) as u32);
            (months, days, 0)
        }
        Granularity::Hour => {
            let seconds = (window.end - window.start).num_seconds().max(0);
            let total_hours = (seconds + 3599) / 3600;
            let whole_days = (total_hours / 24) as u32;
            let rest = (total_hours % 24) as u32;
            match rates.hourly {
                Some(_) => {
                    let (months, days) = month_walk(start, whole_days);
                    (months, days, rest)
                }
                None => {
                    let (months, days) = month_walk(start, whole_days + u32::from(rest > 0));
                    (months, days, 0)
                }
            }
        }
    };
    Quote {
        duration: RentalDuration {
            months,
            days,
            hours,
        },
        total_cost: cost(months, days, hours, rates),
    }
}
