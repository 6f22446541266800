use crate::error::{DuesError, Result};
use chrono::{Datelike, Days, NaiveDate};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Rounds a monetary value to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn to_cents(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// True when two amounts agree to within `tolerance`.
pub fn amounts_match(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance + f64::EPSILON
}

pub fn first_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| DuesError::Validation(format!("Invalid period {}-{:02}", year, month)))
}

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    first_day_of_month(next_year, next_month)?
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| DuesError::Validation(format!("Invalid period {}-{:02}", year, month)))
}

/// Signed number of calendar months from `start` to `end`, ignoring days.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let year_diff = end.year() - start.year();
    let month_diff = end.month() as i32 - start.month() as i32;
    year_diff * 12 + month_diff
}

pub fn period_display_name(year: i32, month: u32) -> String {
    match MONTH_NAMES.get((month as usize).wrapping_sub(1)) {
        Some(name) => format!("{} {}", name, year),
        None => format!("{}-{:02}", year, month),
    }
}

/// The date a period's payment falls due, clamped to the month's last day.
pub fn due_date(year: i32, month: u32, due_day: u32) -> Result<NaiveDate> {
    let last = last_day_of_month(year, month)?;
    let day = due_day.clamp(1, last.day());
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DuesError::Validation(format!("Invalid due day {}", due_day)))
}
