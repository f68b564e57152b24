// Detecting the layout of invoice dates and rewriting them uniformly.
//
// Exports mix "1.2.2023", "2023-02-01", "010223" and "20230201". The
// layout is inferred over the whole column, since a single value such as
// "01.02.2023" is ambiguous on its own.
use crate::error::{OstaError, Result};
use crate::table::Cell;
use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Write;

static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-/.]").expect("valid separator regex"));

/// Order of the date parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateOrder {
    pub dayfirst: bool,
    pub yearfirst: bool,
}

impl Default for DateOrder {
    fn default() -> Self {
        DateOrder {
            dayfirst: true,
            yearfirst: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Year,
    Month,
    Day,
}

/// Result of standardizing a date column.
#[derive(Debug, Clone, Default)]
pub struct DateOutcome {
    /// The column, with every parsed date rewritten.
    pub values: Vec<Cell>,
    /// Years of the parsed dates.
    pub years: BTreeSet<i32>,
    /// Values that could not be parsed; they are kept as they were.
    pub failed: Vec<String>,
}

/// Reject strftime patterns chrono cannot render for a plain date, such as
/// unknown specifiers or time fields.
pub fn check_format(date_format: &str) -> Result<()> {
    let mut probe = String::new();
    let invalid = StrftimeItems::new(date_format).any(|i| matches!(i, Item::Error))
        || write!(probe, "{}", NaiveDate::default().format(date_format)).is_err();
    if invalid {
        return Err(OstaError::Config(format!(
            "'date_format' is not a valid format: {}",
            date_format
        )));
    }
    Ok(())
}

/// Parse and reformat a date column.
///
/// `dayfirst`/`yearfirst` override the inferred order when both are given;
/// a single given value fills in whatever inference leaves undecided.
pub fn standardize_dates(
    values: &[Option<&str>],
    date_format: &str,
    dayfirst: Option<bool>,
    yearfirst: Option<bool>,
) -> Result<DateOutcome> {
    check_format(date_format)?;
    // Separated and compact values are laid out independently, even when a
    // column mixes both.
    let (with_sep, compact): (Vec<&str>, Vec<&str>) = values
        .iter()
        .flatten()
        .copied()
        .partition(|v| SEPARATOR.is_match(v));
    let sep_order = resolve_order(infer_order_with_sep(&with_sep), dayfirst, yearfirst);
    let compact_order = resolve_order(infer_order_compact(&compact), dayfirst, yearfirst);
    let char_len = compact.iter().map(|v| v.len()).max().unwrap_or(0);
    let short_split = short_day_month_split(&compact, char_len, compact_order);

    let mut out = DateOutcome::default();
    for v in values {
        let Some(raw) = v else {
            out.values.push(None);
            continue;
        };
        let parsed = if SEPARATOR.is_match(raw) {
            parse_with_sep(raw, sep_order)
        } else {
            parse_compact(raw, char_len, compact_order, short_split)
        };
        match parsed {
            Some(date) => {
                out.years.insert(date.year());
                out.values.push(Some(date.format(date_format).to_string()));
            }
            None => {
                out.failed.push(raw.to_string());
                out.values.push(Some(raw.to_string()));
            }
        }
    }
    Ok(out)
}

/// Explicit `dayfirst`/`yearfirst` win when both are given; otherwise a
/// single given value fills in whatever inference leaves undecided.
fn resolve_order(
    inferred: (Option<bool>, Option<bool>),
    dayfirst: Option<bool>,
    yearfirst: Option<bool>,
) -> DateOrder {
    if let (Some(dayfirst), Some(yearfirst)) = (dayfirst, yearfirst) {
        return DateOrder {
            dayfirst,
            yearfirst,
        };
    }
    let yearfirst = inferred
        .1
        .or(yearfirst)
        .unwrap_or(DateOrder::default().yearfirst);
    // Year-first layouts are year-month-day unless shown otherwise.
    let dayfirst = inferred.0.or(dayfirst).unwrap_or(!yearfirst);
    DateOrder {
        dayfirst,
        yearfirst,
    }
}

fn split_parts(v: &str) -> Option<[u32; 3]> {
    let parts: Vec<&str> = SEPARATOR.split(v.trim()).collect();
    if parts.len() != 3 {
        return None;
    }
    let mut nums = [0u32; 3];
    for (n, p) in nums.iter_mut().zip(&parts) {
        // Excel exports may carry a time after the day.
        let p = p.split_whitespace().next()?;
        *n = p.parse().ok()?;
    }
    Some(nums)
}

/// Classify each position: a value above 31 marks the year, a value in
/// 13..=31 the day, anything else the month. Returns `(dayfirst,
/// yearfirst)` where decidable.
fn infer_order_with_sep(values: &[&str]) -> (Option<bool>, Option<bool>) {
    let split: Vec<[u32; 3]> = values.iter().filter_map(|v| split_parts(v)).collect();
    if split.is_empty() {
        return (None, None);
    }
    let roles: Vec<Role> = (0..3)
        .map(|p| {
            if split.iter().any(|s| s[p] > 31) {
                Role::Year
            } else if split.iter().any(|s| (13..=31).contains(&s[p])) {
                Role::Day
            } else {
                Role::Month
            }
        })
        .collect();
    let pos = |r: Role| roles.iter().position(|x| *x == r);
    match (pos(Role::Year), pos(Role::Day), pos(Role::Month)) {
        (Some(y), Some(d), Some(_)) => {
            let yearfirst = y == 0;
            let dayfirst = (yearfirst && d == 1) || (!yearfirst && d == 0);
            (Some(dayfirst), Some(yearfirst))
        }
        (Some(y), _, _) => (None, Some(y == 0)),
        _ => (None, None),
    }
}

/// Layout of separator-less dates. The year sits at the start or end of
/// the longest values; the day/month order follows from which remaining
/// two-digit chunk can only be a day.
fn infer_order_compact(values: &[&str]) -> (Option<bool>, Option<bool>) {
    let char_len = values.iter().map(|v| v.len()).max().unwrap_or(0);
    let (year_len, years) = match char_len {
        8 => (4, 1970..=2049),
        6 => (2, 15..=49),
        _ => return (None, None),
    };
    let longest: Vec<&str> = values
        .iter()
        .copied()
        .filter(|v| v.len() == char_len && v.bytes().all(|b| b.is_ascii_digit()))
        .collect();
    if longest.is_empty() {
        return (None, None);
    }
    let chunk_max = |vals: &[&str], from: usize, to: usize| -> u32 {
        vals.iter()
            .filter_map(|v| v.get(from..to)?.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
    };
    let head = years.contains(&chunk_max(&longest, 0, year_len));
    let tail = years.contains(&chunk_max(&longest, char_len - year_len, char_len));
    let yearfirst = match (head, tail) {
        (true, false) => true,
        (false, true) => false,
        _ => return (None, None),
    };
    let rest: Vec<&str> = longest
        .iter()
        .filter_map(|v| {
            if yearfirst {
                v.get(year_len..)
            } else {
                v.get(..char_len - year_len)
            }
        })
        .collect();
    let first = chunk_max(&rest, 0, 2);
    let second = chunk_max(&rest, 2, 4);
    let can_be_month = |m: u32| (1..=12).contains(&m);
    let dayfirst = match (can_be_month(first), can_be_month(second)) {
        (false, true) => Some(true),
        (true, false) => Some(false),
        _ => None,
    };
    (dayfirst, Some(yearfirst))
}

fn full_year(y: u32) -> i32 {
    match y {
        0..=49 => 2000 + y as i32,
        50..=99 => 1900 + y as i32,
        _ => y as i32,
    }
}

fn build(year: u32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(full_year(year), month, day)
}

fn parse_with_sep(raw: &str, order: DateOrder) -> Option<NaiveDate> {
    let [a, b, c] = split_parts(raw)?;
    // A leading part above 31 is a year whatever the column says; such
    // values read as year-month-day.
    let (year, first, second, dayfirst) = if order.yearfirst {
        (a, b, c, order.dayfirst)
    } else if a > 31 {
        (a, b, c, false)
    } else {
        (c, a, b, order.dayfirst)
    };
    let (day, month) = if dayfirst {
        (first, second)
    } else {
        (second, first)
    };
    build(year, month, day)
}

/// Year and day-month digits of a compact value.
fn compact_parts(raw: &str, char_len: usize, order: DateOrder) -> Option<(u32, &str)> {
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year_len = match char_len {
        8 => 4,
        6 => 2,
        _ => return None,
    };
    if raw.len() <= year_len + 1 {
        return None;
    }
    let (year, dm) = if order.yearfirst {
        (&raw[..year_len], &raw[year_len..])
    } else {
        (&raw[raw.len() - year_len..], &raw[..raw.len() - year_len])
    };
    Some((year.parse().ok()?, dm))
}

/// Date from day-month digits split at `at`.
fn split_date(year: u32, dm: &str, at: usize, order: DateOrder) -> Option<NaiveDate> {
    let first: u32 = dm.get(..at)?.parse().ok()?;
    let second: u32 = dm.get(at..)?.parse().ok()?;
    let (day, month) = if order.dayfirst {
        (first, second)
    } else {
        (second, first)
    };
    build(year, month, day)
}

/// Where to split three day-month digits, decided over the whole column:
/// after two digits or after one, whichever alone fits every such value.
/// `None` when both or neither fit.
fn short_day_month_split(values: &[&str], char_len: usize, order: DateOrder) -> Option<usize> {
    let short: Vec<(u32, &str)> = values
        .iter()
        .filter_map(|v| compact_parts(v, char_len, order))
        .filter(|(_, dm)| dm.len() == 3)
        .collect();
    if short.is_empty() {
        return None;
    }
    let fits = |at: usize| {
        short
            .iter()
            .all(|&(year, dm)| split_date(year, dm, at, order).is_some())
    };
    match (fits(2), fits(1)) {
        (true, false) => Some(2),
        (false, true) => Some(1),
        _ => None,
    }
}

fn parse_compact(
    raw: &str,
    char_len: usize,
    order: DateOrder,
    short_split: Option<usize>,
) -> Option<NaiveDate> {
    let (year, dm) = compact_parts(raw, char_len, order)?;
    match dm.len() {
        4 => split_date(year, dm, 2, order),
        2 => split_date(year, dm, 1, order),
        3 => match short_split {
            Some(at) => split_date(year, dm, at, order),
            // Undecided column: only a value that fits one way is read.
            None => match (split_date(year, dm, 2, order), split_date(year, dm, 1, order)) {
                (Some(d), None) | (None, Some(d)) => Some(d),
                _ => None,
            },
        },
        _ => None,
    }
}
