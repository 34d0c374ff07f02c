//! Value normalization for spreadsheet cells.
//!
//! Every function here is total: malformed input degrades to a documented
//! default (`0`, empty text, or `None`) instead of failing. Whether a default
//! is acceptable for a given row is decided later, when the record's natural
//! key is checked.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use rust_decimal::{Decimal, prelude::FromPrimitive};

use crate::{
    data::{Cell, Value},
    entity::NormalizedRecord,
    fields::{FieldKind, FieldSpec, FieldTable, LabelMatching},
    resolve::{RawRow, resolve},
};

/// Days between the spreadsheet serial-date origin and 1970-01-01.
pub const SERIAL_EPOCH_OFFSET_DAYS: f64 = 25569.0;
pub const SECONDS_PER_DAY: f64 = 86400.0;

const CURRENCY_SCALE: u32 = 2;

/// Parses a currency string into a non-negative two-decimal amount.
///
/// Allow-listed symbols and codes are removed first (ASCII tokens match
/// case-insensitively), then every character that is not a digit or a decimal
/// point. Anything unparsable becomes `0.00`.
pub fn normalize_currency(raw: &str, tokens: &[&str]) -> Decimal {
    let stripped = strip_tokens(raw.trim(), tokens);
    let digits: String = stripped
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect();
    to_currency_scale(parse_decimal_digits(&digits).unwrap_or(Decimal::ZERO))
}

/// Amounts too large to carry two decimal places degrade to `0.00`.
fn to_currency_scale(mut amount: Decimal) -> Decimal {
    amount.rescale(CURRENCY_SCALE);
    if amount.scale() == CURRENCY_SCALE {
        amount
    } else {
        Decimal::new(0, CURRENCY_SCALE)
    }
}

/// Parses `"17.5%"` style input. Unparsable or empty input becomes `0`.
pub fn normalize_percentage(raw: &str) -> Decimal {
    let digits: String = raw
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect();
    parse_decimal_digits(&digits).unwrap_or(Decimal::ZERO)
}

/// Parses a whole-number quantity.
///
/// Everything from the first `.` on is discarded before stripping, so
/// `"3.00"` is 3 rather than 300. A `.` used as a thousands separator is
/// not recognised: `"1.200"` is 1.
pub fn normalize_quantity(raw: &str) -> i64 {
    let whole = raw.trim().split('.').next().unwrap_or_default();
    let digits: String = whole
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '-')
        .collect();
    digits.parse::<i64>().unwrap_or(0)
}

pub fn normalize_identifier(raw: &str, strip_hyphens: bool) -> String {
    let trimmed = raw.trim();
    if strip_hyphens {
        trimmed.replace('-', "")
    } else {
        trimmed.to_string()
    }
}

/// Converts a spreadsheet serial number to a calendar date.
///
/// The serial is mapped onto the Unix epoch through the fixed 25569-day
/// offset at 86400 seconds per day. Serials below 1 and results outside the
/// representable range are `None`.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let seconds = ((serial - SERIAL_EPOCH_OFFSET_DAYS) * SECONDS_PER_DAY).floor();
    if seconds.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp(seconds as i64, 0).map(|dt| dt.date_naive())
}

/// Parses a date from text: serial number, ISO `YYYY-MM-DD`, or `DD/MM/YYYY`.
pub fn normalize_date_text(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(serial) = trimmed.parse::<f64>() {
        return serial_to_date(serial);
    }
    parse_iso_date(trimmed).or_else(|| parse_day_first(trimmed))
}

fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    let date_part = text.split(['T', ' ']).next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// `DD/MM/YYYY`, day first, by explicit field extraction.
pub fn parse_day_first(text: &str) -> Option<NaiveDate> {
    let mut parts = text.trim().split('/');
    let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || day.len() > 2 || month.len() > 2 || year.len() != 4 {
        return None;
    }
    NaiveDate::from_ymd_opt(
        parse_digits(year)?,
        parse_digits(month)?,
        parse_digits(day)?,
    )
}

fn parse_digits<T: FromStr>(text: &str) -> Option<T> {
    if text.is_empty() || !text.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn parse_decimal_digits(digits: &str) -> Option<Decimal> {
    if digits.is_empty() || digits == "." {
        return None;
    }
    let padded = match (digits.starts_with('.'), digits.ends_with('.')) {
        (true, _) => format!("0{digits}"),
        (false, true) => format!("{digits}0"),
        _ => digits.to_string(),
    };
    Decimal::from_str(&padded).ok()
}

fn strip_tokens(text: &str, tokens: &[&str]) -> String {
    let mut ordered: Vec<&str> = tokens.iter().copied().filter(|t| !t.is_empty()).collect();
    ordered.sort_by_key(|token| std::cmp::Reverse(token.len()));

    let mut out = text.to_string();
    for token in ordered {
        if token.is_ascii() {
            let needle = token.to_ascii_uppercase();
            while let Some(pos) = out.to_ascii_uppercase().find(&needle) {
                out.replace_range(pos..pos + needle.len(), "");
            }
        } else {
            out = out.replace(token, "");
        }
    }
    out
}

// Goes through the shortest round-trip text form so 12.99 stays 12.99.
fn decimal_from_number(value: f64) -> Decimal {
    let value = value.abs();
    Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(value))
        .unwrap_or(Decimal::ZERO)
}

/// Normalizes one resolved cell according to `spec`.
///
/// Absent and blank cells become [`Value::Null`], which the merge treats as
/// "keep what is stored". Present cells always yield a typed value, falling
/// back to the kind's default when unparsable.
pub fn normalize_cell(cell: Option<&Cell>, spec: &FieldSpec, tokens: &[&str]) -> Value {
    let Some(cell) = cell.filter(|cell| !cell.is_blank()) else {
        return Value::Null;
    };
    match spec.kind {
        FieldKind::Text => Value::Text(cell.as_label()),
        FieldKind::Identifier | FieldKind::Isbn => {
            let id = normalize_identifier(&cell.as_label(), spec.strips_hyphens());
            if id.is_empty() {
                Value::Null
            } else {
                Value::Text(id)
            }
        }
        FieldKind::Currency => {
            let amount = match cell {
                Cell::Number(n) => to_currency_scale(decimal_from_number(*n)),
                other => normalize_currency(&other.as_label(), tokens),
            };
            Value::Decimal(amount)
        }
        // Numeric cells are stored as read: a workbook cell shown as 10% is 0.1.
        FieldKind::Percentage => Value::Decimal(match cell {
            Cell::Number(n) => decimal_from_number(*n),
            other => normalize_percentage(&other.as_label()),
        }),
        FieldKind::Quantity => Value::Integer(match cell {
            Cell::Number(n) => n.trunc() as i64,
            other => normalize_quantity(&other.as_label()),
        }),
        FieldKind::Date => {
            let date = match cell {
                Cell::Date(d) => Some(*d),
                Cell::Number(n) => serial_to_date(*n),
                Cell::Text(s) => normalize_date_text(s),
                Cell::Blank => None,
            };
            date.map(Value::Date).unwrap_or(Value::Null)
        }
    }
}

/// Turns raw rows into typed records using a field table.
#[derive(Debug)]
pub struct Normalizer<'t> {
    table: &'t FieldTable,
    tokens: Vec<&'t str>,
}

impl<'t> Normalizer<'t> {
    pub fn new(table: &'t FieldTable) -> Self {
        Self {
            table,
            tokens: table.currency_tokens(),
        }
    }

    pub fn matching(&self) -> LabelMatching {
        self.table.label_matching
    }

    pub fn record(&self, row: &RawRow) -> NormalizedRecord {
        let mut record = NormalizedRecord::new(self.table.kind);
        for spec in &self.table.fields {
            let cell = resolve(row, spec, self.table.label_matching);
            record.set(spec.name.clone(), normalize_cell(cell, spec, &self.tokens));
        }
        record
    }
}
