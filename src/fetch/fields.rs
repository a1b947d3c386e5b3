//! Field alias resolution for loosely typed external records.
//!
//! The external API renamed many fields over time, and the same logical item
//! can arrive from feeds that use different names. Each domain type declares
//! its fields as [`FieldAlias`] constants: an ordered list of candidate source
//! keys per target field, resolved first-match-wins.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;

use super::RawRecord;

/// One logical field and the source keys it may appear under, in priority order.
#[derive(Debug, Clone, Copy)]
pub struct FieldAlias {
    pub target: &'static str,
    pub candidates: &'static [&'static str],
}

impl FieldAlias {
    pub const fn new(target: &'static str, candidates: &'static [&'static str]) -> Self {
        Self { target, candidates }
    }
}

/// Typed, alias-aware view over one raw record.
#[derive(Debug, Clone, Copy)]
pub struct FieldReader<'a> {
    record: &'a RawRecord,
}

impl<'a> FieldReader<'a> {
    pub fn new(record: &'a RawRecord) -> Self {
        Self { record }
    }

    /// First candidate holding a usable value. Absent keys, JSON null and
    /// blank strings are skipped so an empty new-style field does not shadow
    /// a populated legacy one.
    pub fn raw(&self, field: &FieldAlias) -> Option<&'a Value> {
        field
            .candidates
            .iter()
            .filter_map(|key| self.record.get(*key))
            .find(|value| is_present(value))
    }

    /// Resolved value as trimmed text.
    pub fn text(&self, field: &FieldAlias) -> Option<String> {
        self.raw(field).and_then(value_to_text)
    }

    /// Resolved value as a number.
    pub fn number(&self, field: &FieldAlias) -> Option<f64> {
        self.raw(field).and_then(value_to_f64)
    }

    /// Resolved value as a flag; absent or unrecognized values are false.
    pub fn flag(&self, field: &FieldAlias) -> bool {
        self.raw(field).and_then(value_to_flag).unwrap_or(false)
    }

    /// Resolved value as a calendar date.
    pub fn date(&self, field: &FieldAlias) -> Option<NaiveDate> {
        self.raw(field).and_then(value_to_date)
    }

    /// Resolved value as a `YYYY-MM-DD` string.
    pub fn date_string(&self, field: &FieldAlias) -> Option<String> {
        self.date(field).map(|d| d.format("%Y-%m-%d").to_string())
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Render a scalar as text. Objects and arrays are not scalar and yield None.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a number from a JSON number or a numeric string.
///
/// Accepts either decimal separator and a trailing minus sign (`"3.000-"`),
/// both common in ERP exports. When both `.` and `,` appear the last one is
/// the decimal separator (`"1.234,5"`, `"1,234.5"`). A single separator that
/// repeats is thousands grouping. Anything else that does not fit returns
/// `None`.
pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            let (body, negative) = match s.strip_suffix('-') {
                Some(body) => (body.trim(), true),
                None => (s, false),
            };
            let parsed: f64 = normalize_decimal(body)?.parse().ok()?;
            Some(if negative { -parsed } else { parsed })
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Rewrite a localized number into the `1234.5` form `f64::from_str` accepts.
fn normalize_decimal(body: &str) -> Option<String> {
    let last_dot = body.rfind('.');
    let last_comma = body.rfind(',');
    let (decimal, thousands) = match (last_dot, last_comma) {
        (None, None) => return Some(body.to_string()),
        (Some(d), Some(c)) => {
            if d > c {
                ('.', ',')
            } else {
                (',', '.')
            }
        }
        (Some(_), None) => ('.', ','),
        (None, Some(_)) => (',', '.'),
    };

    if body.matches(decimal).count() > 1 {
        // Repeated lone separator: grouping only, every group after the first
        // three digits wide.
        if body.contains(thousands) {
            return None;
        }
        let mut groups = body.split(decimal);
        let head = groups.next()?;
        let well_formed = !head.is_empty()
            && head.trim_start_matches(['+', '-']).len() <= 3
            && groups.all(|g| g.len() == 3 && g.bytes().all(|b| b.is_ascii_digit()));
        return well_formed.then(|| body.replace(decimal, ""));
    }

    let (int_part, frac_part) = body.split_once(decimal)?;
    if frac_part.contains(thousands) {
        return None;
    }
    if int_part.contains(thousands) {
        let mut groups = int_part.split(thousands);
        let head = groups.next()?;
        if head.is_empty() || !groups.all(|g| g.len() == 3) {
            return None;
        }
    }
    Some(format!("{}.{}", int_part.replace(thousands, ""), frac_part))
}

/// Interpret a flag value.
///
/// ERP feeds mark set flags with `"X"`; newer feeds send booleans or 0/1.
pub fn value_to_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "x" | "y" | "yes" | "true" | "1" => Some(true),
            "" | "n" | "no" | "false" | "0" => Some(false),
            _ => None,
        },
        Value::Null => Some(false),
        _ => None,
    }
}

fn odata_date_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/Date\((-?\d+)(?:[+-]\d{4})?\)/$").ok())
        .as_ref()
}

/// Parse a calendar date from the formats the external API has used.
pub fn value_to_date(value: &Value) -> Option<NaiveDate> {
    let s = match value {
        Value::String(s) => s.trim(),
        Value::Number(n) => return parse_compact_date(&n.to_string()),
        _ => return None,
    };
    if s.is_empty() || s.chars().all(|c| c == '0' || c == '-' || c == '.') {
        return None;
    }

    if let Some(caps) = odata_date_regex().and_then(|re| re.captures(s)) {
        let millis: i64 = caps[1].parse().ok()?;
        return DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if let Some(date) = parse_compact_date(s) {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(s, "%d.%m.%Y").ok()
}

fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    if s.len() == 8 && s.chars().all(|c| c.is_ascii_digit()) && s != "00000000" {
        NaiveDate::parse_from_str(s, "%Y%m%d").ok()
    } else {
        None
    }
}

/// Normalize an identifier-like value (equipment, material or order number).
///
/// Purely numeric identifiers arrive zero-padded from some feeds
/// (`"000000000010004711"`) and unpadded from others (`"10004711"`); both
/// must merge under the same natural key.
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        if stripped.is_empty() {
            "0".to_string()
        } else {
            stripped.to_string()
        }
    } else {
        trimmed.to_uppercase()
    }
}
