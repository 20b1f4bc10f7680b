//! Cell values and the lexical recognisers used by inference and cleaning.
//!
//! Every recogniser here is a pure function of its input string. The
//! precedence between them (boolean, integer, decimal, date) is decided by
//! the inferencer, not here.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];

const BOOLEAN_TRUE: &[&str] = &["true", "t", "yes", "y"];
const BOOLEAN_FALSE: &[&str] = &["false", "f", "no", "n"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
}

impl Value {
    /// Canonical text for the value using the given date formats.
    pub fn render(&self, date_format: &str, datetime_format: &str) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format(date_format).to_string(),
            Value::DateTime(dt) => dt.format(datetime_format).to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Integer(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render("%Y-%m-%d", "%Y-%m-%d %H:%M:%S"))
    }
}

/// One typed cell. `Invalid` keeps the raw text of a non-empty cell that does
/// not parse under its column's type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Cell {
    Null,
    Value(Value),
    Invalid(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Cell::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Text written to delimited output; nulls become empty fields.
    pub fn render(&self, date_format: &str, datetime_format: &str) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Value(value) => value.render(date_format, datetime_format),
            Cell::Invalid(raw) => raw.clone(),
        }
    }
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    let lowered = value.trim().to_ascii_lowercase();
    if BOOLEAN_TRUE.contains(&lowered.as_str()) {
        Some(true)
    } else if BOOLEAN_FALSE.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Strict integer pattern: optional sign, digits, no leading zeros.
pub fn parse_integer(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix(['+', '-'])
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    trimmed.parse::<i64>().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericToken {
    pub value: Decimal,
    pub has_currency_symbol: bool,
    pub has_grouping: bool,
}

/// Locale-tolerant decimal recogniser.
///
/// Strips currency symbols and thousands separators, accepts accounting
/// parentheses for negatives, a decimal comma when unambiguous (`3,5`,
/// `1.234,50`) and scientific notation. Tokens with leading zeros such as
/// `02139` are rejected so codes keep their digits.
pub fn parse_decimal_lenient(value: &str) -> Option<NumericToken> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut body = trimmed;
    let mut parenthesized = false;
    if body.len() > 2 && body.starts_with('(') && body.ends_with(')') {
        parenthesized = true;
        body = body[1..body.len() - 1].trim();
    }

    let mut has_currency_symbol = false;
    let mut has_grouping = false;
    let mut cleaned = String::with_capacity(body.len());
    for ch in body.chars() {
        match ch {
            '0'..='9' | '.' | ',' | '+' | '-' | 'e' | 'E' => cleaned.push(ch),
            '_' | ' ' | '\u{a0}' | '\'' => has_grouping = true,
            c if CURRENCY_SYMBOLS.contains(&c) => has_currency_symbol = true,
            _ => return None,
        }
    }
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let (mantissa, exponent) = match cleaned.find(['e', 'E']) {
        Some(pos) => (cleaned[..pos].to_string(), Some(cleaned[pos + 1..].to_string())),
        None => (cleaned.clone(), None),
    };
    let (sign, unsigned) = match mantissa.strip_prefix(['+', '-']) {
        Some(rest) => (&mantissa[..1], rest.to_string()),
        None => ("", mantissa.clone()),
    };
    if unsigned.contains(['+', '-']) || (parenthesized && !sign.is_empty()) {
        return None;
    }

    let (canonical, grouped) = resolve_separators(&unsigned)?;
    has_grouping |= grouped;

    let integer_part = canonical.split('.').next().unwrap_or_default();
    if integer_part.len() > 1 && integer_part.starts_with('0') {
        return None;
    }
    if integer_part.is_empty() && !canonical.contains('.') {
        return None;
    }

    let mut literal = format!("{sign}{canonical}");
    let parsed = match exponent {
        Some(exp) => {
            if exp.is_empty() || exp == "+" || exp == "-" {
                return None;
            }
            literal.push('e');
            literal.push_str(&exp);
            Decimal::from_scientific(&literal).ok()?
        }
        None => Decimal::from_str(&literal).ok()?,
    };
    let value = if parenthesized { -parsed } else { parsed };

    Some(NumericToken {
        value,
        has_currency_symbol,
        has_grouping,
    })
}

/// Rewrites grouping and decimal separators into a plain `123.45` literal.
fn resolve_separators(unsigned: &str) -> Option<(String, bool)> {
    let commas = unsigned.matches(',').count();
    let dots = unsigned.matches('.').count();

    if commas > 0 && dots > 0 {
        let last_comma = unsigned.rfind(',')?;
        let last_dot = unsigned.rfind('.')?;
        // The right-most separator is the decimal mark.
        let (grouping, decimal) = if last_dot > last_comma {
            (',', '.')
        } else {
            ('.', ',')
        };
        let (whole, fraction) = unsigned.rsplit_once(decimal)?;
        if whole.contains(decimal) || !valid_groups(whole, grouping) {
            return None;
        }
        return Some((format!("{}.{}", whole.replace(grouping, ""), fraction), true));
    }

    if commas == 1 {
        let (whole, fraction) = unsigned.split_once(',')?;
        if fraction.len() != 3 {
            return Some((format!("{whole}.{fraction}"), false));
        }
        if whole.is_empty() || whole.len() > 3 || !whole.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        return Some((format!("{whole}{fraction}"), true));
    }

    if commas > 1 {
        if !valid_groups(unsigned, ',') {
            return None;
        }
        return Some((unsigned.replace(',', ""), true));
    }

    if dots > 1 {
        if !valid_groups(unsigned, '.') {
            return None;
        }
        return Some((unsigned.replace('.', ""), true));
    }

    Some((unsigned.to_string(), false))
}

fn valid_groups(whole: &str, separator: char) -> bool {
    let mut parts = whole.split(separator);
    let Some(first) = parts.next() else {
        return false;
    };
    if first.is_empty() || first.len() > 3 {
        return false;
    }
    parts.all(|group| group.len() == 3 && group.chars().all(|c| c.is_ascii_digit()))
}

pub fn parse_date_with(value: &str, formats: &[String]) -> Option<(NaiveDate, usize)> {
    let trimmed = value.trim();
    formats.iter().enumerate().find_map(|(idx, fmt)| {
        NaiveDate::parse_from_str(trimmed, fmt)
            .ok()
            .map(|date| (date, idx))
    })
}

pub fn parse_datetime_with(value: &str, formats: &[String]) -> Option<(NaiveDateTime, Option<usize>)> {
    let trimmed = value.trim();
    let explicit = formats.iter().enumerate().find_map(|(idx, fmt)| {
        NaiveDateTime::parse_from_str(trimmed, fmt)
            .ok()
            .map(|dt| (dt, Some(idx)))
    });
    explicit.or_else(|| {
        DateTime::parse_from_rfc3339(trimmed)
            .ok()
            .map(|dt| (dt.naive_utc(), None))
    })
}

pub fn is_uuid(value: &str) -> bool {
    let trimmed = value.trim().trim_matches(|c| matches!(c, '{' | '}'));
    Uuid::parse_str(trimmed).is_ok()
}

/// Codes such as `SKU-0042` or UUIDs: no whitespace and at least one digit.
pub fn is_token_like(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && !trimmed.chars().any(char::is_whitespace)
        && (trimmed.chars().any(|c| c.is_ascii_digit()) || is_uuid(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn dec(text: &str) -> Decimal {
        Decimal::from_str(text).unwrap()
    }

    #[test]
    fn parse_integer_rejects_leading_zeros_and_separators() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("-7"), Some(-7));
        assert_eq!(parse_integer("0"), Some(0));
        assert_eq!(parse_integer("02139"), None);
        assert_eq!(parse_integer("1,000"), None);
        assert_eq!(parse_integer("4.0"), None);
    }

    #[test]
    fn parse_decimal_lenient_strips_currency_and_grouping() {
        let token = parse_decimal_lenient("$1,234.50").unwrap();
        assert_eq!(token.value, dec("1234.50"));
        assert!(token.has_currency_symbol);
        assert!(token.has_grouping);

        assert_eq!(parse_decimal_lenient("€ 12").unwrap().value, dec("12"));
        assert_eq!(parse_decimal_lenient("(15.25)").unwrap().value, dec("-15.25"));
        assert_eq!(parse_decimal_lenient("1e3").unwrap().value, dec("1000"));
    }

    #[test]
    fn parse_decimal_lenient_understands_decimal_comma() {
        assert_eq!(parse_decimal_lenient("3,5").unwrap().value, dec("3.5"));
        assert_eq!(parse_decimal_lenient("1.234,56").unwrap().value, dec("1234.56"));
        assert_eq!(parse_decimal_lenient("1,000").unwrap().value, dec("1000"));
        assert_eq!(parse_decimal_lenient("1.234.567").unwrap().value, dec("1234567"));
    }

    #[test]
    fn parse_decimal_lenient_rejects_non_numeric_tokens() {
        assert!(parse_decimal_lenient("abc").is_none());
        assert!(parse_decimal_lenient("2021-01-05").is_none());
        assert!(parse_decimal_lenient("12,34,5").is_none());
        assert!(parse_decimal_lenient("007").is_none());
        assert!(parse_decimal_lenient("$").is_none());
    }

    #[test]
    fn parse_boolean_uses_lexicon() {
        assert_eq!(parse_boolean("Yes"), Some(true));
        assert_eq!(parse_boolean("f"), Some(false));
        assert_eq!(parse_boolean("1"), None);
    }

    #[test]
    fn parse_date_with_reports_matching_format() {
        let formats = vec!["%Y-%m-%d".to_string(), "%d/%m/%Y".to_string()];
        let (date, idx) = parse_date_with("05/01/2021", &formats).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2021, 1, 5).unwrap());
        assert_eq!(idx, 1);
        assert!(parse_date_with("yesterday", &formats).is_none());
    }

    #[test]
    fn parse_datetime_with_accepts_rfc3339() {
        let (dt, idx) = parse_datetime_with("2024-01-01T08:30:00Z", &[]).unwrap();
        assert_eq!(idx, None);
        assert_eq!(dt.format("%H:%M").to_string(), "08:30");
    }

    #[test]
    fn token_like_values_need_a_digit() {
        assert!(is_token_like("SKU-0042"));
        assert!(is_token_like("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_token_like("Alice"));
        assert!(!is_token_like("Room 12"));
    }

    #[test]
    fn cell_render_keeps_invalid_raw_text() {
        let cell = Cell::Invalid("n0t a number".into());
        assert_eq!(cell.render("%Y-%m-%d", "%Y-%m-%d %H:%M:%S"), "n0t a number");
        let value = Cell::Value(Value::Decimal(dec("12.500")));
        assert_eq!(value.render("%Y-%m-%d", "%Y-%m-%d %H:%M:%S"), "12.5");
    }
}
