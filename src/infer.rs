//! Type Inferencer: assigns a semantic type to every column of a [`RawTable`].
//!
//! Classification runs over a sample of non-empty cells and applies a fixed
//! precedence: boolean, integer, float, date, then categorical or text. A
//! unique, fully populated integer or token-like text column is promoted to
//! an identifier. The same input always yields the same types.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};
use heck::ToSnakeCase;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    config::InferenceConfig,
    data::{
        Cell, Value, is_token_like, is_uuid, parse_boolean, parse_date_with, parse_datetime_with,
        parse_decimal_lenient, parse_integer,
    },
    ingest::{RawTable, SourceInfo},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InferredType {
    Integer,
    Float,
    Date,
    Boolean,
    Categorical,
    Text,
    Identifier,
}

impl InferredType {
    pub fn label(&self) -> &'static str {
        match self {
            InferredType::Integer => "integer",
            InferredType::Float => "float",
            InferredType::Date => "date",
            InferredType::Boolean => "boolean",
            InferredType::Categorical => "categorical",
            InferredType::Text => "text",
            InferredType::Identifier => "identifier",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, InferredType::Integer | InferredType::Float)
    }
}

/// How typed values of a column are stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalType {
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub inferred_type: InferredType,
    pub physical: PhysicalType,
    pub nullable: bool,
    /// Distinct sampled values divided by sampled values.
    pub sample_cardinality: f64,
    pub null_count: usize,
    /// Chrono format shared by every sampled value, when one exists.
    pub date_format: Option<String>,
    pub format_hint: Option<String>,
}

/// A [`RawTable`] with per-column types and a matrix of typed cells.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedTable {
    raw: RawTable,
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

impl TypedTable {
    pub fn name(&self) -> &str {
        self.raw.name()
    }

    pub fn raw(&self) -> &RawTable {
        &self.raw
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn source_info(&self) -> SourceInfo {
        self.raw.source_info()
    }
}

/// Column names that conventionally hold identifiers.
pub fn is_identifier_like_name(name: &str) -> bool {
    let snake = name.to_snake_case();
    matches!(snake.as_str(), "id" | "pk" | "key" | "code" | "uuid" | "guid")
        || snake.ends_with("_id")
        || snake.ends_with("_key")
        || snake.ends_with("_code")
        || snake.ends_with("_uuid")
}

pub fn infer(raw: &RawTable, options: &InferenceConfig) -> TypedTable {
    let distinct_rows = distinct_row_indices(raw);
    let columns: Vec<Column> = raw
        .column_names()
        .iter()
        .enumerate()
        .map(|(idx, name)| infer_column(raw, idx, name, &distinct_rows, options))
        .collect();

    let rows = raw
        .rows()
        .iter()
        .map(|row| {
            columns
                .iter()
                .zip(row.iter())
                .map(|(column, value)| type_cell(value, column, options))
                .collect()
        })
        .collect();

    info!(
        "'{}': inferred {} column(s) [{}]",
        raw.name(),
        columns.len(),
        columns
            .iter()
            .map(|c| format!("{}: {}", c.name, c.inferred_type.label()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    TypedTable {
        raw: raw.clone(),
        columns,
        rows,
    }
}

/// Indices of the first occurrence of every distinct row.
fn distinct_row_indices(raw: &RawTable) -> Vec<usize> {
    let mut seen = HashSet::new();
    raw.rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| seen.insert(row.as_slice()))
        .map(|(idx, _)| idx)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum DatePlan {
    Date(Option<String>),
    DateTime(Option<String>),
}

fn infer_column(
    raw: &RawTable,
    index: usize,
    name: &str,
    distinct_rows: &[usize],
    options: &InferenceConfig,
) -> Column {
    let null_count = raw
        .column_values(index)
        .filter(|value| options.is_null_token(value))
        .count();
    let sample: Vec<&str> = raw
        .column_values(index)
        .map(str::trim)
        .filter(|value| !options.is_null_token(value))
        .take(options.sample_size)
        .collect();

    if sample.is_empty() {
        debug!("Column '{name}' has no values; typed as text");
        return Column {
            name: name.to_string(),
            inferred_type: InferredType::Text,
            physical: PhysicalType::Text,
            nullable: true,
            sample_cardinality: 0.0,
            null_count,
            date_format: None,
            format_hint: Some("empty column".to_string()),
        };
    }

    let distinct = sample.iter().collect::<HashSet<_>>().len();
    let ratio = distinct as f64 / sample.len() as f64;
    let mut date_format = None;
    let mut format_hint = None;

    let (mut inferred_type, physical) = if sample.iter().all(|v| parse_boolean(v).is_some()) {
        (InferredType::Boolean, PhysicalType::Boolean)
    } else if sample.iter().all(|v| parse_integer(v).is_some()) {
        (InferredType::Integer, PhysicalType::Integer)
    } else if let Some(tokens) = sample
        .iter()
        .map(|v| parse_decimal_lenient(v))
        .collect::<Option<Vec<_>>>()
    {
        let mut hints = Vec::new();
        if tokens.iter().any(|t| t.has_currency_symbol) {
            hints.push("currency symbol");
        }
        if tokens.iter().any(|t| t.has_grouping) {
            hints.push("grouping separators");
        }
        if !hints.is_empty() {
            format_hint = Some(hints.join(", "));
        }
        (InferredType::Float, PhysicalType::Decimal)
    } else if let Some(plan) = plan_dates(&sample, options) {
        match plan {
            DatePlan::Date(fmt) => {
                format_hint = fmt.is_none().then(|| "mixed date formats".to_string());
                date_format = fmt;
                (InferredType::Date, PhysicalType::Date)
            }
            DatePlan::DateTime(fmt) => {
                format_hint = Some(match fmt {
                    Some(_) => "date with time".to_string(),
                    None => "mixed date formats".to_string(),
                });
                date_format = fmt;
                (InferredType::Date, PhysicalType::DateTime)
            }
        }
    } else if ratio <= options.categorical_ratio {
        (InferredType::Categorical, PhysicalType::Text)
    } else {
        (InferredType::Text, PhysicalType::Text)
    };

    // Uniqueness ignores rows that are exact duplicates of an earlier row.
    let deduplicated: Vec<&str> = distinct_rows
        .iter()
        .filter_map(|&row| raw.rows().get(row).and_then(|r| r.get(index)))
        .map(|value| value.trim())
        .filter(|value| !options.is_null_token(value))
        .take(options.sample_size)
        .collect();
    let unique = deduplicated.iter().collect::<HashSet<_>>().len() == deduplicated.len();
    let promotable = match inferred_type {
        InferredType::Integer => true,
        InferredType::Text => {
            deduplicated.iter().all(|v| is_token_like(v)) || is_identifier_like_name(name)
        }
        _ => false,
    };
    if unique && null_count == 0 && promotable {
        if physical == PhysicalType::Text && deduplicated.iter().all(|v| is_uuid(v)) {
            format_hint = Some("uuid".to_string());
        }
        inferred_type = InferredType::Identifier;
    }

    debug!(
        "Column '{name}': {} ({} sampled, ratio {ratio:.2}, {null_count} null)",
        inferred_type.label(),
        sample.len()
    );

    Column {
        name: name.to_string(),
        inferred_type,
        physical,
        nullable: null_count > 0,
        sample_cardinality: ratio,
        null_count,
        date_format,
        format_hint,
    }
}

/// First configured format matching every sample wins; otherwise every value
/// must parse under some format.
fn plan_dates(sample: &[&str], options: &InferenceConfig) -> Option<DatePlan> {
    if let Some(fmt) = options
        .date_formats
        .iter()
        .find(|fmt| sample.iter().all(|v| NaiveDate::parse_from_str(v, fmt).is_ok()))
    {
        return Some(DatePlan::Date(Some(fmt.clone())));
    }
    if let Some(fmt) = options
        .datetime_formats
        .iter()
        .find(|fmt| sample.iter().all(|v| NaiveDateTime::parse_from_str(v, fmt).is_ok()))
    {
        return Some(DatePlan::DateTime(Some(fmt.clone())));
    }

    let mut has_time = false;
    for value in sample {
        if parse_date_with(value, &options.date_formats).is_some() {
            continue;
        }
        if parse_datetime_with(value, &options.datetime_formats).is_some() {
            has_time = true;
            continue;
        }
        return None;
    }
    Some(if has_time {
        DatePlan::DateTime(None)
    } else {
        DatePlan::Date(None)
    })
}

fn type_cell(raw: &str, column: &Column, options: &InferenceConfig) -> Cell {
    if options.is_null_token(raw) {
        return Cell::Null;
    }
    let trimmed = raw.trim();
    let value = match column.physical {
        PhysicalType::Integer => parse_integer(trimmed).map(Value::Integer),
        PhysicalType::Decimal => parse_decimal_lenient(trimmed).map(|t| Value::Decimal(t.value)),
        PhysicalType::Boolean => parse_boolean(trimmed).map(Value::Boolean),
        PhysicalType::Date => column
            .date_format
            .as_deref()
            .and_then(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
            .or_else(|| parse_date_with(trimmed, &options.date_formats).map(|(d, _)| d))
            .map(Value::Date),
        PhysicalType::DateTime => column
            .date_format
            .as_deref()
            .and_then(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
            .or_else(|| parse_datetime_with(trimmed, &options.datetime_formats).map(|(dt, _)| dt))
            .or_else(|| {
                parse_date_with(trimmed, &options.date_formats)
                    .and_then(|(d, _)| d.and_hms_opt(0, 0, 0))
            })
            .map(Value::DateTime),
        PhysicalType::Text => Some(Value::Text(raw.to_string())),
    };
    value.map_or_else(|| Cell::Invalid(raw.to_string()), Cell::Value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(header: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::from_rows(
            "sample",
            header.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn types(typed: &TypedTable) -> Vec<InferredType> {
        typed.columns().iter().map(|c| c.inferred_type).collect()
    }

    #[test]
    fn precedence_prefers_boolean_then_integer_then_float() {
        let raw = table(
            &["flag", "qty", "price"],
            &[&["yes", "3", "1.5"], &["no", "3", "2"], &["yes", "4", "$3.25"]],
        );
        let typed = infer(&raw, &InferenceConfig::default());
        assert_eq!(
            types(&typed),
            vec![InferredType::Boolean, InferredType::Integer, InferredType::Float]
        );
        assert_eq!(
            typed.columns()[2].format_hint.as_deref(),
            Some("currency symbol")
        );
    }

    #[test]
    fn duplicate_rows_do_not_hide_identifier() {
        let raw = table(
            &["id", "name", "signup_date"],
            &[
                &["1", "Alice", "2021-01-05"],
                &["2", "Bob", "2021-01-06"],
                &["1", "Alice", "2021-01-05"],
            ],
        );
        let typed = infer(&raw, &InferenceConfig::default());
        assert_eq!(typed.columns()[0].inferred_type, InferredType::Identifier);
        assert!(matches!(
            typed.columns()[1].inferred_type,
            InferredType::Categorical | InferredType::Text
        ));
        assert_eq!(typed.columns()[2].inferred_type, InferredType::Date);
        assert_eq!(typed.columns()[2].date_format.as_deref(), Some("%Y-%m-%d"));
    }

    #[test]
    fn nullable_integer_stays_integer() {
        let raw = table(&["amount"], &[&["10"], &["20"], &[""], &["40"]]);
        let typed = infer(&raw, &InferenceConfig::default());
        let column = &typed.columns()[0];
        assert_eq!(column.inferred_type, InferredType::Integer);
        assert!(column.nullable);
        assert_eq!(column.null_count, 1);
        assert_eq!(typed.rows()[2][0], Cell::Null);
    }

    #[test]
    fn low_cardinality_strings_are_categorical() {
        let raw = table(
            &["status"],
            &[&["open"], &["closed"], &["open"], &["open"], &["closed"], &["open"]],
        );
        let typed = infer(&raw, &InferenceConfig::default());
        assert_eq!(typed.columns()[0].inferred_type, InferredType::Categorical);
    }

    #[test]
    fn token_like_text_becomes_identifier() {
        let raw = table(&["sku"], &[&["SKU-001"], &["SKU-002"], &["SKU-003"]]);
        let typed = infer(&raw, &InferenceConfig::default());
        assert_eq!(typed.columns()[0].inferred_type, InferredType::Identifier);
        assert_eq!(typed.columns()[0].physical, PhysicalType::Text);
    }

    #[test]
    fn leading_zero_codes_are_not_numeric() {
        let raw = table(&["zip"], &[&["02139"], &["10001"], &["02139"]]);
        let typed = infer(&raw, &InferenceConfig::default());
        assert_ne!(typed.columns()[0].inferred_type, InferredType::Integer);
        assert_ne!(typed.columns()[0].inferred_type, InferredType::Float);
    }

    #[test]
    fn out_of_sample_values_become_invalid_cells() {
        let mut options = InferenceConfig::default();
        options.sample_size = 2;
        let raw = table(&["qty"], &[&["1"], &["2"], &["three"]]);
        let typed = infer(&raw, &options);
        assert_eq!(typed.rows()[2][0], Cell::Invalid("three".to_string()));
    }

    #[test]
    fn datetime_columns_keep_time_of_day() {
        let raw = table(
            &["created"],
            &[&["2024-01-01 08:30:00"], &["2024-01-02 09:00:00"]],
        );
        let typed = infer(&raw, &InferenceConfig::default());
        assert_eq!(typed.columns()[0].inferred_type, InferredType::Date);
        assert_eq!(typed.columns()[0].physical, PhysicalType::DateTime);
    }

    #[test]
    fn identifier_like_names() {
        assert!(is_identifier_like_name("customerId"));
        assert!(is_identifier_like_name("Order ID"));
        assert!(is_identifier_like_name("pk"));
        assert!(!is_identifier_like_name("paid"));
    }
}
