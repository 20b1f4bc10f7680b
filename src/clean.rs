//! Cleaner: removes duplicate rows, resolves missing values and canonicalises
//! cell text, logging every step as a [`CleaningAction`].
//!
//! Cleaning never fails. A cell that cannot be repaired keeps its raw text and
//! is reported as unresolved.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::{
    config::CleaningConfig,
    data::{Cell, Value},
    error::Warning,
    infer::{Column, InferredType, PhysicalType, TypedTable},
    ingest::SourceInfo,
    io_utils, stats,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    DuplicateRow,
    MissingValueFill,
    FormatNormalization,
    ColumnDropped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Applied,
    Unresolved,
}

/// One logged remediation step. `rows` are data-row indices of the typed table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleaningAction {
    pub kind: ActionKind,
    pub column: Option<String>,
    pub rows: Vec<usize>,
    pub outcome: ActionOutcome,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedTable {
    source: SourceInfo,
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
    source_row_indices: Vec<usize>,
    raw_row_count: usize,
    dropped_columns: Vec<String>,
    actions: Vec<CleaningAction>,
    warnings: Vec<Warning>,
    date_format: String,
    datetime_format: String,
}

impl CleanedTable {
    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn source(&self) -> &SourceInfo {
        &self.source
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

    /// Row count of the typed table this was cleaned from.
    pub fn raw_row_count(&self) -> usize {
        self.raw_row_count
    }

    /// For each kept row, its index in the typed table.
    pub fn source_row_indices(&self) -> &[usize] {
        &self.source_row_indices
    }

    pub fn dropped_columns(&self) -> &[String] {
        &self.dropped_columns
    }

    pub fn actions(&self) -> &[CleaningAction] {
        &self.actions
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_cells(&self, index: usize) -> impl Iterator<Item = &Cell> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    /// Number of rows removed as duplicates, taken from the action log.
    pub fn duplicates_removed(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.kind == ActionKind::DuplicateRow)
            .map(|a| a.rows.len())
            .sum()
    }

    /// Canonical text of a cell under this table's date formats.
    pub fn render_cell(&self, cell: &Cell) -> String {
        cell.render(&self.date_format, &self.datetime_format)
    }

    pub fn rendered_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|cell| self.render_cell(cell)).collect())
            .collect()
    }

    /// Cleaned rows with a header line, ready for download.
    pub fn to_delimited(&self, delimiter: u8) -> anyhow::Result<String> {
        let headers: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        io_utils::write_delimited(Some(&headers), self.rendered_rows().iter(), delimiter)
    }
}

pub fn clean(typed: &TypedTable, options: &CleaningConfig) -> CleanedTable {
    let mut cleaner = Cleaner::new(typed, options);
    cleaner.remove_duplicates();
    cleaner.drop_empty_columns();
    cleaner.fill_missing_values();
    cleaner.log_normalizations();
    cleaner.finish()
}

struct Cleaner<'a> {
    typed: &'a TypedTable,
    options: &'a CleaningConfig,
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
    kept: Vec<usize>,
    dropped: Vec<String>,
    actions: Vec<CleaningAction>,
    warnings: Vec<Warning>,
}

impl<'a> Cleaner<'a> {
    fn new(typed: &'a TypedTable, options: &'a CleaningConfig) -> Self {
        let rows = typed
            .rows()
            .iter()
            .map(|row| row.iter().map(canonical_cell).collect())
            .collect();
        Self {
            typed,
            options,
            columns: typed.columns().to_vec(),
            rows,
            kept: (0..typed.row_count()).collect(),
            dropped: Vec::new(),
            actions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn table_name(&self) -> &str {
        self.typed.name()
    }

    fn remove_duplicates(&mut self) {
        let mut first_seen: HashMap<&[Cell], usize> = HashMap::new();
        let mut removed = HashSet::new();
        for (idx, row) in self.rows.iter().enumerate() {
            match first_seen.get(row.as_slice()) {
                Some(&original) => {
                    self.actions.push(CleaningAction {
                        kind: ActionKind::DuplicateRow,
                        column: None,
                        rows: vec![idx],
                        outcome: ActionOutcome::Applied,
                        description: format!("removed row {idx}, a duplicate of row {original}"),
                    });
                    removed.insert(idx);
                }
                None => {
                    first_seen.insert(row.as_slice(), idx);
                }
            }
        }
        if removed.is_empty() {
            return;
        }
        info!(
            "'{}': removed {} duplicate row(s)",
            self.table_name(),
            removed.len()
        );
        let rows = std::mem::take(&mut self.rows);
        let (kept, rows): (Vec<usize>, Vec<Vec<Cell>>) = rows
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !removed.contains(idx))
            .unzip();
        self.kept = kept;
        self.rows = rows;
    }

    fn drop_empty_columns(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let empty: Vec<usize> = (0..self.columns.len())
            .filter(|&col| self.rows.iter().all(|row| row[col].is_null()))
            .collect();
        if empty.is_empty() {
            return;
        }
        for &col in empty.iter().rev() {
            let column = self.columns.remove(col);
            for row in &mut self.rows {
                row.remove(col);
            }
            debug!("'{}': dropped empty column '{}'", self.typed.name(), column.name);
            self.dropped.insert(0, column.name);
        }
        for name in &self.dropped {
            self.actions.push(CleaningAction {
                kind: ActionKind::ColumnDropped,
                column: Some(name.clone()),
                rows: Vec::new(),
                outcome: ActionOutcome::Applied,
                description: format!("dropped column '{name}' because every value is missing"),
            });
        }
    }

    fn fill_missing_values(&mut self) {
        for col in 0..self.columns.len() {
            let missing: Vec<usize> = self
                .rows
                .iter()
                .enumerate()
                .filter(|(_, row)| row[col].is_null())
                .map(|(idx, _)| idx)
                .collect();
            if missing.is_empty() {
                continue;
            }
            let column = &self.columns[col];
            let original_rows: Vec<usize> = missing.iter().map(|&idx| self.kept[idx]).collect();
            let fill = self.fill_value(col);
            let name = column.name.clone();

            let (outcome, description) = match fill {
                Some((value, how)) => {
                    let rendered = value.render(&self.options.date_format, &self.options.datetime_format);
                    for &idx in &missing {
                        self.rows[idx][col] = Cell::Value(value.clone());
                    }
                    (
                        ActionOutcome::Applied,
                        format!(
                            "filled {} missing value(s) with the {how} {rendered}",
                            missing.len()
                        ),
                    )
                }
                None => {
                    let reason = match column.inferred_type {
                        InferredType::Date | InferredType::Text | InferredType::Identifier => {
                            format!("{} values are never guessed", column.inferred_type.label())
                        }
                        _ => {
                            self.warnings.push(Warning::PartialCleaning {
                                table: self.typed.name().to_string(),
                                column: name.clone(),
                                rows: original_rows.clone(),
                                message: "no valid values to derive a fill from".to_string(),
                            });
                            "no valid values to derive a fill from".to_string()
                        }
                    };
                    (
                        ActionOutcome::Unresolved,
                        format!("left {} missing value(s) empty: {reason}", missing.len()),
                    )
                }
            };
            self.actions.push(CleaningAction {
                kind: ActionKind::MissingValueFill,
                column: Some(name),
                rows: original_rows,
                outcome,
                description,
            });
        }
    }

    /// Median for numeric columns, mode for boolean and categorical ones.
    fn fill_value(&self, col: usize) -> Option<(Value, &'static str)> {
        let column = &self.columns[col];
        let values = self.rows.iter().filter_map(|row| row[col].value());
        match column.inferred_type {
            InferredType::Integer => {
                let numbers: Vec<Decimal> = values.filter_map(Value::as_decimal).collect();
                let median = stats::median(&numbers)?
                    .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                    .to_i64()?;
                Some((Value::Integer(median), "median"))
            }
            InferredType::Float => {
                let numbers: Vec<Decimal> = values.filter_map(Value::as_decimal).collect();
                let median = stats::median(&numbers)?.normalize();
                Some((Value::Decimal(median), "median"))
            }
            InferredType::Boolean | InferredType::Categorical => {
                stats::mode(values.cloned()).map(|value| (value, "mode"))
            }
            InferredType::Date | InferredType::Text | InferredType::Identifier => None,
        }
    }

    fn log_normalizations(&mut self) {
        let typed = self.typed;
        let raw_rows = typed.raw().rows();
        let typed_columns = typed.columns();
        for (col, column) in self.columns.iter().enumerate() {
            let Some(raw_col) = typed_columns.iter().position(|c| c.name == column.name) else {
                continue;
            };
            let mut normalized = Vec::new();
            let mut malformed = Vec::new();
            for (idx, row) in self.rows.iter().enumerate() {
                let original = self.kept[idx];
                let raw = raw_rows
                    .get(original)
                    .and_then(|r| r.get(raw_col))
                    .map(String::as_str)
                    .unwrap_or("");
                match &row[col] {
                    Cell::Invalid(_) => malformed.push(original),
                    Cell::Value(value) => {
                        // Filled cells were empty in the source and are logged as fills.
                        if typed.rows()[original][raw_col].is_null() {
                            continue;
                        }
                        let rendered =
                            value.render(&self.options.date_format, &self.options.datetime_format);
                        if rendered != raw {
                            normalized.push(original);
                        }
                    }
                    Cell::Null => {}
                }
            }

            if !normalized.is_empty() {
                let description = self.normalization_description(column, normalized.len());
                self.actions.push(CleaningAction {
                    kind: ActionKind::FormatNormalization,
                    column: Some(column.name.clone()),
                    rows: normalized,
                    outcome: ActionOutcome::Applied,
                    description,
                });
            }
            if !malformed.is_empty() {
                let message = format!(
                    "{} value(s) do not parse as {}; kept as written",
                    malformed.len(),
                    column.inferred_type.label()
                );
                self.actions.push(CleaningAction {
                    kind: ActionKind::FormatNormalization,
                    column: Some(column.name.clone()),
                    rows: malformed.clone(),
                    outcome: ActionOutcome::Unresolved,
                    description: message.clone(),
                });
                self.warnings.push(Warning::PartialCleaning {
                    table: typed.name().to_string(),
                    column: column.name.clone(),
                    rows: malformed,
                    message,
                });
            }
        }
    }

    fn normalization_description(&self, column: &Column, count: usize) -> String {
        match column.physical {
            PhysicalType::Integer | PhysicalType::Decimal => match &column.format_hint {
                Some(hint) => format!("re-emitted {count} numeric value(s) as plain numbers ({hint} removed)"),
                None => format!("re-emitted {count} numeric value(s) as plain numbers"),
            },
            PhysicalType::Boolean => format!("rewrote {count} boolean value(s) as true/false"),
            PhysicalType::Date => format!(
                "rewrote {count} date(s) in canonical form {}",
                self.options.date_format
            ),
            PhysicalType::DateTime => format!(
                "rewrote {count} timestamp(s) in canonical form {}",
                self.options.datetime_format
            ),
            PhysicalType::Text => format!("trimmed surrounding whitespace from {count} value(s)"),
        }
    }

    fn finish(self) -> CleanedTable {
        let mut columns = self.columns;
        for (col, column) in columns.iter_mut().enumerate() {
            column.null_count = self.rows.iter().filter(|row| row[col].is_null()).count();
            column.nullable = column.null_count > 0;
        }
        let mut source = self.typed.source_info();
        source.column_count = columns.len();

        CleanedTable {
            source,
            columns,
            rows: self.rows,
            source_row_indices: self.kept,
            raw_row_count: self.typed.row_count(),
            dropped_columns: self.dropped,
            actions: self.actions,
            warnings: self.warnings,
            date_format: self.options.date_format.clone(),
            datetime_format: self.options.datetime_format.clone(),
        }
    }
}

/// Text cells compare and export trimmed.
fn canonical_cell(cell: &Cell) -> Cell {
    match cell {
        Cell::Value(Value::Text(text)) => Cell::Value(Value::Text(text.trim().to_string())),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::InferenceConfig, infer::infer, ingest::RawTable};

    fn cleaned(header: &[&str], rows: &[&[&str]]) -> CleanedTable {
        let raw = RawTable::from_rows(
            "people",
            header.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        );
        let typed = infer(&raw, &InferenceConfig::default());
        clean(&typed, &CleaningConfig::default())
    }

    #[test]
    fn duplicate_rows_are_removed_and_logged() {
        let table = cleaned(
            &["id", "name", "signup_date"],
            &[
                &["1", "Alice", "2021-01-05"],
                &["2", "Bob", "2021-01-06"],
                &["1", "Alice", "2021-01-05"],
            ],
        );
        assert_eq!(table.row_count(), 2);
        let duplicates: Vec<_> = table
            .actions()
            .iter()
            .filter(|a| a.kind == ActionKind::DuplicateRow)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].rows, vec![2]);
        assert_eq!(table.duplicates_removed(), 1);
        assert_eq!(table.source_row_indices(), &[0, 1]);
    }

    #[test]
    fn integer_nulls_take_the_median() {
        let table = cleaned(&["amount"], &[&["10"], &["20"], &[""], &["40"]]);
        assert_eq!(table.rows()[2][0], Cell::Value(Value::Integer(20)));
        let fill = table
            .actions()
            .iter()
            .find(|a| a.kind == ActionKind::MissingValueFill)
            .unwrap();
        assert_eq!(fill.rows, vec![2]);
        assert_eq!(fill.outcome, ActionOutcome::Applied);
        assert!(!table.columns()[0].nullable);
    }

    #[test]
    fn integer_median_rounds_half_away_from_zero() {
        let table = cleaned(&["qty"], &[&["1"], &["2"], &[""], &["2"], &["1"]]);
        assert_eq!(table.rows()[2][0], Cell::Value(Value::Integer(2)));
    }

    #[test]
    fn categorical_nulls_take_the_first_mode() {
        let table = cleaned(
            &["status", "n"],
            &[
                &["open", "1"],
                &["closed", "2"],
                &["", "3"],
                &["closed", "4"],
                &["open", "5"],
                &["open", "6"],
                &["closed", "7"],
            ],
        );
        assert_eq!(table.columns()[0].inferred_type, InferredType::Categorical);
        assert_eq!(table.rows()[2][0], Cell::Value(Value::Text("open".into())));
    }

    #[test]
    fn text_and_date_nulls_stay_null_and_unresolved() {
        let table = cleaned(
            &["note", "seen"],
            &[&["alpha beta", "2021-01-01"], &["", ""], &["gamma delta", "2021-01-03"]],
        );
        assert!(table.rows()[1][0].is_null());
        assert!(table.rows()[1][1].is_null());
        let unresolved = table
            .actions()
            .iter()
            .filter(|a| a.kind == ActionKind::MissingValueFill)
            .filter(|a| a.outcome == ActionOutcome::Unresolved)
            .count();
        assert_eq!(unresolved, 2);
        assert!(table.warnings().is_empty());
    }

    #[test]
    fn fully_empty_columns_are_dropped() {
        let table = cleaned(&["a", "empty"], &[&["1", ""], &["2", "n/a"]]);
        assert_eq!(table.columns().len(), 1);
        assert_eq!(table.dropped_columns(), &["empty".to_string()]);
        assert!(
            table
                .actions()
                .iter()
                .any(|a| a.kind == ActionKind::ColumnDropped)
        );
        assert_eq!(table.source().column_count, 1);
    }

    #[test]
    fn currency_values_are_normalized() {
        let table = cleaned(&["price"], &[&["$1,200.50"], &["$3.10"], &["7"]]);
        assert_eq!(table.rendered_rows()[0][0], "1200.5");
        let action = table
            .actions()
            .iter()
            .find(|a| a.kind == ActionKind::FormatNormalization)
            .unwrap();
        assert_eq!(action.rows, vec![0, 1]);
    }

    #[test]
    fn malformed_cells_are_kept_and_warned() {
        let mut options = InferenceConfig::default();
        options.sample_size = 3;
        let raw = RawTable::from_rows(
            "orders",
            vec!["qty".into()],
            vec![
                vec!["1".into()],
                vec!["2".into()],
                vec!["3".into()],
                vec!["lots".into()],
            ],
        );
        let typed = infer(&raw, &options);
        let table = clean(&typed, &CleaningConfig::default());
        assert_eq!(table.rows()[3][0], Cell::Invalid("lots".into()));
        assert_eq!(table.warnings().len(), 1);
        assert!(table.actions().iter().any(|a| {
            a.kind == ActionKind::FormatNormalization && a.outcome == ActionOutcome::Unresolved
        }));
    }

    #[test]
    fn to_delimited_writes_header_and_canonical_values() {
        let table = cleaned(&["flag", "day"], &[&["Yes", "05/01/2021"], &["no", "06/01/2021"]]);
        let text = table.to_delimited(b',').unwrap();
        assert_eq!(
            text,
            "\"flag\",\"day\"\n\"true\",\"2021-01-05\"\n\"false\",\"2021-01-06\"\n"
        );
    }
}
