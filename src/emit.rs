//! Schema & Diagram Emitter: PostgreSQL-flavoured DDL plus the logical
//! [`SchemaGraph`] for the cleaned tables.
//!
//! Keys and relationships below the constraint cutoff never become hard
//! constraints; they surface as warnings for the narrative instead.

use std::collections::HashSet;

use heck::ToSnakeCase;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    clean::CleanedTable,
    config::KeyConfig,
    data::{Cell, Value},
    error::Warning,
    graph::{GraphColumn, GraphNode, SchemaGraph},
    infer::{Column, InferredType, PhysicalType},
    keys::{KeyCandidate, KeyKind, RelationshipEdge, best_primary_key},
};

const DEFAULT_PRECISION: u32 = 10;
const DEFAULT_SCALE: u32 = 2;
const MAX_PRECISION: u32 = 38;

const RESERVED_WORDS: &[&str] = &[
    "all", "and", "any", "as", "asc", "between", "by", "case", "check", "column", "constraint",
    "create", "date", "default", "desc", "distinct", "else", "end", "foreign", "from", "grant",
    "group", "having", "in", "index", "is", "join", "key", "limit", "not", "null", "offset", "on",
    "or", "order", "primary", "references", "select", "table", "then", "time", "timestamp", "to",
    "union", "unique", "user", "using", "values", "when", "where", "with",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmittedColumn {
    /// Column name in the cleaned table.
    pub source: String,
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmittedTable {
    /// Table name in the cleaned batch.
    pub source: String,
    pub name: String,
    pub columns: Vec<EmittedColumn>,
    pub primary_key: Vec<String>,
}

impl EmittedTable {
    fn column_by_source(&self, source: &str) -> Option<&EmittedColumn> {
        self.columns.iter().find(|c| c.source == source)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmittedSchema {
    pub schema_sql: String,
    pub graph: SchemaGraph,
    pub tables: Vec<EmittedTable>,
    /// Primary keys emitted as constraints.
    pub accepted_keys: Vec<KeyCandidate>,
    /// Relationships emitted as constraints, in cleaned-table names.
    pub accepted_edges: Vec<RelationshipEdge>,
    pub warnings: Vec<Warning>,
}

pub fn emit(
    tables: &[CleanedTable],
    candidates: &[KeyCandidate],
    edges: &[RelationshipEdge],
    options: &KeyConfig,
) -> EmittedSchema {
    let mut warnings = Vec::new();
    let mut accepted_keys = Vec::new();
    let mut emitted = Vec::with_capacity(tables.len());
    let mut table_names = UniqueNames::default();

    for table in tables {
        let primary = best_primary_key(candidates.iter().filter(|c| c.table == table.name()));
        let accepted_pk = match primary {
            Some(pk) if pk.confidence >= options.constraint_cutoff => {
                accepted_keys.push(pk.clone());
                pk.columns.clone()
            }
            Some(pk) => {
                warnings.push(Warning::LowConfidenceKey {
                    table: pk.table.clone(),
                    columns: pk.columns.clone(),
                    confidence: pk.confidence,
                });
                Vec::new()
            }
            None => Vec::new(),
        };
        emitted.push(emit_table(table, &accepted_pk, &mut table_names));
    }

    let mut graph = SchemaGraph::new(
        emitted
            .iter()
            .map(|table| GraphNode {
                table: table.name.clone(),
                columns: table
                    .columns
                    .iter()
                    .map(|c| GraphColumn {
                        name: c.name.clone(),
                        sql_type: c.sql_type.clone(),
                        primary_key: c.primary_key,
                        nullable: c.nullable,
                    })
                    .collect(),
            })
            .collect(),
    );

    let mut accepted_edges = Vec::new();
    let mut constraint_sql = Vec::new();
    let mut index_sql = Vec::new();
    for edge in edges {
        let target_is_key = accepted_keys.iter().any(|pk| {
            pk.table == edge.to_table && pk.columns.len() == 1 && pk.columns[0] == edge.to_column
        });
        if edge.confidence < options.constraint_cutoff || !target_is_key {
            warnings.push(Warning::LowConfidenceRelationship {
                from_table: edge.from_table.clone(),
                from_column: edge.from_column.clone(),
                to_table: edge.to_table.clone(),
                to_column: edge.to_column.clone(),
                confidence: edge.confidence,
            });
            continue;
        }

        let Some((child, child_column, parent, parent_column)) = resolve_endpoints(&emitted, edge) else {
            warn!(
                "Dropping relationship {}.{} -> {}.{}: endpoint not emitted",
                edge.from_table, edge.from_column, edge.to_table, edge.to_column
            );
            warnings.push(dangling(edge));
            continue;
        };
        let sql_edge = RelationshipEdge {
            from_table: child.name.clone(),
            from_column: child_column.name.clone(),
            to_table: parent.name.clone(),
            to_column: parent_column.name.clone(),
            cardinality_hint: edge.cardinality_hint,
            confidence: edge.confidence,
        };
        if let Err(warning) = graph.add_edge(sql_edge) {
            warnings.push(warning);
            continue;
        }

        constraint_sql.push(format!(
            "ALTER TABLE {} ADD CONSTRAINT fk_{}_{} FOREIGN KEY ({}) REFERENCES {} ({});",
            quote_identifier(&child.name),
            child.name,
            child_column.name,
            quote_identifier(&child_column.name),
            quote_identifier(&parent.name),
            quote_identifier(&parent_column.name)
        ));
        index_sql.push(format!(
            "CREATE INDEX idx_{}_{} ON {} ({});",
            child.name,
            child_column.name,
            quote_identifier(&child.name),
            quote_identifier(&child_column.name)
        ));
        accepted_edges.push(edge.clone());
    }

    let near_misses = candidates.iter().filter(|c| {
        c.kind == KeyKind::ForeignKey
            && !edges
                .iter()
                .any(|e| e.from_table == c.table && c.columns.first() == Some(&e.from_column))
    });
    for candidate in near_misses {
        if let (Some(to_table), Some(to_column), Some(from_column)) = (
            &candidate.referenced_table,
            &candidate.referenced_column,
            candidate.columns.first(),
        ) {
            warnings.push(Warning::LowConfidenceRelationship {
                from_table: candidate.table.clone(),
                from_column: from_column.clone(),
                to_table: to_table.clone(),
                to_column: to_column.clone(),
                confidence: candidate.confidence,
            });
        }
    }

    let mut statements: Vec<String> = emitted.iter().map(create_table_sql).collect();
    statements.extend(constraint_sql);
    statements.extend(index_sql);
    let schema_sql = statements.join("\n\n") + "\n";

    info!(
        "Emitted {} table(s), {} primary key(s), {} foreign key(s)",
        emitted.len(),
        accepted_keys.len(),
        accepted_edges.len()
    );

    EmittedSchema {
        schema_sql,
        graph,
        tables: emitted,
        accepted_keys,
        accepted_edges,
        warnings,
    }
}

fn dangling(edge: &RelationshipEdge) -> Warning {
    Warning::DanglingReference {
        from_table: edge.from_table.clone(),
        from_column: edge.from_column.clone(),
        to_table: edge.to_table.clone(),
        to_column: edge.to_column.clone(),
    }
}

fn resolve_endpoints<'a>(
    emitted: &'a [EmittedTable],
    edge: &RelationshipEdge,
) -> Option<(&'a EmittedTable, &'a EmittedColumn, &'a EmittedTable, &'a EmittedColumn)> {
    let child = emitted.iter().find(|t| t.source == edge.from_table)?;
    let parent = emitted.iter().find(|t| t.source == edge.to_table)?;
    let child_column = child.column_by_source(&edge.from_column)?;
    let parent_column = parent.column_by_source(&edge.to_column)?;
    Some((child, child_column, parent, parent_column))
}

/// Snake-cased identifiers, unique within one scope. Quoting happens only when
/// DDL is rendered, so the graph carries plain names.
#[derive(Debug, Default)]
struct UniqueNames {
    taken: HashSet<String>,
}

impl UniqueNames {
    fn claim(&mut self, raw: &str, fallback: &str) -> String {
        let mut base = raw.to_snake_case();
        if base.is_empty() {
            base = fallback.to_string();
        }
        if base.starts_with(|c: char| c.is_ascii_digit()) {
            base = format!("{}_{base}", &fallback[..1]);
        }
        let mut candidate = base.clone();
        let mut suffix = 2;
        while !self.taken.insert(candidate.clone()) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        candidate
    }
}

fn quote_identifier(name: &str) -> String {
    if RESERVED_WORDS.contains(&name) {
        format!("\"{name}\"")
    } else {
        name.to_string()
    }
}

fn emit_table(table: &CleanedTable, primary_key: &[String], names: &mut UniqueNames) -> EmittedTable {
    let name = names.claim(table.name(), "tbl");
    let mut column_names = UniqueNames::default();
    let single_pk = (primary_key.len() == 1).then(|| primary_key[0].as_str());

    let columns: Vec<EmittedColumn> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let is_pk = primary_key.contains(&column.name);
            EmittedColumn {
                source: column.name.clone(),
                name: column_names.claim(&column.name, &format!("col_{idx}")),
                sql_type: sql_type(table, idx, column, single_pk == Some(column.name.as_str())),
                nullable: column.nullable && !is_pk,
                primary_key: is_pk,
            }
        })
        .collect();

    let primary_key = primary_key
        .iter()
        .filter_map(|source| columns.iter().find(|c| &c.source == source))
        .map(|c| c.name.clone())
        .collect();

    EmittedTable {
        source: table.name().to_string(),
        name,
        columns,
        primary_key,
    }
}

fn sql_type(table: &CleanedTable, index: usize, column: &Column, serial_key: bool) -> String {
    match (column.inferred_type, column.physical) {
        (InferredType::Identifier, PhysicalType::Integer) if serial_key => "SERIAL".to_string(),
        (InferredType::Integer | InferredType::Identifier, PhysicalType::Integer) => {
            integer_type(table, index).to_string()
        }
        (InferredType::Float, _) => decimal_type(table, index),
        (InferredType::Boolean, _) => "BOOLEAN".to_string(),
        (InferredType::Date, PhysicalType::DateTime) => "TIMESTAMP".to_string(),
        (InferredType::Date, _) => "DATE".to_string(),
        _ => varchar_type(table, index),
    }
}

fn integer_type(table: &CleanedTable, index: usize) -> &'static str {
    let wide = table.column_cells(index).any(|cell| match cell {
        Cell::Value(Value::Integer(i)) => i32::try_from(*i).is_err(),
        _ => false,
    });
    if wide { "BIGINT" } else { "INTEGER" }
}

/// DECIMAL(10,2) unless observed values need more digits.
fn decimal_type(table: &CleanedTable, index: usize) -> String {
    let mut scale = DEFAULT_SCALE;
    let mut integer_digits = 1;
    for cell in table.column_cells(index) {
        if let Some(value) = cell.value().and_then(Value::as_decimal) {
            let normalized = value.normalize();
            scale = scale.max(normalized.scale());
            let whole = normalized.abs().trunc().to_string();
            integer_digits = integer_digits.max(whole.trim_start_matches('0').len() as u32);
        }
    }
    let scale = scale.min(MAX_PRECISION - 1);
    let precision = DEFAULT_PRECISION.max(integer_digits + scale).min(MAX_PRECISION);
    format!("DECIMAL({precision},{scale})")
}

fn varchar_type(table: &CleanedTable, index: usize) -> String {
    let longest = table
        .column_cells(index)
        .map(|cell| table.render_cell(cell).chars().count())
        .max()
        .unwrap_or(0)
        .max(1);
    format!("VARCHAR({longest})")
}

fn create_table_sql(table: &EmittedTable) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            if c.nullable {
                format!("    {} {}", quote_identifier(&c.name), c.sql_type)
            } else {
                format!("    {} {} NOT NULL", quote_identifier(&c.name), c.sql_type)
            }
        })
        .collect();
    if !table.primary_key.is_empty() {
        lines.push(format!(
            "    CONSTRAINT pk_{} PRIMARY KEY ({})",
            table.name,
            table
                .primary_key
                .iter()
                .map(|column| quote_identifier(column))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    format!(
        "CREATE TABLE {} (\n{}\n);",
        quote_identifier(&table.name),
        lines.join(",\n")
    )
}
