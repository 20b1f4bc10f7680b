//! Key & Relationship Detector.
//!
//! Primary keys come from uniqueness and naming; foreign keys from `*_id`
//! column names whose values overlap another table's primary key. All
//! comparisons run in memory over the canonical text of cleaned cells.

use std::collections::HashSet;

use heck::ToSnakeCase;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    clean::CleanedTable,
    config::KeyConfig,
    data::Cell,
    infer::{InferredType, is_identifier_like_name},
};

const STRONG_NAME_CONFIDENCE: f64 = 1.0;
const ID_SUFFIX_CONFIDENCE: f64 = 0.85;
const UNIQUE_ONLY_CONFIDENCE: f64 = 0.75;
const COMPOSITE_CONFIDENCE: f64 = 0.8;
const NAME_ONLY_CONFIDENCE: f64 = 0.4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    PrimaryKey,
    ForeignKey,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
}

impl Cardinality {
    pub fn label(&self) -> &'static str {
        match self {
            Cardinality::OneToOne => "one-to-one",
            Cardinality::ManyToOne => "many-to-one",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyCandidate {
    pub table: String,
    pub columns: Vec<String>,
    pub kind: KeyKind,
    pub confidence: f64,
    pub referenced_table: Option<String>,
    pub referenced_column: Option<String>,
    pub cardinality: Option<Cardinality>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipEdge {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub cardinality_hint: Cardinality,
    pub confidence: f64,
}

impl RelationshipEdge {
    pub fn is_self_reference(&self) -> bool {
        self.from_table == self.to_table
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KeyDetection {
    pub candidates: Vec<KeyCandidate>,
    pub edges: Vec<RelationshipEdge>,
}

impl KeyDetection {
    /// Best primary key candidate of `table`; ties go to the leftmost column.
    pub fn primary_key(&self, table: &str) -> Option<&KeyCandidate> {
        best_primary_key(self.candidates.iter().filter(|c| c.table == table))
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &KeyCandidate> {
        self.candidates
            .iter()
            .filter(|c| c.kind == KeyKind::ForeignKey)
    }
}

/// Highest-confidence primary key candidate; ties go to the earliest.
pub fn best_primary_key<'a>(
    candidates: impl Iterator<Item = &'a KeyCandidate>,
) -> Option<&'a KeyCandidate> {
    candidates
        .filter(|c| c.kind == KeyKind::PrimaryKey)
        .fold(None, |best: Option<&KeyCandidate>, candidate| match best {
            Some(current) if current.confidence >= candidate.confidence => Some(current),
            _ => Some(candidate),
        })
}

/// Key candidates for one table, comparing its `*_id` columns against the
/// primary keys of `siblings` (and its own, for self references).
pub fn detect_keys(table: &CleanedTable, siblings: &[CleanedTable], options: &KeyConfig) -> Vec<KeyCandidate> {
    let mut candidates = primary_key_candidates(table, options);
    let allow_self = !siblings.is_empty() || options.self_reference_in_single_table;

    let mut targets: Vec<(&CleanedTable, Option<PrimaryKey>)> = siblings
        .iter()
        .filter(|sibling| sibling.name() != table.name())
        .map(|sibling| (sibling, resolve_primary_key(sibling, options)))
        .collect();
    if allow_self {
        targets.insert(0, (table, resolve_primary_key(table, options)));
    }
    let own = best_primary_key(candidates.iter()).cloned();
    candidates.extend(
        foreign_key_links(table, own.as_ref(), &targets, options)
            .into_iter()
            .map(|link| link.candidate),
    );
    candidates
}

/// Key candidates and relationship edges for a whole upload batch.
pub fn detect_relationships(tables: &[CleanedTable], options: &KeyConfig) -> KeyDetection {
    let mut detection = KeyDetection::default();
    for table in tables {
        detection
            .candidates
            .extend(primary_key_candidates(table, options));
    }

    let allow_self = tables.len() > 1 || options.self_reference_in_single_table;
    let primary_keys: Vec<Option<PrimaryKey>> = tables
        .iter()
        .map(|table| resolve_primary_key(table, options))
        .collect();

    for table in tables {
        let targets: Vec<(&CleanedTable, Option<PrimaryKey>)> = tables
            .iter()
            .zip(primary_keys.iter())
            .filter(|(target, _)| allow_self || target.name() != table.name())
            .map(|(target, pk)| (target, pk.clone()))
            .collect();
        let own = detection.primary_key(table.name()).cloned();
        for link in foreign_key_links(table, own.as_ref(), &targets, options) {
            detection.candidates.push(link.candidate);
            if let Some(edge) = link.edge {
                info!(
                    "Relationship {}.{} -> {}.{} ({}, confidence {:.2})",
                    edge.from_table,
                    edge.from_column,
                    edge.to_table,
                    edge.to_column,
                    edge.cardinality_hint.label(),
                    edge.confidence
                );
                detection.edges.push(edge);
            }
        }
    }
    detection
}

fn singular(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        format!("{stem}y")
    } else if let Some(stem) = name.strip_suffix("ses") {
        format!("{stem}s")
    } else if let Some(stem) = name.strip_suffix('s') {
        stem.to_string()
    } else {
        name.to_string()
    }
}

fn is_strong_key_name(column: &str, table: &str) -> bool {
    let column = column.to_snake_case();
    let table = table.to_snake_case();
    column == "id"
        || column == "pk"
        || column == format!("{table}_id")
        || column == format!("{}_id", singular(&table))
}

fn is_foreign_key_name(column: &str) -> bool {
    let snake = column.to_snake_case();
    snake.len() > 3 && snake.ends_with("_id")
}

fn rendered_column(table: &CleanedTable, index: usize) -> Vec<Option<String>> {
    table
        .column_cells(index)
        .map(|cell| match cell {
            Cell::Null => None,
            other => Some(table.render_cell(other)),
        })
        .collect()
}

fn all_distinct<'a>(values: impl IntoIterator<Item = &'a String>) -> bool {
    let mut seen = HashSet::new();
    values.into_iter().all(|value| seen.insert(value))
}

fn primary_key_candidates(table: &CleanedTable, options: &KeyConfig) -> Vec<KeyCandidate> {
    let mut candidates = Vec::new();
    let mut unique_single = false;

    for (idx, column) in table.columns().iter().enumerate() {
        if column.inferred_type != InferredType::Identifier {
            continue;
        }
        let values = rendered_column(table, idx);
        if values.iter().any(Option::is_none) {
            continue;
        }
        let unique = all_distinct(values.iter().flatten());
        let strong = is_strong_key_name(&column.name, table.name());
        let id_like = is_foreign_key_name(&column.name) || is_identifier_like_name(&column.name);
        let confidence = match (unique, strong, id_like) {
            (true, true, _) => STRONG_NAME_CONFIDENCE,
            (true, false, true) => ID_SUFFIX_CONFIDENCE,
            (true, false, false) => UNIQUE_ONLY_CONFIDENCE,
            (false, true, _) | (false, false, true) => NAME_ONLY_CONFIDENCE,
            (false, false, false) => continue,
        };
        unique_single |= unique;
        debug!(
            "'{}': primary key candidate '{}' (confidence {confidence:.2})",
            table.name(),
            column.name
        );
        candidates.push(KeyCandidate {
            table: table.name().to_string(),
            columns: vec![column.name.clone()],
            kind: KeyKind::PrimaryKey,
            confidence,
            referenced_table: None,
            referenced_column: None,
            cardinality: None,
        });
    }

    if options.composite_keys && !unique_single {
        candidates.extend(composite_key_candidates(table));
    }
    candidates
}

/// Pairs of fully populated `*_id` columns whose combination is unique.
fn composite_key_candidates(table: &CleanedTable) -> Vec<KeyCandidate> {
    let id_columns: Vec<(usize, Vec<String>)> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, column)| is_foreign_key_name(&column.name))
        .filter_map(|(idx, _)| {
            rendered_column(table, idx)
                .into_iter()
                .collect::<Option<Vec<String>>>()
                .map(|values| (idx, values))
        })
        .collect();

    let mut candidates = Vec::new();
    for (pos, (left_idx, left)) in id_columns.iter().enumerate() {
        for (right_idx, right) in id_columns.iter().skip(pos + 1) {
            let mut seen = HashSet::new();
            if left.iter().zip(right.iter()).all(|pair| seen.insert(pair)) {
                let columns = vec![
                    table.columns()[*left_idx].name.clone(),
                    table.columns()[*right_idx].name.clone(),
                ];
                debug!(
                    "'{}': composite key candidate ({})",
                    table.name(),
                    columns.join(", ")
                );
                candidates.push(KeyCandidate {
                    table: table.name().to_string(),
                    columns,
                    kind: KeyKind::PrimaryKey,
                    confidence: COMPOSITE_CONFIDENCE,
                    referenced_table: None,
                    referenced_column: None,
                    cardinality: None,
                });
            }
        }
    }
    candidates
}

/// A single-column primary key usable as a reference target.
#[derive(Debug, Clone)]
struct PrimaryKey {
    column: String,
    values: HashSet<String>,
}

fn resolve_primary_key(table: &CleanedTable, options: &KeyConfig) -> Option<PrimaryKey> {
    let candidates = primary_key_candidates(table, options);
    let best = best_primary_key(candidates.iter())?;
    if best.columns.len() != 1 || best.confidence <= NAME_ONLY_CONFIDENCE {
        return None;
    }
    let index = table.column_index(&best.columns[0])?;
    let values = rendered_column(table, index).into_iter().flatten().collect();
    Some(PrimaryKey {
        column: best.columns[0].clone(),
        values,
    })
}

struct ForeignKeyLink {
    candidate: KeyCandidate,
    edge: Option<RelationshipEdge>,
}

fn is_name_affine(fk_column: &str, target: &CleanedTable, target_pk: &str) -> bool {
    let fk = fk_column.to_snake_case();
    let stem = fk.trim_end_matches("_id");
    let target_name = target.name().to_snake_case();
    target_name == stem
        || singular(&target_name) == stem
        || target_name == format!("{stem}s")
        || target_pk.to_snake_case() == fk
}

fn foreign_key_links(
    child: &CleanedTable,
    own_primary: Option<&KeyCandidate>,
    targets: &[(&CleanedTable, Option<PrimaryKey>)],
    options: &KeyConfig,
) -> Vec<ForeignKeyLink> {
    let mut links = Vec::new();
    for (idx, column) in child.columns().iter().enumerate() {
        if !is_foreign_key_name(&column.name) {
            continue;
        }
        if own_primary.is_some_and(|pk| pk.columns.len() == 1 && pk.columns[0] == column.name) {
            continue;
        }
        let values: Vec<String> = rendered_column(child, idx).into_iter().flatten().collect();
        let distinct: HashSet<&String> = values.iter().collect();
        if distinct.is_empty() {
            continue;
        }

        let best = targets
            .iter()
            .enumerate()
            .filter_map(|(order, (target, pk))| {
                let pk = pk.as_ref()?;
                if target.name() == child.name() && pk.column == column.name {
                    return None;
                }
                let found = distinct.iter().filter(|v| pk.values.contains(**v)).count();
                let overlap = found as f64 / distinct.len() as f64;
                (overlap >= options.near_miss_floor).then(|| {
                    let linked = overlap >= options.fk_overlap_threshold;
                    let affine = is_name_affine(&column.name, target, &pk.column);
                    (linked, affine, overlap, order, *target, pk)
                })
            })
            // A target that clears the threshold beats a name-affine near miss.
            .max_by(|a, b| {
                a.0.cmp(&b.0)
                    .then(a.1.cmp(&b.1))
                    .then(a.2.total_cmp(&b.2))
                    .then(b.3.cmp(&a.3))
            });

        let Some((_, _, overlap, _, target, pk)) = best else {
            continue;
        };
        let cardinality = if distinct.len() == values.len() {
            Cardinality::OneToOne
        } else {
            Cardinality::ManyToOne
        };
        let candidate = KeyCandidate {
            table: child.name().to_string(),
            columns: vec![column.name.clone()],
            kind: KeyKind::ForeignKey,
            confidence: overlap,
            referenced_table: Some(target.name().to_string()),
            referenced_column: Some(pk.column.clone()),
            cardinality: Some(cardinality),
        };
        let edge = (overlap >= options.fk_overlap_threshold).then(|| RelationshipEdge {
            from_table: child.name().to_string(),
            from_column: column.name.clone(),
            to_table: target.name().to_string(),
            to_column: pk.column.clone(),
            cardinality_hint: cardinality,
            confidence: overlap,
        });
        if edge.is_none() {
            debug!(
                "Near miss {}.{} -> {}.{} (overlap {overlap:.2})",
                child.name(),
                column.name,
                target.name(),
                pk.column
            );
        }
        links.push(ForeignKeyLink { candidate, edge });
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_key_names_include_singular_table_prefix() {
        assert!(is_strong_key_name("id", "orders"));
        assert!(is_strong_key_name("customer_id", "customers"));
        assert!(is_strong_key_name("categoryId", "categories"));
        assert!(!is_strong_key_name("customer_id", "orders"));
    }

    #[test]
    fn foreign_key_names_need_an_id_suffix() {
        assert!(is_foreign_key_name("customer_id"));
        assert!(is_foreign_key_name("customerId"));
        assert!(!is_foreign_key_name("id"));
        assert!(!is_foreign_key_name("paid"));
    }

    #[test]
    fn singular_handles_common_plurals() {
        assert_eq!(singular("customers"), "customer");
        assert_eq!(singular("categories"), "category");
        assert_eq!(singular("addresses"), "address");
        assert_eq!(singular("staff"), "staff");
    }

    #[test]
    fn best_primary_key_prefers_leftmost_on_ties() {
        let make = |column: &str, confidence| KeyCandidate {
            table: "t".into(),
            columns: vec![column.into()],
            kind: KeyKind::PrimaryKey,
            confidence,
            referenced_table: None,
            referenced_column: None,
            cardinality: None,
        };
        let candidates = [make("a", 0.75), make("b", 0.75), make("c", 0.5)];
        assert_eq!(best_primary_key(candidates.iter()).unwrap().columns, vec!["a"]);
    }
}
