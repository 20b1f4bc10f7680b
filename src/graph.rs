//! Logical entity-relationship graph: tables are nodes, foreign keys are edges.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{error::Warning, keys::RelationshipEdge};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphColumn {
    pub name: String,
    pub sql_type: String,
    pub primary_key: bool,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphNode {
    pub table: String,
    pub columns: Vec<GraphColumn>,
}

impl GraphNode {
    pub fn column(&self, name: &str) -> Option<&GraphColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Dependency order for loading tables, parents first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadOrder {
    pub order: Vec<String>,
    /// Tables on a reference cycle between distinct tables; appended to `order` last.
    pub cyclic: Vec<String>,
}

/// Every edge's endpoints exist as node columns; [`SchemaGraph::add_edge`] enforces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemaGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<RelationshipEdge>,
}

impl SchemaGraph {
    pub fn new(nodes: Vec<GraphNode>) -> Self {
        Self {
            nodes,
            edges: Vec::new(),
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[RelationshipEdge] {
        &self.edges
    }

    pub fn node(&self, table: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.table == table)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.node(table).and_then(|n| n.column(column)).is_some()
    }

    /// Adds `edge` if both endpoints exist; otherwise hands back a dangling-reference warning.
    pub fn add_edge(&mut self, edge: RelationshipEdge) -> Result<(), Warning> {
        if self.has_column(&edge.from_table, &edge.from_column)
            && self.has_column(&edge.to_table, &edge.to_column)
        {
            self.edges.push(edge);
            Ok(())
        } else {
            Err(Warning::DanglingReference {
                from_table: edge.from_table,
                from_column: edge.from_column,
                to_table: edge.to_table,
                to_column: edge.to_column,
            })
        }
    }

    /// Referenced table to the tables that depend on it. Self references are left out.
    pub fn adjacency(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for node in &self.nodes {
            graph.entry(node.table.clone()).or_default();
        }
        for edge in self.edges.iter().filter(|e| !e.is_self_reference()) {
            graph
                .entry(edge.to_table.clone())
                .or_default()
                .insert(edge.from_table.clone());
        }
        graph
    }

    pub fn load_order(&self) -> LoadOrder {
        let graph = self.adjacency();
        let mut indegree: BTreeMap<&String, usize> = graph.keys().map(|node| (node, 0)).collect();
        for targets in graph.values() {
            for target in targets {
                *indegree.entry(target).or_insert(0) += 1;
            }
        }

        let mut ready: BTreeSet<&String> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(graph.len());
        while let Some(node) = ready.pop_first() {
            order.push(node.clone());
            if let Some(targets) = graph.get(node) {
                for target in targets {
                    if let Some(count) = indegree.get_mut(target) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            ready.insert(target);
                        }
                    }
                }
            }
        }

        let cyclic: Vec<String> = indegree
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(node, _)| node.clone())
            .collect();
        order.extend(cyclic.iter().cloned());
        LoadOrder { order, cyclic }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Cardinality;

    fn node(table: &str, columns: &[&str]) -> GraphNode {
        GraphNode {
            table: table.to_string(),
            columns: columns
                .iter()
                .map(|name| GraphColumn {
                    name: name.to_string(),
                    sql_type: "INTEGER".to_string(),
                    primary_key: *name == "id",
                    nullable: false,
                })
                .collect(),
        }
    }

    fn edge(from: (&str, &str), to: (&str, &str)) -> RelationshipEdge {
        RelationshipEdge {
            from_table: from.0.to_string(),
            from_column: from.1.to_string(),
            to_table: to.0.to_string(),
            to_column: to.1.to_string(),
            cardinality_hint: Cardinality::ManyToOne,
            confidence: 1.0,
        }
    }

    #[test]
    fn dangling_edges_are_rejected() {
        let mut graph = SchemaGraph::new(vec![node("orders", &["id", "customer_id"])]);
        let err = graph
            .add_edge(edge(("orders", "customer_id"), ("customers", "id")))
            .unwrap_err();
        assert!(matches!(err, Warning::DanglingReference { .. }));
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn load_order_puts_parents_first_and_ignores_self_loops() {
        let mut graph = SchemaGraph::new(vec![
            node("orders", &["id", "customer_id"]),
            node("customers", &["id", "referrer_id"]),
        ]);
        graph
            .add_edge(edge(("orders", "customer_id"), ("customers", "id")))
            .unwrap();
        graph
            .add_edge(edge(("customers", "referrer_id"), ("customers", "id")))
            .unwrap();
        let load = graph.load_order();
        assert_eq!(load.order, vec!["customers", "orders"]);
        assert!(load.cyclic.is_empty());
    }

    #[test]
    fn cycles_between_tables_are_reported() {
        let mut graph = SchemaGraph::new(vec![
            node("a", &["id", "b_id"]),
            node("b", &["id", "a_id"]),
            node("c", &["id"]),
        ]);
        graph.add_edge(edge(("a", "b_id"), ("b", "id"))).unwrap();
        graph.add_edge(edge(("b", "a_id"), ("a", "id"))).unwrap();
        let load = graph.load_order();
        assert_eq!(load.cyclic, vec!["a", "b"]);
        assert_eq!(load.order, vec!["c", "a", "b"]);
    }
}
