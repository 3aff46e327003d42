//! Relationship discovery: explicit join clauses, then naming conventions

use super::tables::{clean_table_ref, relations};
use crate::config::ConverterConfig;
use crate::parser::Element;
use crate::types::{SourceRelationship, SourceTable};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// `[Table].[Column]`
static QUALIFIED_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[([^\]]+)\]\.\[([^\]]+)\]\s*$").unwrap());

/// Keeps relationship tuples unique and rejects self-joins
#[derive(Default)]
struct RelationshipSet {
    seen: HashSet<SourceRelationship>,
    ordered: Vec<SourceRelationship>,
}

impl RelationshipSet {
    fn insert(&mut self, rel: SourceRelationship) -> bool {
        if rel.is_self_join() {
            debug!(table = %rel.from_table, "skipping self-join");
            return false;
        }
        if !self.seen.insert(rel.clone()) {
            return false;
        }
        self.ordered.push(rel);
        true
    }

    fn relates(&self, a: &str, b: &str) -> bool {
        self.ordered.iter().any(|r| {
            (r.from_table == a && r.to_table == b) || (r.from_table == b && r.to_table == a)
        })
    }
}

/// Extract relationships between the given tables.
///
/// Explicit join clauses are used when the workbook has any; otherwise
/// relationships are inferred from key-column naming conventions.
pub fn extract_relationships(
    root: &Element,
    tables: &[SourceTable],
    config: &ConverterConfig,
) -> Vec<SourceRelationship> {
    let mut set = RelationshipSet::default();

    for clause in join_clauses(root) {
        match parse_join_clause(&clause, config) {
            Some(rel) => {
                set.insert(rel);
            }
            None => warn!(clause = %clause, "could not parse join clause"),
        }
    }

    if set.ordered.is_empty() {
        infer_relationships(tables, &mut set);
        debug!(count = set.ordered.len(), "inferred relationships from column names");
    } else {
        debug!(count = set.ordered.len(), "extracted explicit relationships");
    }

    set.ordered
}

/// Collect `left = right` join clause texts from join relations, either from
/// a `join` attribute or from nested `<clause>` expression trees.
fn join_clauses(root: &Element) -> Vec<String> {
    let mut clauses = Vec::new();

    for relation in relations(root) {
        if relation.attr("type") != Some("join") {
            continue;
        }
        if let Some(join) = relation.non_empty_attr("join") {
            if join.contains('=') {
                clauses.push(join.to_string());
            }
        }
        for clause in relation.children_named("clause") {
            let mut seen = HashSet::new();
            let equalities = clause
                .descendants("expression")
                .into_iter()
                .filter(|e| e.attr("op") == Some("="));
            for eq in equalities {
                let operands: Vec<&str> = eq
                    .children_named("expression")
                    .filter_map(|e| e.attr("op"))
                    .collect();
                if operands.len() == 2 {
                    let text = format!("{} = {}", operands[0], operands[1]);
                    if seen.insert(text.clone()) {
                        clauses.push(text);
                    }
                } else {
                    warn!(operands = operands.len(), "join expression is not binary");
                }
            }
        }
    }

    clauses
}

fn parse_join_clause(clause: &str, config: &ConverterConfig) -> Option<SourceRelationship> {
    let (left, right) = clause.split_once('=')?;
    if right.contains('=') {
        return None;
    }
    let left = QUALIFIED_COLUMN.captures(left)?;
    let right = QUALIFIED_COLUMN.captures(right)?;

    Some(SourceRelationship::new(
        clean_table_ref(&left[1], config),
        left[2].trim(),
        clean_table_ref(&right[1], config),
        right[2].trim(),
    ))
}

/// Singular spellings a foreign-key prefix may use for a table name
fn key_prefixes(table: &str) -> Vec<String> {
    let lower = table.to_lowercase();
    let mut forms = vec![lower.clone()];
    if let Some(stem) = lower.strip_suffix("ies") {
        forms.push(format!("{}y", stem));
    }
    if let Some(stem) = lower.strip_suffix("es") {
        forms.push(stem.to_string());
    }
    if let Some(stem) = lower.strip_suffix('s') {
        forms.push(stem.to_string());
    }
    forms.retain(|f| !f.is_empty());
    forms.dedup();
    forms
}

fn infer_relationships(tables: &[SourceTable], set: &mut RelationshipSet) {
    // <table>_id / <table>id referencing the other table's id column
    for from in tables {
        for to in tables {
            if from.name == to.name {
                continue;
            }
            let Some(target) = to.columns.iter().find(|c| c.name.eq_ignore_ascii_case("id")) else {
                continue;
            };
            let prefixes = key_prefixes(&to.name);
            for column in &from.columns {
                let lower = column.name.to_lowercase();
                let is_reference = prefixes
                    .iter()
                    .any(|p| lower == format!("{}_id", p) || lower == format!("{}id", p));
                if is_reference {
                    set.insert(SourceRelationship::new(
                        &from.name,
                        &column.name,
                        &to.name,
                        &target.name,
                    ));
                }
            }
        }
    }

    // Identically named id columns; the shorter table name is the "one" side
    for (i, first) in tables.iter().enumerate() {
        for second in &tables[i + 1..] {
            if set.relates(&first.name, &second.name) {
                continue;
            }
            for column in &first.columns {
                if !column.name.to_lowercase().contains("id") {
                    continue;
                }
                if second.column(&column.name).is_none() {
                    continue;
                }
                let (many, one) = if first.name.len() <= second.name.len() {
                    (second, first)
                } else {
                    (first, second)
                };
                set.insert(SourceRelationship::new(
                    &many.name,
                    &column.name,
                    &one.name,
                    &column.name,
                ));
            }
        }
    }
}
