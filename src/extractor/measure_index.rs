//! Measure → base table index
//!
//! Built from the workbook's column-to-table map (`<cols><map key value>`),
//! column parents, drill paths and worksheet dependencies. It is the explicit
//! mapping that outranks every heuristic in the measure-table resolver.

use super::calculations::calculation_name;
use super::tables::clean_table_ref;
use crate::config::ConverterConfig;
use crate::parser::Element;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, info};

static FIRST_BRACKETED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\]]+\]").unwrap());

const INTERNAL_OBJECT_ID: &str = "[__tableau_internal_object_id__]";

/// Measure name → base table name, first assignment wins
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasureTableIndex {
    entries: HashMap<String, String>,
}

impl MeasureTableIndex {
    pub fn get(&self, measure: &str) -> Option<&str> {
        self.entries.get(measure).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a mapping unless the measure is already assigned
    pub fn assign(&mut self, measure: impl Into<String>, table: impl Into<String>) -> bool {
        let measure = measure.into();
        if self.entries.contains_key(&measure) {
            return false;
        }
        self.entries.insert(measure, table.into());
        true
    }
}

/// `[Age]` → `sample_data` from `value='[sample_data.csv].[Age]'`
fn column_to_table_map(datasources: &[&Element], config: &ConverterConfig) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for datasource in datasources {
        for entry in datasource.find_all_path("connection/cols/map") {
            let (Some(key), Some(value)) = (entry.non_empty_attr("key"), entry.non_empty_attr("value"))
            else {
                continue;
            };
            let table = match value.split_once("].[") {
                Some((table, _)) => table,
                None => match value.split_once('.') {
                    Some((table, _)) => table,
                    None => continue,
                },
            };
            map.entry(key.to_string())
                .or_insert_with(|| clean_table_ref(table, config));
        }
    }
    map
}

fn is_measure(column: &Element) -> bool {
    column.attr("role") == Some("measure")
}

/// Build the measure → table index for a workbook
pub fn build_measure_index(root: &Element, config: &ConverterConfig) -> MeasureTableIndex {
    let mut index = MeasureTableIndex::default();
    let datasources: Vec<&Element> = root
        .descendants("datasource")
        .into_iter()
        .filter(|ds| ds.attr("name") != Some("Parameters"))
        .collect();
    let column_to_table = column_to_table_map(&datasources, config);

    if column_to_table.is_empty() {
        debug!("no column-to-table map in workbook");
    }

    // 1. Calculated measures via their first referenced column, direct measures by name
    for datasource in &datasources {
        for column in datasource.children_named("column").filter(|c| is_measure(c)) {
            let name = calculation_name(column);
            match column.child("calculation") {
                Some(calc) => {
                    let formula = calc.attr("formula").unwrap_or_default();
                    if let Some(dep) = FIRST_BRACKETED.find(formula) {
                        if let Some(table) = column_to_table.get(dep.as_str()) {
                            debug!(measure = %name, column = dep.as_str(), table = %table, "calculated measure");
                            index.assign(name, table.clone());
                        }
                    }
                }
                None => {
                    let raw = column.attr("name").unwrap_or_default();
                    let bracketed = format!("[{}]", name);
                    let table = column_to_table
                        .get(&name)
                        .or_else(|| column_to_table.get(raw))
                        .or_else(|| column_to_table.get(&bracketed));
                    if let Some(table) = table {
                        debug!(measure = %name, table = %table, "direct measure");
                        index.assign(name, table.clone());
                    }
                }
            }
        }
    }

    // 2. Measures declaring a parent table
    for datasource in &datasources {
        for column in datasource.children_named("column").filter(|c| is_measure(c)) {
            if let Some(parent) = column.non_empty_attr("parent-name") {
                index.assign(calculation_name(column), clean_table_ref(parent, config));
            }
        }
    }

    // 3. Internal object-id measures (e.g. "Number of Records") via their drill path
    for datasource in &datasources {
        for column in datasource.children_named("column") {
            if !column.attr("name").unwrap_or_default().starts_with(INTERNAL_OBJECT_ID) {
                continue;
            }
            let Some(caption) = column.non_empty_attr("caption") else {
                continue;
            };
            let field = column
                .find_path("drill-paths/drill-path/field")
                .and_then(|f| f.attr("value").or(Some(f.text.as_str())));
            let table = field
                .and_then(|f| f.split_once("].[").map(|(table, _)| table))
                .map(|table| clean_table_ref(table, config));
            if let Some(table) = table.filter(|t| !t.is_empty()) {
                index.assign(caption, table);
            }
        }
    }

    // 4. Measures only referenced from worksheets
    for worksheet in root.descendants("worksheet") {
        let Some(deps) = worksheet.find_path("table/view/datasource-dependencies") else {
            continue;
        };
        for column in deps.children_named("column").filter(|c| is_measure(c)) {
            let name = calculation_name(column);
            if index.get(&name).is_some() {
                continue;
            }
            if let Some(table) = column_to_table.get(&name) {
                index.assign(name, table.clone());
                continue;
            }
            let via_dependency = deps
                .children_named("column")
                .filter_map(|dep| dep.attr("name"))
                .filter(|dep| *dep != name && column.attr("name") != Some(*dep))
                .find_map(|dep| column_to_table.get(dep));
            if let Some(table) = via_dependency {
                index.assign(name, table.clone());
            }
        }
    }

    // 5. Remaining calculated measures: most-mentioned known table in the formula
    let known_tables: Vec<&String> = column_to_table
        .values()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    for datasource in &datasources {
        for column in datasource.descendants("column").into_iter().filter(|c| is_measure(c)) {
            let name = calculation_name(column);
            if index.get(&name).is_some() {
                continue;
            }
            let Some(formula) = column.child("calculation").and_then(|c| c.attr("formula")) else {
                continue;
            };
            let best = known_tables
                .iter()
                .map(|t| (formula.matches(t.as_str()).count(), *t))
                .filter(|(count, _)| *count > 0)
                .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)));
            if let Some((_, table)) = best {
                index.assign(name, table.clone());
            }
        }
    }

    info!(count = index.len(), "extracted measure base tables");
    index
}
