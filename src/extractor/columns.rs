//! Column discovery and destination typing

use super::tables::{clean_table_ref, relations};
use crate::config::ConverterConfig;
use crate::parser::Element;
use crate::types::{ColumnRole, DataType, DateVariation, SourceColumn, SummarizeBy};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

static BRACKETED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap());

const NUMERIC_KEYWORDS: [&str; 6] = ["amount", "price", "cost", "budget", "rating", "value"];
const DATE_KEYWORDS: [&str; 5] = ["date", "time", "day", "month", "year"];
const BOOLEAN_NAMES: [&str; 4] = ["active", "enabled", "status", "flag"];
const KEY_MARKERS: [&str; 3] = ["id", "key", "code"];

/// Destination typing for a column name and its (optional) declared datatype
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnTyping {
    pub data_type: DataType,
    pub summarize_by: SummarizeBy,
    pub format_string: Option<&'static str>,
}

/// Infer destination type, default aggregation and format from a column name
/// and its declared source datatype. Rules are checked in order:
/// identifiers, numeric amounts, dates, flags, then text.
pub fn infer_column_typing(name: &str, declared: Option<&str>) -> ColumnTyping {
    let lower = name.to_lowercase();
    let declared = declared.map(|d| d.trim().to_lowercase()).unwrap_or_default();

    if declared == "integer" || lower.ends_with("id") || lower.contains("id_") {
        let is_key = KEY_MARKERS.iter().any(|m| lower.contains(m));
        return ColumnTyping {
            data_type: DataType::Int64,
            summarize_by: if is_key { SummarizeBy::None } else { SummarizeBy::Sum },
            format_string: Some("0"),
        };
    }

    if matches!(declared.as_str(), "real" | "currency")
        || NUMERIC_KEYWORDS.iter().any(|k| lower.contains(k))
    {
        return ColumnTyping {
            data_type: DataType::Double,
            summarize_by: SummarizeBy::Sum,
            format_string: Some("0.00"),
        };
    }

    if matches!(declared.as_str(), "date" | "datetime")
        || DATE_KEYWORDS.iter().any(|k| lower.contains(k))
    {
        return ColumnTyping {
            data_type: DataType::DateTime,
            summarize_by: SummarizeBy::None,
            format_string: Some("Long Date"),
        };
    }

    if declared == "boolean" || BOOLEAN_NAMES.contains(&lower.as_str()) {
        return ColumnTyping {
            data_type: DataType::Boolean,
            summarize_by: SummarizeBy::None,
            format_string: None,
        };
    }

    ColumnTyping {
        data_type: DataType::String,
        summarize_by: SummarizeBy::None,
        format_string: None,
    }
}

/// Build a typed source column; date columns get a fresh date-table variation
pub fn build_column(name: &str, declared: Option<&str>, role: Option<ColumnRole>) -> SourceColumn {
    let typing = infer_column_typing(name, declared);
    let date_variation = (typing.data_type == DataType::DateTime).then(DateVariation::generate);

    SourceColumn {
        name: name.to_string(),
        declared_type: declared.map(|d| d.trim().to_lowercase()),
        role,
        data_type: typing.data_type,
        summarize_by: typing.summarize_by,
        format_string: typing.format_string.map(str::to_string),
        date_variation,
    }
}

/// Extract the columns of one table.
///
/// Looks at the `<columns>` block of the table's relation first, then at the
/// connection's metadata records. Duplicate names keep their first occurrence.
/// Returns an empty list when the workbook declares no schema for the table.
pub fn columns_for_table(root: &Element, table: &str, config: &ConverterConfig) -> Vec<SourceColumn> {
    let mut columns = Vec::new();
    let mut seen = HashSet::new();

    for relation in relations(root) {
        let Some(name) = relation.non_empty_attr("name") else {
            continue;
        };
        if clean_table_ref(name, config) != table {
            continue;
        }
        for column in relation.find_all_path("columns/column") {
            let Some(col_name) = column.non_empty_attr("name") else {
                warn!(table, "skipping column without a name");
                continue;
            };
            if !seen.insert(col_name.to_string()) {
                continue;
            }
            let role = column.attr("role").and_then(ColumnRole::parse);
            columns.push(build_column(col_name, column.attr("datatype"), role));
        }
    }

    if columns.is_empty() {
        for record in root.descendants("metadata-record") {
            if record.attr("class") != Some("column") {
                continue;
            }
            let Some(parent) = record.child_text("parent-name") else {
                continue;
            };
            if clean_table_ref(parent, config) != table {
                continue;
            }
            let name = record
                .child_text("remote-name")
                .map(str::to_string)
                .or_else(|| record.child_text("local-name").map(strip_brackets));
            let Some(name) = name else {
                warn!(table, "skipping metadata record without a column name");
                continue;
            };
            if !seen.insert(name.clone()) {
                continue;
            }
            columns.push(build_column(&name, record.child_text("local-type"), None));
        }
    }

    debug!(table, count = columns.len(), "extracted declared columns");
    columns
}

/// Infer columns from the bracketed identifiers used in calculation formulas.
///
/// Used for tables without an explicit schema block. References to source
/// files (`[orders.csv]`), parameters, and other calculations are not columns.
pub fn infer_columns_from_formulas<'a>(
    formulas: impl IntoIterator<Item = &'a str>,
    config: &ConverterConfig,
) -> Vec<SourceColumn> {
    let mut columns = Vec::new();
    let mut seen = HashSet::new();

    for formula in formulas {
        for caps in BRACKETED.captures_iter(formula) {
            let raw = caps[1].trim();
            if raw.is_empty() || raw == "Parameters" || raw.starts_with("Calculation_") {
                continue;
            }
            if config.strip_extension(raw) != raw {
                continue;
            }
            let name = strip_source_annotation(raw, config);
            if seen.insert(name.clone()) {
                columns.push(build_column(&name, None, None));
            }
        }
    }

    columns
}

/// `Department (projects.csv)` → `Department`
pub(crate) fn strip_source_annotation(name: &str, config: &ConverterConfig) -> String {
    if let Some(open) = name.rfind(" (") {
        let inner = name[open + 2..].trim_end();
        if let Some(file) = inner.strip_suffix(')') {
            if config.strip_extension(file) != file {
                return name[..open].trim_end().to_string();
            }
        }
    }
    name.to_string()
}

fn strip_brackets(raw: &str) -> String {
    raw.trim().trim_start_matches('[').trim_end_matches(']').to_string()
}
