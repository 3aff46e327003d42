//! Column reference cleanup for DAX expressions
//!
//! Every step is idempotent: running [`ReferenceNormalizer::normalize`] on its
//! own output returns the same text.

use super::{inside_brackets, inside_single_quotes, inside_string, qualified_column, quote_table};
use crate::config::ConverterConfig;
use crate::types::{DataType, SourceTable};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// `[orders.csv].[Sales]`
static SOURCE_QUALIFIED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]\.\[([^\[\]]+)\]").unwrap());

/// `[Department (projects.csv)]`
static ANNOTATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]()]*?)\s*\(([^()\[\]]+)\)\s*\]").unwrap());

/// `projects]` (closing bracket without an opening one)
static TABLE_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\w+)\]").unwrap());

/// `Sales[Amount]`; multi-word names need the catalog
static UNQUOTED_QUALIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^\w'\].])([A-Za-z_]\w*)\[").unwrap());

/// `[Amount]` not preceded by a qualifier
static BARE_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^\w'\].])\[([^\[\]]+)\]").unwrap());

const KEY_MARKERS: [&str; 3] = ["id", "key", "code"];

/// The column a bare table reference most likely meant: the first double
/// column, else the first column that is not a key.
pub fn value_column(table: &SourceTable) -> Option<&str> {
    table
        .columns
        .iter()
        .find(|c| c.data_type == DataType::Double)
        .or_else(|| {
            table.columns.iter().find(|c| {
                let lower = c.name.to_lowercase();
                !KEY_MARKERS.iter().any(|m| lower.contains(m))
            })
        })
        .map(|c| c.name.as_str())
}

/// Qualify every bare `[Column]` in `text` with `table`
pub(crate) fn qualify_bare_columns(text: &str, table: &str) -> String {
    BARE_COLUMN
        .replace_all(text, |caps: &Captures| {
            format!("{}{}", &caps[1], qualified_column(table, &caps[2]))
        })
        .into_owned()
}

/// Cleans and repairs column references in destination expressions
pub struct ReferenceNormalizer<'a> {
    config: &'a ConverterConfig,
    default_table: Option<String>,
    /// Known tables and the column a bare `table]` reference resolves to
    catalog: Vec<(String, String)>,
    table_names: Vec<String>,
}

impl<'a> ReferenceNormalizer<'a> {
    pub fn new(config: &'a ConverterConfig) -> Self {
        Self {
            config,
            default_table: None,
            catalog: Vec::new(),
            table_names: Vec::new(),
        }
    }

    /// Qualify bare `[Column]` references with this table
    pub fn with_default_table(mut self, table: impl Into<String>) -> Self {
        self.default_table = Some(table.into());
        self
    }

    /// Enable repair of malformed `table]` references against these tables
    pub fn with_catalog(mut self, tables: &[SourceTable]) -> Self {
        self.catalog = tables
            .iter()
            .filter_map(|t| value_column(t).map(|c| (t.name.clone(), c.to_string())))
            .collect();
        self.table_names = tables.iter().map(|t| t.name.clone()).collect();
        self
    }

    pub fn normalize(&self, expression: &str) -> String {
        let mut text = self.requalify_source_references(expression);
        text = self.strip_annotations(&text);
        text = self.repair_table_references(&text);
        text = self.requote_known_tables(&text);
        text = requote_qualifiers(&text);
        if let Some(table) = &self.default_table {
            text = qualify_bare_columns(&text, table);
        }
        text
    }

    /// `[orders.csv].[Sales]` → `'orders'[Sales]`
    pub fn requalify_source_references(&self, text: &str) -> String {
        SOURCE_QUALIFIED
            .replace_all(text, |caps: &Captures| {
                let table = self.config.strip_extension(caps[1].trim());
                qualified_column(table, &caps[2])
            })
            .into_owned()
    }

    /// `[Department (projects.csv)]` → `[Department]`; other parentheses in
    /// column names are kept.
    pub fn strip_annotations(&self, text: &str) -> String {
        ANNOTATED
            .replace_all(text, |caps: &Captures| {
                let file = caps[2].trim();
                if self.config.strip_extension(file) != file {
                    format!("[{}]", caps[1].trim())
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// The table named by a `(name.ext)` annotation, if any
    pub fn annotation_table<'t>(&self, column: &'t str) -> Option<&'t str> {
        let caps = ANNOTATED.captures(column)?;
        let file = caps.get(2)?.as_str().trim();
        let stem = self.config.strip_extension(file);
        (stem != file).then_some(stem)
    }

    /// `projects]` → `'projects'[Budget]` for tables in the catalog
    pub fn repair_table_references(&self, text: &str) -> String {
        let mut result = text.to_string();
        if self.catalog.is_empty() {
            return result;
        }
        let matches: Vec<_> = TABLE_CLOSE
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let before = &text[..whole.start()];
                if inside_brackets(before) || before.ends_with('\'') {
                    return None;
                }
                let (table, column) = self
                    .catalog
                    .iter()
                    .find(|(t, _)| t.eq_ignore_ascii_case(&caps[1]))?;
                Some((whole.range(), qualified_column(table, column)))
            })
            .collect();

        for (range, replacement) in matches.into_iter().rev() {
            result.replace_range(range, &replacement);
        }
        result
    }

    /// `Sales Data[Amount]` → `'Sales Data'[Amount]` for catalog tables whose
    /// names contain whitespace
    pub fn requote_known_tables(&self, text: &str) -> String {
        let mut result = text.to_string();
        for name in self.table_names.iter().filter(|n| n.contains(char::is_whitespace)) {
            let needle = format!("{}[", name);
            let starts: Vec<usize> = result
                .match_indices(&needle)
                .map(|(i, _)| i)
                .filter(|&i| {
                    let before = &result[..i];
                    let boundary = before
                        .chars()
                        .next_back()
                        .map_or(true, |c| !(c.is_alphanumeric() || matches!(c, '_' | '\'' | ']' | '.')));
                    boundary && !inside_brackets(before) && !inside_string(before) && !inside_single_quotes(before)
                })
                .collect();
            for i in starts.into_iter().rev() {
                result.replace_range(i..i + name.len(), &quote_table(name));
            }
        }
        result
    }
}

/// `Sales[Amount]` → `'Sales'[Amount]`
fn requote_qualifiers(text: &str) -> String {
    UNQUOTED_QUALIFIER
        .replace_all(text, |caps: &Captures| {
            format!("{}{}[", &caps[1], quote_table(&caps[2]))
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::build_column;

    fn projects() -> SourceTable {
        SourceTable {
            name: "projects".to_string(),
            columns: vec![build_column("id", None, None), build_column("Budget", None, None)],
        }
    }

    #[test]
    fn test_strips_annotations() {
        let config = ConverterConfig::default();
        let n = ReferenceNormalizer::new(&config);
        assert_eq!(
            n.normalize("'Sales'[Department (projects.csv)] & [Cost (orders.csv)]"),
            "'Sales'[Department] & [Cost]"
        );
        assert_eq!(n.normalize("[Profit (USD)]"), "[Profit (USD)]");
    }

    #[test]
    fn test_qualifies_bare_columns() {
        let config = ConverterConfig::default();
        let n = ReferenceNormalizer::new(&config).with_default_table("Sales");
        assert_eq!(
            n.normalize("SUM([Revenue]) + 'Costs'[Amount]"),
            "SUM('Sales'[Revenue]) + 'Costs'[Amount]"
        );
    }

    #[test]
    fn test_requotes_unquoted_qualifier() {
        let config = ConverterConfig::default();
        let n = ReferenceNormalizer::new(&config);
        assert_eq!(n.normalize("SUM(Sales[Amount])"), "SUM('Sales'[Amount])");
    }

    #[test]
    fn test_source_qualified_reference() {
        let config = ConverterConfig::default();
        let n = ReferenceNormalizer::new(&config).with_default_table("Sales");
        assert_eq!(n.normalize("[orders.csv].[Sales] * 2"), "'orders'[Sales] * 2");
    }

    #[test]
    fn test_repairs_malformed_table_reference() {
        let config = ConverterConfig::default();
        let tables = vec![projects()];
        let n = ReferenceNormalizer::new(&config).with_catalog(&tables);
        assert_eq!(n.normalize("SUM(projects])"), "SUM('projects'[Budget])");
        // Column names that happen to equal a table name are left alone
        assert_eq!(n.normalize("'Sales'[projects]"), "'Sales'[projects]");
    }

    #[test]
    fn test_requotes_multi_word_catalog_table() {
        let config = ConverterConfig::default();
        let tables = vec![SourceTable {
            name: "Sales Data".to_string(),
            columns: vec![build_column("Amount", None, None)],
        }];
        let n = ReferenceNormalizer::new(&config).with_catalog(&tables);
        assert_eq!(
            n.normalize("SUM(Sales Data[Amount]) + 'Sales Data'[Cost]"),
            "SUM('Sales Data'[Amount]) + 'Sales Data'[Cost]"
        );
        let once = n.normalize("COUNTROWS(Sales Data[Amount])");
        assert_eq!(once, "COUNTROWS('Sales Data'[Amount])");
        assert_eq!(n.normalize(&once), once);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let config = ConverterConfig::default();
        let tables = vec![projects()];
        let n = ReferenceNormalizer::new(&config)
            .with_default_table("Sales")
            .with_catalog(&tables);
        let inputs = [
            "SUM([Revenue (orders.csv)]) / Sales[Units]",
            "projects] + [orders.csv].[Sales]",
            "CALCULATE(SUM('Sales'[Revenue]), ALLEXCEPT('Sales', 'Sales'[Region]))",
        ];
        for input in inputs {
            let once = n.normalize(input);
            assert_eq!(n.normalize(&once), once, "input: {}", input);
        }
    }

    #[test]
    fn test_value_column_prefers_double() {
        assert_eq!(value_column(&projects()), Some("Budget"));
        let names = SourceTable {
            name: "people".to_string(),
            columns: vec![build_column("person_id", None, None), build_column("Name", None, None)],
        };
        assert_eq!(value_column(&names), Some("Name"));
    }

    #[test]
    fn test_annotation_table() {
        let config = ConverterConfig::default();
        let n = ReferenceNormalizer::new(&config);
        assert_eq!(n.annotation_table("[Department (projects.csv)]"), Some("projects"));
        assert_eq!(n.annotation_table("[Department]"), None);
    }
}
