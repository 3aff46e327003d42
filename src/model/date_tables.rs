//! Generated date tables
//!
//! A model with date columns gets one hidden template table plus one hidden
//! local date table per (table, date column) pair. Each local table is a copy
//! of the template's columns and hierarchy, bounded to the years spanned by
//! its source column, and joined to that column by a date-part relationship.

use super::bim::{Annotation, Column, Hierarchy, Level, Partition, Relationship, Table};
use crate::dax::qualified_column;
use crate::types::{lineage_tag, DataType, DateVariation, SourceTable, SummarizeBy};
use std::collections::HashSet;
use tracing::debug;

pub const TEMPLATE_PREFIX: &str = "DateTableTemplate_";
pub const LOCAL_PREFIX: &str = "LocalDateTable_";
pub const DATE_HIERARCHY: &str = "Date Hierarchy";

const TEMPLATE_RANGE: &str = "CALENDAR(DATE(2015,1,1), DATE(2030,12,31))";

/// (name, type, expression, data category, template id, sort-by column)
const CALCULATED_COLUMNS: [(&str, DataType, &str, &str, &str, Option<&str>); 6] = [
    ("Year", DataType::Int64, "YEAR([Date])", "Years", "Year", None),
    ("MonthNo", DataType::Int64, "MONTH([Date])", "MonthOfYear", "MonthNumber", None),
    ("Month", DataType::String, "FORMAT([Date], \"MMMM\")", "Months", "Month", Some("MonthNo")),
    ("QuarterNo", DataType::Int64, "INT(([MonthNo] + 2) / 3)", "QuarterOfYear", "QuarterNumber", None),
    ("Quarter", DataType::String, "\"Qtr \" & [QuarterNo]", "Quarters", "Quarter", Some("QuarterNo")),
    ("Day", DataType::Int64, "DAY([Date])", "DayOfMonth", "Day", None),
];

const HIERARCHY_LEVELS: [&str; 4] = ["Year", "Quarter", "Month", "Day"];

/// True for the template and local date tables this module generates
pub fn is_date_table(table: &Table) -> bool {
    table.name.starts_with(TEMPLATE_PREFIX)
        || table.name.starts_with(LOCAL_PREFIX)
        || table.has_annotation("__PBI_TemplateDateTable")
        || table.has_annotation("__PBI_LocalDateTable")
}

fn date_columns() -> Vec<Column> {
    let mut date = Column::data("Date", DataType::DateTime);
    date.column_type = Some("calculatedTableColumn".to_string());
    date.source_column = Some("[Date]".to_string());
    date.is_name_inferred = true;
    date.is_hidden = true;
    date.format_string = Some("General Date".to_string());
    date.data_category = Some("PaddedDateTableDates".to_string());
    date.summarize_by = Some(SummarizeBy::None);
    date.annotations = vec![Annotation::new("SummarizationSetBy", "User")];

    let mut columns = vec![date];
    for (name, data_type, expression, category, template_id, sort_by) in CALCULATED_COLUMNS {
        let mut column = Column::calculated(name, data_type, expression);
        if data_type == DataType::Int64 {
            column.format_string = Some("0".to_string());
        }
        column.sort_by_column = sort_by.map(str::to_string);
        column.data_category = Some(category.to_string());
        column.summarize_by = Some(SummarizeBy::None);
        column.annotations = vec![
            Annotation::new("SummarizationSetBy", "User"),
            Annotation::new("TemplateId", template_id),
        ];
        columns.push(column);
    }
    columns
}

fn date_hierarchy() -> Hierarchy {
    Hierarchy {
        name: DATE_HIERARCHY.to_string(),
        lineage_tag: lineage_tag(),
        levels: HIERARCHY_LEVELS
            .iter()
            .zip(0u32..)
            .map(|(name, ordinal)| Level {
                name: name.to_string(),
                ordinal,
                column: name.to_string(),
                lineage_tag: lineage_tag(),
            })
            .collect(),
        annotations: vec![Annotation::new("TemplateId", "DateHierarchy")],
    }
}

/// The shared hidden template table
pub fn template_table() -> Table {
    let name = format!("{}{}", TEMPLATE_PREFIX, lineage_tag().replace('-', "_"));
    let mut table = Table::new(&name);
    table.is_hidden = true;
    table.is_private = true;
    table.columns = date_columns();
    table.partitions = vec![Partition::calculated(&name, TEMPLATE_RANGE)];
    table.hierarchies = vec![date_hierarchy()];
    table.annotations = vec![
        Annotation::new("__PBI_TemplateDateTable", "true"),
        Annotation::new("DefaultItem", "DateHierarchy"),
    ];
    table
}

/// Local date table for one source date column, cloned from `template`.
///
/// Cloned members get fresh lineage tags.
pub fn local_date_table(template: &Table, table: &str, column: &str, variation: &DateVariation) -> Table {
    let source = qualified_column(table, column);
    let range = format!(
        "Calendar(Date(Year(MIN({source})), 1, 1), Date(Year(MAX({source})), 12, 31))"
    );

    let mut local = Table::new(&variation.local_table);
    local.is_hidden = true;
    local.show_as_variations_only = true;
    local.columns = template
        .columns
        .iter()
        .cloned()
        .map(|mut c| {
            c.lineage_tag = lineage_tag();
            c
        })
        .collect();
    local.hierarchies = template
        .hierarchies
        .iter()
        .cloned()
        .map(|mut h| {
            h.lineage_tag = lineage_tag();
            for level in &mut h.levels {
                level.lineage_tag = lineage_tag();
            }
            h
        })
        .collect();
    local.partitions = vec![Partition::calculated(&variation.local_table, range)];
    local.annotations = vec![Annotation::new("__PBI_LocalDateTable", "true")];
    local
}

/// Relationship from a source date column to its local date table
pub fn date_relationship(table: &str, column: &str, variation: &DateVariation) -> Relationship {
    Relationship {
        name: variation.relationship.clone(),
        from_table: table.to_string(),
        from_column: column.to_string(),
        to_table: variation.local_table.clone(),
        to_column: "Date".to_string(),
        join_on_date_behavior: Some("datePartOnly".to_string()),
    }
}

/// Date tables and relationships for every date column of `tables`.
///
/// Returns nothing when no column carries a date variation.
pub fn build_date_tables(tables: &[SourceTable]) -> (Vec<Table>, Vec<Relationship>) {
    let mut seen = HashSet::new();
    let date_columns: Vec<(&str, &str, &DateVariation)> = tables
        .iter()
        .flat_map(|t| {
            t.columns
                .iter()
                .filter_map(move |c| c.date_variation.as_ref().map(|v| (t.name.as_str(), c.name.as_str(), v)))
        })
        .filter(|(table, column, _)| seen.insert((*table, *column)))
        .collect();

    if date_columns.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let template = template_table();
    let mut date_tables = Vec::with_capacity(date_columns.len() + 1);
    let mut relationships = Vec::with_capacity(date_columns.len());

    for (table, column, variation) in date_columns {
        debug!(table, column, local = %variation.local_table, "generating local date table");
        date_tables.push(local_date_table(&template, table, column, variation));
        relationships.push(date_relationship(table, column, variation));
    }
    date_tables.insert(0, template);

    (date_tables, relationships)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::build_column;

    fn orders() -> SourceTable {
        SourceTable {
            name: "orders".to_string(),
            columns: vec![
                build_column("order_id", None, None),
                build_column("Order Date", Some("date"), None),
                build_column("Ship Date", Some("date"), None),
            ],
        }
    }

    #[test]
    fn test_template_layout() {
        let template = template_table();
        assert!(template.name.starts_with(TEMPLATE_PREFIX));
        assert!(template.is_hidden && template.is_private);

        let names: Vec<_> = template.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Date", "Year", "MonthNo", "Month", "QuarterNo", "Quarter", "Day"]);
        assert_eq!(template.column("Month").unwrap().sort_by_column.as_deref(), Some("MonthNo"));

        let levels: Vec<_> = template.hierarchies[0].levels.iter().map(|l| l.column.as_str()).collect();
        assert_eq!(levels, vec!["Year", "Quarter", "Month", "Day"]);
        assert!(is_date_table(&template));
    }

    #[test]
    fn test_one_local_table_per_date_column() {
        let tables = vec![orders()];
        let (date_tables, relationships) = build_date_tables(&tables);

        // template + two local tables
        assert_eq!(date_tables.len(), 3);
        assert_eq!(relationships.len(), 2);

        let order_date = tables[0].column("Order Date").unwrap();
        let variation = order_date.date_variation.as_ref().unwrap();
        let local = date_tables.iter().find(|t| t.name == variation.local_table).unwrap();
        assert!(local.show_as_variations_only);
        assert_eq!(
            local.partitions[0].source.expression,
            "Calendar(Date(Year(MIN('orders'[Order Date])), 1, 1), Date(Year(MAX('orders'[Order Date])), 12, 31))"
        );

        let rel = relationships.iter().find(|r| r.from_column == "Order Date").unwrap();
        assert_eq!(rel.name, variation.relationship);
        assert_eq!(rel.to_table, variation.local_table);
        assert_eq!(rel.to_column, "Date");
        assert_eq!(rel.join_on_date_behavior.as_deref(), Some("datePartOnly"));
    }

    #[test]
    fn test_local_tables_get_fresh_lineage_tags() {
        let template = template_table();
        let variation = DateVariation::generate();
        let local = local_date_table(&template, "orders", "Order Date", &variation);

        for (a, b) in template.columns.iter().zip(&local.columns) {
            assert_eq!(a.name, b.name);
            assert_ne!(a.lineage_tag, b.lineage_tag);
        }
    }

    #[test]
    fn test_no_date_columns() {
        let tables = vec![SourceTable {
            name: "people".to_string(),
            columns: vec![build_column("Name", None, None)],
        }];
        let (date_tables, relationships) = build_date_tables(&tables);
        assert!(date_tables.is_empty());
        assert!(relationships.is_empty());
    }
}
