//! Model assembly from extracted workbook metadata

use super::bim::{Annotation, Column, Database, HierarchyRef, Measure, Partition, Relationship, Table, Variation};
use super::date_tables::{build_date_tables, DATE_HIERARCHY};
use super::format::measure_format_string;
use super::resolver::MeasureTableResolver;
use crate::config::ConverterConfig;
use crate::extractor::{MeasureTableIndex, WorkbookMetadata};
use crate::types::{lineage_tag, CalculationRecord, Classification, DataType, SourceColumn, SourceRelationship, SourceTable};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Outcome counts of attaching measures to a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureStats {
    pub added: usize,
    pub updated: usize,
    /// Existing measures kept because replacement is disabled
    pub skipped: usize,
    pub failed: usize,
}

impl MeasureStats {
    pub fn merge(&mut self, other: MeasureStats) {
        self.added += other.added;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

pub struct ModelAssembler<'a> {
    config: &'a ConverterConfig,
    catalog: &'a [SourceTable],
}

impl<'a> ModelAssembler<'a> {
    pub fn new(config: &'a ConverterConfig) -> Self {
        Self { config, catalog: &[] }
    }

    /// Source tables that measure expressions may reference as `table]`
    pub fn with_catalog(mut self, tables: &'a [SourceTable]) -> Self {
        self.catalog = tables;
        self
    }

    /// Build the model structure: one table per source table, the source
    /// relationships, and the generated date tables. Measures are attached
    /// separately with [`ModelAssembler::attach_measures`].
    pub fn assemble(&self, name: &str, metadata: &WorkbookMetadata) -> Database {
        let mut database = Database::new(name, self.config);

        database.model.tables = metadata.tables.iter().map(|t| self.build_table(t)).collect();
        self.attach_relationships(&mut database, &metadata.relationships);

        let (date_tables, date_relationships) = build_date_tables(&metadata.tables);
        if !date_tables.is_empty() {
            info!(count = date_relationships.len(), "added local date tables");
        }
        database.model.tables.extend(date_tables);
        database.model.relationships.extend(date_relationships);

        database
    }

    pub fn build_table(&self, source: &SourceTable) -> Table {
        let mut table = Table::new(&source.name);
        table.columns = source.columns.iter().map(build_column).collect();
        table.partitions = vec![Partition::m(
            format!("{} Partition", source.name),
            self.config.partition_template.replace("{table}", &source.name),
        )];
        table
    }

    /// Add source relationships, each with a fresh name. Self joins,
    /// duplicates and relationships to tables outside the model are dropped.
    pub fn attach_relationships(&self, database: &mut Database, relationships: &[SourceRelationship]) {
        let known: HashSet<String> = database.model.tables.iter().map(|t| t.name.clone()).collect();
        let mut seen: HashSet<(String, String, String, String)> = database
            .model
            .relationships
            .iter()
            .map(|r| {
                let (a, b, c, d) = r.endpoints();
                (a.to_string(), b.to_string(), c.to_string(), d.to_string())
            })
            .collect();

        for rel in relationships {
            if rel.is_self_join() {
                debug!(table = %rel.from_table, "skipping self join");
                continue;
            }
            if !known.contains(&rel.from_table) || !known.contains(&rel.to_table) {
                warn!(from = %rel.from_table, to = %rel.to_table, "relationship endpoint not in model");
                continue;
            }
            let key = (
                rel.from_table.clone(),
                rel.from_column.clone(),
                rel.to_table.clone(),
                rel.to_column.clone(),
            );
            if !seen.insert(key) {
                continue;
            }
            database.model.relationships.push(Relationship {
                name: lineage_tag(),
                from_table: rel.from_table.clone(),
                from_column: rel.from_column.clone(),
                to_table: rel.to_table.clone(),
                to_column: rel.to_column.clone(),
                join_on_date_behavior: None,
            });
        }
    }

    /// Resolve each measure record to a visible table and attach it.
    ///
    /// Calculated-column records are ignored. A measure that already exists
    /// on its table is replaced or kept according to the configuration.
    pub fn attach_measures(
        &self,
        database: &mut Database,
        records: &[CalculationRecord],
        index: Option<&MeasureTableIndex>,
    ) -> MeasureStats {
        let mut resolver = MeasureTableResolver::for_tables(self.config, database.model.visible_tables())
            .with_catalog(self.catalog);
        if let Some(index) = index {
            resolver = resolver.with_index(index);
        }
        let mut stats = MeasureStats::default();

        for record in records {
            if record.classification != Classification::Measure {
                debug!(name = %record.name, "skipping calculated column");
                continue;
            }
            let name = record.name.trim();
            let expression = record.destination_formula.trim();
            if name.is_empty() || expression.is_empty() {
                warn!(name = %record.name, "measure without name or expression");
                stats.failed += 1;
                continue;
            }

            let resolution = match resolver.resolve(name, expression) {
                Ok(resolution) => resolution,
                Err(e) => {
                    error!(measure = name, error = %e, "measure not attached");
                    stats.failed += 1;
                    continue;
                }
            };
            let Some(table) = database.model.table_mut(&resolution.table) else {
                error!(measure = name, table = %resolution.table, "target table not found");
                stats.failed += 1;
                continue;
            };

            let measure = Measure {
                name: name.to_string(),
                format_string: Some(measure_format_string(name, &resolution.expression).to_string()),
                expression: resolution.expression,
                lineage_tag: lineage_tag(),
            };

            match table.measures.iter().position(|m| m.name == name) {
                Some(existing) if self.config.replace_existing_measures => {
                    table.measures[existing] = measure;
                    stats.updated += 1;
                }
                Some(_) => {
                    debug!(measure = name, "keeping existing measure");
                    stats.skipped += 1;
                }
                None => {
                    table.measures.push(measure);
                    stats.added += 1;
                }
            }
        }

        info!(
            added = stats.added,
            updated = stats.updated,
            skipped = stats.skipped,
            failed = stats.failed,
            "attached measures"
        );
        stats
    }
}

/// Destination column for a typed source column
pub fn build_column(source: &SourceColumn) -> Column {
    let mut column = Column::data(&source.name, source.data_type);
    column.summarize_by = Some(source.summarize_by);
    column.format_string = source.format_string.clone();
    column.annotations = vec![Annotation::new("SummarizationSetBy", "Automatic")];

    if source.data_type == DataType::DateTime {
        column
            .annotations
            .push(Annotation::new("UnderlyingDateTimeDataType", "Date"));
    }
    if let Some(variation) = &source.date_variation {
        column.variations = vec![Variation {
            name: "Variation".to_string(),
            relationship: variation.relationship.clone(),
            default_hierarchy: HierarchyRef {
                table: variation.local_table.clone(),
                hierarchy: DATE_HIERARCHY.to_string(),
            },
            is_default: true,
        }];
    }
    column
}
