//! Workbook metadata extraction
//!
//! Walks the parsed workbook tree and produces typed entities: table names,
//! per-table columns, relationships, raw calculations and the explicit
//! measure → table index. Individual malformed elements are logged and
//! skipped; only an unparseable document is an error.

mod calculations;
mod columns;
mod measure_index;
mod relationships;
mod tables;

pub use calculations::{extract_calculations, normalize_formula_text};
pub use columns::{
    build_column, columns_for_table, infer_column_typing, infer_columns_from_formulas,
    ColumnTyping,
};
pub use measure_index::{build_measure_index, MeasureTableIndex};
pub use relationships::extract_relationships;
pub use tables::discover_table_names;

pub(crate) use columns::strip_source_annotation;

use crate::config::ConverterConfig;
use crate::error::BimResult;
use crate::parser::{parse_workbook, Element};
use crate::types::{RawCalculation, SourceRelationship, SourceTable};
use tracing::{info, warn};

/// Everything the converter needs from one workbook
#[derive(Debug, Clone, Default)]
pub struct WorkbookMetadata {
    pub tables: Vec<SourceTable>,
    pub relationships: Vec<SourceRelationship>,
    pub calculations: Vec<RawCalculation>,
    pub measure_tables: MeasureTableIndex,
}

impl WorkbookMetadata {
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn table(&self, name: &str) -> Option<&SourceTable> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Extract metadata from a parsed workbook tree
pub fn extract(root: &Element, config: &ConverterConfig) -> WorkbookMetadata {
    let calculations = extract_calculations(root);

    let mut tables = Vec::new();
    for name in discover_table_names(root, config) {
        let mut table = SourceTable::new(&name);
        table.columns = columns_for_table(root, &name, config);
        if table.columns.is_empty() {
            table.columns =
                infer_columns_from_formulas(calculations.iter().map(|c| c.formula.as_str()), config);
            if table.columns.is_empty() {
                warn!(table = %name, "no columns declared or inferable");
            } else {
                info!(table = %name, count = table.columns.len(), "inferred columns from formulas");
            }
        }
        tables.push(table);
    }

    let relationships = extract_relationships(root, &tables, config);
    let measure_tables = build_measure_index(root, config);

    info!(
        tables = tables.len(),
        relationships = relationships.len(),
        calculations = calculations.len(),
        "extracted workbook metadata"
    );

    WorkbookMetadata {
        tables,
        relationships,
        calculations,
        measure_tables,
    }
}

/// Parse raw workbook XML and extract its metadata
pub fn extract_from_str(xml: &str, config: &ConverterConfig) -> BimResult<WorkbookMetadata> {
    let root = parse_workbook(xml)?;
    Ok(extract(&root, config))
}
