use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh lineage tag for a model element.
///
/// Every call returns a new random identifier; nothing is cached between calls.
pub fn lineage_tag() -> String {
    Uuid::new_v4().to_string()
}

//==============================================================================
// Destination column typing
//==============================================================================

/// Destination column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    Int64,
    Double,
    String,
    DateTime,
    Boolean,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Int64 => "int64",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::DateTime => "dateTime",
            DataType::Boolean => "boolean",
        }
    }
}

/// Default aggregation behavior of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizeBy {
    None,
    Sum,
}

/// Role hint declared on a source column node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Measure,
    Dimension,
}

impl ColumnRole {
    pub fn parse(role: &str) -> Option<Self> {
        match role.trim().to_lowercase().as_str() {
            "measure" => Some(ColumnRole::Measure),
            "dimension" => Some(ColumnRole::Dimension),
            _ => None,
        }
    }
}

/// Link from a date column to the local date table generated for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateVariation {
    /// Name of the local date table (`LocalDateTable_<id>`)
    pub local_table: String,
    /// Name of the relationship joining the column to the local date table
    pub relationship: String,
}

impl DateVariation {
    pub fn generate() -> Self {
        Self {
            local_table: format!("LocalDateTable_{}", lineage_tag().replace('-', "_")),
            relationship: lineage_tag(),
        }
    }
}

//==============================================================================
// Source workbook entities
//==============================================================================

/// A column discovered in the source workbook, already typed for the destination
#[derive(Debug, Clone, PartialEq)]
pub struct SourceColumn {
    pub name: String,
    /// Raw datatype as declared in the workbook (lowercased), if any
    pub declared_type: Option<String>,
    pub role: Option<ColumnRole>,
    pub data_type: DataType,
    pub summarize_by: SummarizeBy,
    pub format_string: Option<String>,
    /// Present only for date-time columns
    pub date_variation: Option<DateVariation>,
}

/// A table discovered in the source workbook
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    pub name: String,
    pub columns: Vec<SourceColumn>,
}

impl SourceTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&SourceColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// A relationship between two source tables
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRelationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl SourceRelationship {
    pub fn new(
        from_table: impl Into<String>,
        from_column: impl Into<String>,
        to_table: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: to_column.into(),
        }
    }

    pub fn is_self_join(&self) -> bool {
        self.from_table == self.to_table
    }
}

/// A calculated field as declared on a source column node
#[derive(Debug, Clone, PartialEq)]
pub struct RawCalculation {
    pub name: String,
    /// Formula text with line breaks collapsed to spaces
    pub formula: String,
    pub role: Option<ColumnRole>,
    pub declared_type: Option<String>,
}

//==============================================================================
// Translation results
//==============================================================================

/// Whether a translated calculation aggregates (measure) or works row by row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    #[default]
    #[serde(rename = "measure")]
    Measure,
    #[serde(rename = "calculated_column", alias = "calculatedColumn")]
    CalculatedColumn,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Measure => "measure",
            Classification::CalculatedColumn => "calculated_column",
        }
    }
}

/// Output of the formula translator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedFormula {
    pub expression: String,
    pub classification: Classification,
}

/// One entry of a calculation file
///
/// Reads the field spellings older tools wrote (`tableau_formula`,
/// `dax_formula`, `type`, ...) and always writes the camelCase form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationRecord {
    #[serde(alias = "calculatedFieldName")]
    pub name: String,

    #[serde(default, alias = "tableau_formula", alias = "tableauFormula")]
    pub source_formula: String,

    #[serde(
        alias = "dax_formula",
        alias = "daxFormula",
        alias = "expression",
        alias = "dax"
    )]
    pub destination_formula: String,

    /// Records written without a type are treated as measures
    #[serde(default, alias = "type")]
    pub classification: Classification,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lineage_tags_are_unique() {
        let a = lineage_tag();
        let b = lineage_tag();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_date_variation_names_local_table() {
        let variation = DateVariation::generate();
        assert!(variation.local_table.starts_with("LocalDateTable_"));
        assert!(!variation.local_table.contains('-'));
    }

    #[test]
    fn test_calculation_record_reads_legacy_fields() {
        let json = r#"{
            "name": "Total Sales",
            "tableau_formula": "SUM([Sales])",
            "dax_formula": "SUM('orders'[Sales])",
            "type": "measure"
        }"#;
        let record: CalculationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.source_formula, "SUM([Sales])");
        assert_eq!(record.destination_formula, "SUM('orders'[Sales])");
        assert_eq!(record.classification, Classification::Measure);

        let written = serde_json::to_string(&record).unwrap();
        assert!(written.contains("\"destinationFormula\""));
        assert!(written.contains("\"measure\""));
    }

    #[test]
    fn test_classification_accepts_camel_case_alias() {
        let c: Classification = serde_json::from_str("\"calculatedColumn\"").unwrap();
        assert_eq!(c, Classification::CalculatedColumn);
        assert_eq!(c.as_str(), "calculated_column");
    }

    #[test]
    fn test_self_join_detection() {
        let rel = SourceRelationship::new("orders", "id", "orders", "parent_id");
        assert!(rel.is_self_join());
    }
}
