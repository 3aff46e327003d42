//! Destination model document (`Model.bim`)
//!
//! Field names follow the tabular model JSON layout (camelCase). Optional
//! properties are omitted from the written document when unset.

use crate::config::ConverterConfig;
use crate::error::BimResult;
use crate::types::{lineage_tag, DataType, SummarizeBy};
use serde::{Deserialize, Serialize};

/// Editor serialization options carried as a model annotation
const SERIALIZE_OPTIONS: &str = "{\n  \"IgnoreInferredObjects\": true,\n  \"IgnoreInferredProperties\": true,\n  \"IgnoreTimestamps\": true,\n  \"SplitMultilineStrings\": true,\n  \"PrefixFilenames\": false,\n  \"LocalTranslations\": false,\n  \"LocalPerspectives\": false,\n  \"LocalRelationships\": false,\n  \"Levels\": [\"Data Sources\", \"Shared Expressions\", \"Perspectives\", \"Relationships\", \"Roles\", \"Tables\", \"Tables/Columns\", \"Tables/Hierarchies\", \"Tables/Measures\", \"Tables/Partitions\", \"Tables/Calculation Items\", \"Translations\"]\n}";

fn is_false(value: &bool) -> bool {
    !*value
}

//==============================================================================
// Document root
//==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub name: String,
    pub compatibility_level: u32,
    pub model: Model,
}

impl Database {
    /// Empty model with the header properties taken from `config`
    pub fn new(name: impl Into<String>, config: &ConverterConfig) -> Self {
        Self {
            name: name.into(),
            compatibility_level: config.compatibility_level,
            model: Model {
                culture: config.culture.clone(),
                data_access_options: Some(DataAccessOptions::default()),
                default_power_bi_data_source_version: Some("powerBI_V3".to_string()),
                source_query_culture: Some(config.culture.clone()),
                tables: Vec::new(),
                relationships: Vec::new(),
                annotations: vec![Annotation::new(
                    "TabularEditor_SerializeOptions",
                    SERIALIZE_OPTIONS,
                )],
            },
        }
    }

    pub fn to_json_pretty(&self) -> BimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> BimResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAccessOptions {
    pub legacy_redirects: bool,
    pub return_error_values_as_null: bool,
}

impl Default for DataAccessOptions {
    fn default() -> Self {
        Self {
            legacy_redirects: true,
            return_error_values_as_null: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub culture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_access_options: Option<DataAccessOptions>,
    #[serde(
        rename = "defaultPowerBIDataSourceVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_power_bi_data_source_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_query_culture: Option<String>,
    pub tables: Vec<Table>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Model {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    /// Tables a measure may be attached to (generated date tables are hidden)
    pub fn visible_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().filter(|t| !t.is_hidden)
    }

    pub fn measure_count(&self) -> usize {
        self.tables.iter().map(|t| t.measures.len()).sum()
    }
}

//==============================================================================
// Tables and their members
//==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_hidden: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_private: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub show_as_variations_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage_tag: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hierarchies: Vec<Hierarchy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_hidden: false,
            is_private: false,
            show_as_variations_only: false,
            lineage_tag: Some(lineage_tag()),
            columns: Vec::new(),
            partitions: Vec::new(),
            measures: Vec::new(),
            hierarchies: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn measure(&self, name: &str) -> Option<&Measure> {
        self.measures.iter().find(|m| m.name == name)
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// `calculated` / `calculatedTableColumn`; absent for data columns
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,
    pub name: String,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_name_inferred: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by_column: Option<String>,
    pub lineage_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarize_by: Option<SummarizeBy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<Variation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Column {
    /// Data column read straight from the partition source
    pub fn data(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            column_type: None,
            source_column: Some(name.clone()),
            name,
            data_type,
            is_name_inferred: false,
            is_hidden: false,
            expression: None,
            format_string: None,
            sort_by_column: None,
            lineage_tag: lineage_tag(),
            data_category: None,
            summarize_by: None,
            variations: Vec::new(),
            annotations: Vec::new(),
        }
    }

    /// Hidden calculated column (date tables)
    pub fn calculated(name: impl Into<String>, data_type: DataType, expression: &str) -> Self {
        let mut column = Self::data(name, data_type);
        column.column_type = Some("calculated".to_string());
        column.source_column = None;
        column.expression = Some(expression.to_string());
        column.is_hidden = true;
        column
    }
}

/// Links a date column to the hierarchy of its local date table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub name: String,
    pub relationship: String,
    pub default_hierarchy: HierarchyRef,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyRef {
    pub table: String,
    pub hierarchy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    pub name: String,
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_string: Option<String>,
    pub lineage_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub mode: String,
    pub source: PartitionSource,
}

impl Partition {
    /// Import partition whose source is a Power Query expression
    pub fn m(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::import(name, "m", expression)
    }

    /// Import partition computed from a DAX table expression
    pub fn calculated(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::import(name, "calculated", expression)
    }

    fn import(name: impl Into<String>, source_type: &str, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: "import".to_string(),
            source: PartitionSource {
                source_type: source_type.to_string(),
                expression: expression.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hierarchy {
    pub name: String,
    pub lineage_tag: String,
    pub levels: Vec<Level>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub name: String,
    pub ordinal: u32,
    pub column: String,
    pub lineage_tag: String,
}

//==============================================================================
// Relationships and annotations
//==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub name: String,
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_on_date_behavior: Option<String>,
}

impl Relationship {
    /// The (from, to) endpoints, used to keep relationships unique
    pub fn endpoints(&self) -> (&str, &str, &str, &str) {
        (
            &self.from_table,
            &self.from_column,
            &self.to_table,
            &self.to_column,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub value: String,
}

impl Annotation {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_serialization() {
        let db = Database::new("Sales_Model", &ConverterConfig::default());
        let value = serde_json::to_value(&db).unwrap();

        assert_eq!(value["name"], "Sales_Model");
        assert_eq!(value["compatibilityLevel"], 1550);
        assert_eq!(value["model"]["culture"], "en-US");
        assert_eq!(value["model"]["defaultPowerBIDataSourceVersion"], "powerBI_V3");
        assert_eq!(value["model"]["dataAccessOptions"]["legacyRedirects"], true);
        assert!(value["model"]["tables"].as_array().unwrap().is_empty());
        assert!(value["model"]["relationships"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let column = Column::data("Region", DataType::String);
        let value = serde_json::to_value(&column).unwrap();

        assert_eq!(value["dataType"], "string");
        assert_eq!(value["sourceColumn"], "Region");
        assert!(value.get("isHidden").is_none());
        assert!(value.get("type").is_none());
        assert!(value.get("variations").is_none());
    }

    #[test]
    fn test_calculated_column_shape() {
        let column = Column::calculated("Year", DataType::Int64, "YEAR([Date])");
        let value = serde_json::to_value(&column).unwrap();

        assert_eq!(value["type"], "calculated");
        assert_eq!(value["isHidden"], true);
        assert_eq!(value["expression"], "YEAR([Date])");
        assert!(value.get("sourceColumn").is_none());
    }

    #[test]
    fn test_round_trip_keeps_measures() {
        let mut db = Database::new("m", &ConverterConfig::default());
        let mut table = Table::new("orders");
        table.measures.push(Measure {
            name: "Total".to_string(),
            expression: "SUM('orders'[Amount])".to_string(),
            format_string: Some("0".to_string()),
            lineage_tag: lineage_tag(),
        });
        db.model.tables.push(table);

        let json = db.to_json_pretty().unwrap();
        let back = Database::from_json(&json).unwrap();
        assert_eq!(back, db);
        assert_eq!(back.model.measure_count(), 1);
    }
}
