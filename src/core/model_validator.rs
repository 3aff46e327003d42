//! Read-only structural checks over an assembled model document
//!
//! Findings are data, never errors: the validator reports everything it finds
//! and leaves the document untouched.

use crate::error::{BimError, BimResult};
use crate::model::Database;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

const RELATIONSHIP_FIELDS: [&str; 4] = ["fromTable", "fromColumn", "toTable", "toColumn"];
const DATE_TABLE_PREFIXES: [&str; 2] = ["DateTableTemplate", "LocalDateTable"];
const DATE_TABLE_ANNOTATIONS: [&str; 2] = ["__PBI_TemplateDateTable", "__PBI_LocalDateTable"];

/// Validity flag plus findings in the order they were found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

impl ValidationReport {
    fn from_issues(issues: Vec<String>) -> Self {
        Self {
            is_valid: issues.is_empty(),
            issues,
        }
    }
}

pub struct ModelValidator<'a> {
    document: &'a Value,
}

impl<'a> ModelValidator<'a> {
    pub fn new(document: &'a Value) -> Self {
        Self { document }
    }

    pub fn validate(&self) -> ValidationReport {
        let mut issues = Vec::new();

        if !self.document.is_object() {
            issues.push("Model document is not a JSON object".to_string());
            return ValidationReport::from_issues(issues);
        }
        let Some(model) = self.document.get("model") else {
            issues.push("Missing 'model' key in model document".to_string());
            return ValidationReport::from_issues(issues);
        };
        let Some(tables) = model.get("tables").and_then(Value::as_array) else {
            issues.push("Missing 'tables' in model".to_string());
            return ValidationReport::from_issues(issues);
        };

        issues.extend(schema_issues(self.document));

        if tables.is_empty() {
            issues.push("No tables found in the model".to_string());
        }

        let relationships = model
            .get("relationships")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (i, rel) in relationships.iter().enumerate() {
            issues.extend(relationship_issues(i, rel, tables));
        }

        for table in tables {
            let table_name = str_field(table, "name").unwrap_or("<unnamed>");
            for measure in array_field(table, "measures") {
                if is_blank_expression(measure.get("expression")) {
                    issues.push(format!(
                        "Empty measure expression in {}: {}",
                        table_name,
                        str_field(measure, "name").unwrap_or("<unnamed>")
                    ));
                }
            }
        }

        let has_date_columns = tables.iter().any(|t| {
            array_field(t, "columns")
                .iter()
                .any(|c| str_field(c, "dataType") == Some("dateTime"))
        });
        if has_date_columns && !tables.iter().any(is_date_table) {
            issues.push("Model has date columns but no date table".to_string());
        }

        ValidationReport::from_issues(issues)
    }
}

fn str_field<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(Value::as_str)
}

fn array_field<'v>(value: &'v Value, key: &str) -> &'v [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Expressions may be a string or an array of lines
fn is_blank_expression(expression: Option<&Value>) -> bool {
    match expression {
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(lines)) => lines
            .iter()
            .all(|l| l.as_str().map_or(true, |s| s.trim().is_empty())),
        _ => true,
    }
}

fn is_date_table(table: &Value) -> bool {
    let by_name = str_field(table, "name")
        .is_some_and(|n| DATE_TABLE_PREFIXES.iter().any(|p| n.starts_with(p)));
    by_name
        || array_field(table, "annotations").iter().any(|a| {
            str_field(a, "name").is_some_and(|n| DATE_TABLE_ANNOTATIONS.contains(&n))
        })
}

fn relationship_issues(index: usize, rel: &Value, tables: &[Value]) -> Vec<String> {
    let label = str_field(rel, "name")
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", index + 1));

    let missing: Vec<&str> = RELATIONSHIP_FIELDS
        .iter()
        .copied()
        .filter(|f| str_field(rel, f).map_or(true, str::is_empty))
        .collect();
    if !missing.is_empty() {
        return vec![format!(
            "Invalid relationship {}: missing {}",
            label,
            missing.join(", ")
        )];
    }

    let mut issues = Vec::new();
    for (side, table_key, column_key) in [("from", "fromTable", "fromColumn"), ("to", "toTable", "toColumn")] {
        let table_name = str_field(rel, table_key).unwrap_or_default();
        let column_name = str_field(rel, column_key).unwrap_or_default();
        match tables.iter().find(|t| str_field(t, "name") == Some(table_name)) {
            None => issues.push(format!(
                "Relationship {} references non-existent {}Table: {}",
                label, side, table_name
            )),
            Some(table) => {
                let has_column = array_field(table, "columns")
                    .iter()
                    .any(|c| str_field(c, "name") == Some(column_name));
                if !has_column {
                    issues.push(format!(
                        "Relationship {} references non-existent {}Column: {}[{}]",
                        label, side, table_name, column_name
                    ));
                }
            }
        }
    }
    issues
}

/// Check the document against the embedded model schema
fn schema_issues(document: &Value) -> Vec<String> {
    let schema_str = include_str!("../../schema/model-bim.schema.json");
    let schema_value: Value = match serde_json::from_str(schema_str) {
        Ok(value) => value,
        Err(e) => return vec![format!("Failed to parse model schema: {}", e)],
    };
    let compiled = match JSONSchema::compile(&schema_value) {
        Ok(compiled) => compiled,
        Err(e) => return vec![format!("Failed to compile model schema: {}", e)],
    };

    let issues = match compiled.validate(document) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| format!("Schema violation at '{}': {}", e.instance_path, e))
            .collect(),
    };
    issues
}

/// Validate an in-memory model
pub fn validate_database(database: &Database) -> BimResult<ValidationReport> {
    let document = serde_json::to_value(database)?;
    Ok(ModelValidator::new(&document).validate())
}

/// Validate a model file on disk.
///
/// An unreadable file is an error; a file that is not JSON is a finding.
pub fn validate_file(path: &Path) -> BimResult<ValidationReport> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BimError::Validation(format!("Cannot read {}: {}", path.display(), e)))?;
    match serde_json::from_str::<Value>(&content) {
        Ok(document) => Ok(ModelValidator::new(&document).validate()),
        Err(e) => Ok(ValidationReport::from_issues(vec![format!(
            "Model file is not valid JSON: {}",
            e
        )])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_document() -> Value {
        json!({
            "name": "Shop",
            "compatibilityLevel": 1550,
            "model": {
                "culture": "en-US",
                "tables": [
                    {
                        "name": "orders",
                        "columns": [
                            {"name": "customer_id", "dataType": "int64", "sourceColumn": "customer_id", "lineageTag": "a"}
                        ],
                        "partitions": [],
                        "measures": [
                            {"name": "Orders", "expression": "COUNTROWS('orders')", "lineageTag": "b"}
                        ]
                    },
                    {
                        "name": "customers",
                        "columns": [{"name": "id", "dataType": "int64", "lineageTag": "c"}],
                        "partitions": [],
                        "measures": []
                    }
                ],
                "relationships": [
                    {"name": "r1", "fromTable": "orders", "fromColumn": "customer_id", "toTable": "customers", "toColumn": "id"}
                ]
            }
        })
    }

    #[test]
    fn test_valid_document() {
        let doc = valid_document();
        let report = ModelValidator::new(&doc).validate();
        assert!(report.is_valid, "{:?}", report.issues);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_missing_model_stops_early() {
        let doc = json!({"name": "x"});
        let report = ModelValidator::new(&doc).validate();
        assert!(!report.is_valid);
        assert_eq!(report.issues, vec!["Missing 'model' key in model document"]);

        let report = ModelValidator::new(&json!([1, 2])).validate();
        assert_eq!(report.issues, vec!["Model document is not a JSON object"]);
    }

    #[test]
    fn test_empty_tables() {
        let doc = json!({"name": "x", "compatibilityLevel": 1550, "model": {"tables": []}});
        let report = ModelValidator::new(&doc).validate();
        assert_eq!(report.issues, vec!["No tables found in the model"]);
    }

    #[test]
    fn test_relationship_endpoints() {
        let mut doc = valid_document();
        doc["model"]["relationships"] = json!([
            {"name": "r1", "fromTable": "orders", "fromColumn": "customer_id", "toTable": "archive", "toColumn": "id"},
            {"name": "r2", "fromTable": "orders", "fromColumn": "missing", "toTable": "customers", "toColumn": "id"},
            {"fromTable": "orders"}
        ]);
        let report = ModelValidator::new(&doc).validate();
        assert_eq!(
            report.issues,
            vec![
                "Relationship r1 references non-existent toTable: archive",
                "Relationship r2 references non-existent fromColumn: orders[missing]",
                "Invalid relationship #3: missing fromColumn, toTable, toColumn",
            ]
        );
    }

    #[test]
    fn test_empty_measure_expression() {
        let mut doc = valid_document();
        doc["model"]["tables"][0]["measures"][0]["expression"] = json!("  ");
        let report = ModelValidator::new(&doc).validate();
        assert_eq!(report.issues, vec!["Empty measure expression in orders: Orders"]);
    }

    #[test]
    fn test_date_columns_need_date_table() {
        let mut doc = valid_document();
        doc["model"]["tables"][1]["columns"] =
            json!([{"name": "id", "dataType": "int64"}, {"name": "Signup Date", "dataType": "dateTime"}]);
        let report = ModelValidator::new(&doc).validate();
        assert_eq!(report.issues, vec!["Model has date columns but no date table"]);

        doc["model"]["tables"]
            .as_array_mut()
            .unwrap()
            .push(json!({"name": "LocalDateTable_1", "isHidden": true, "columns": [], "partitions": [], "measures": []}));
        assert!(ModelValidator::new(&doc).validate().is_valid);
    }

    #[test]
    fn test_schema_violation_is_reported() {
        let mut doc = valid_document();
        doc["model"]["tables"][0]["columns"][0]["dataType"] = json!("money");
        let report = ModelValidator::new(&doc).validate();
        assert!(!report.is_valid);
        assert!(report.issues[0].starts_with("Schema violation at '/model/tables/0/columns/0/dataType'"));
    }

    #[test]
    fn test_validation_never_mutates() {
        let doc = valid_document();
        let before = doc.clone();
        let _ = ModelValidator::new(&doc).validate();
        assert_eq!(doc, before);
    }
}
