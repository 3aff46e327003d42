//! Reading and writing converter files: model documents and calculation files

use crate::config::ConverterConfig;
use crate::dax::ReferenceNormalizer;
use crate::error::{BimError, BimResult};
use crate::model::Database;
use crate::types::CalculationRecord;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Calculation file contents; entries that could not be read are counted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalculationFile {
    pub records: Vec<CalculationRecord>,
    pub rejected: usize,
}

fn ensure_parent(path: &Path) -> BimResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write a model document as pretty-printed JSON
pub fn write_model(path: &Path, database: &Database) -> BimResult<()> {
    ensure_parent(path)?;
    fs::write(path, database.to_json_pretty()?)?;
    info!(path = %path.display(), tables = database.model.tables.len(), "wrote model");
    Ok(())
}

pub fn read_model(path: &Path) -> BimResult<Database> {
    let content = fs::read_to_string(path)?;
    Database::from_json(&content)
}

/// Write calculation records (always in the current field spelling)
pub fn write_calculations(path: &Path, records: &[CalculationRecord]) -> BimResult<()> {
    ensure_parent(path)?;
    fs::write(path, serde_json::to_string_pretty(records)?)?;
    info!(path = %path.display(), count = records.len(), "wrote calculations");
    Ok(())
}

/// Keys a destination formula may be stored under, current spelling first
const FORMULA_KEYS: [&str; 5] = ["destinationFormula", "dax_formula", "daxFormula", "expression", "dax"];

fn read_entries(path: &Path) -> BimResult<Vec<Value>> {
    let content = fs::read_to_string(path)?;
    match serde_json::from_str(&content)? {
        Value::Array(entries) => Ok(entries),
        _ => Err(BimError::Validation(format!(
            "{}: calculation file must contain a JSON array",
            path.display()
        ))),
    }
}

/// Read a calculation file.
///
/// The file must hold a JSON array. Entries in any supported spelling are
/// accepted; entries missing a name or formula are skipped and counted.
pub fn read_calculations(path: &Path) -> BimResult<CalculationFile> {
    let mut file = CalculationFile::default();
    for (i, entry) in read_entries(path)?.into_iter().enumerate() {
        match serde_json::from_value::<CalculationRecord>(entry) {
            Ok(record) => file.records.push(record),
            Err(e) => {
                warn!(entry = i, error = %e, "skipping invalid calculation entry");
                file.rejected += 1;
            }
        }
    }
    debug!(
        path = %path.display(),
        records = file.records.len(),
        rejected = file.rejected,
        "read calculations"
    );
    Ok(file)
}

/// Strip source-file annotations from every destination formula of a
/// calculation file, rewriting it in place. Returns how many formulas changed.
///
/// Only the formula strings are touched. Field spellings, unknown fields and
/// entries that do not parse as records are written back as they were read.
pub fn clean_calculations_file(path: &Path, config: &ConverterConfig) -> BimResult<usize> {
    let mut entries = read_entries(path)?;
    let normalizer = ReferenceNormalizer::new(config);

    let mut changed = 0;
    for entry in entries.iter_mut().filter_map(Value::as_object_mut) {
        let Some(key) = FORMULA_KEYS.iter().find(|k| entry.get(**k).is_some_and(Value::is_string)) else {
            continue;
        };
        let Some(Value::String(formula)) = entry.get_mut(*key) else {
            continue;
        };
        let cleaned = normalizer.strip_annotations(formula);
        if cleaned != *formula {
            debug!(before = %formula, after = %cleaned, "cleaned formula");
            *formula = cleaned;
            changed += 1;
        }
    }

    fs::write(path, serde_json::to_string_pretty(&entries)?)?;
    info!(path = %path.display(), changed, "cleaned calculations");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Classification;
    use tempfile::TempDir;

    fn record(name: &str, dax: &str) -> CalculationRecord {
        CalculationRecord {
            name: name.to_string(),
            source_formula: "SUM([x])".to_string(),
            destination_formula: dax.to_string(),
            classification: Classification::Measure,
        }
    }

    #[test]
    fn test_model_round_trip_creates_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/nested/Shop_Model.bim");
        let db = Database::new("Shop_Model", &ConverterConfig::default());

        write_model(&path, &db).unwrap();
        assert_eq!(read_model(&path).unwrap(), db);
    }

    #[test]
    fn test_read_calculations_counts_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calcs.json");
        fs::write(
            &path,
            r#"[
                {"name": "Total", "dax_formula": "SUM('t'[a])"},
                {"calculatedFieldName": "Avg", "daxFormula": "AVERAGE('t'[a])", "type": "measure"},
                {"name": "Broken"},
                42
            ]"#,
        )
        .unwrap();

        let file = read_calculations(&path).unwrap();
        assert_eq!(file.records.len(), 2);
        assert_eq!(file.rejected, 2);
        assert_eq!(file.records[0].classification, Classification::Measure);
        assert_eq!(file.records[1].name, "Avg");
    }

    #[test]
    fn test_read_calculations_requires_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calcs.json");
        fs::write(&path, r#"{"name": "Total"}"#).unwrap();

        assert!(matches!(read_calculations(&path), Err(BimError::Validation(_))));
    }

    #[test]
    fn test_clean_calculations_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calcs.json");
        write_calculations(
            &path,
            &[
                record("A", "SUM('projects'[Budget (projects.csv)])"),
                record("B", "SUM('projects'[Budget])"),
            ],
        )
        .unwrap();

        let changed = clean_calculations_file(&path, &ConverterConfig::default()).unwrap();
        assert_eq!(changed, 1);

        let file = read_calculations(&path).unwrap();
        assert_eq!(file.records[0].destination_formula, "SUM('projects'[Budget])");
        assert_eq!(file.records[1].destination_formula, "SUM('projects'[Budget])");
    }

    #[test]
    fn test_clean_keeps_fields_and_unreadable_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calcs.json");
        fs::write(
            &path,
            r#"[
                {"name": "Total", "dax_formula": "SUM('t'[a (t.csv)])", "type": "measure", "note": "keep"},
                {"name": "Orphan", "expression": null},
                "stray"
            ]"#,
        )
        .unwrap();

        let changed = clean_calculations_file(&path, &ConverterConfig::default()).unwrap();
        assert_eq!(changed, 1);

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            written,
            serde_json::json!([
                {"name": "Total", "dax_formula": "SUM('t'[a])", "type": "measure", "note": "keep"},
                {"name": "Orphan", "expression": null},
                "stray"
            ])
        );
    }

    #[test]
    fn test_clean_requires_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calcs.json");
        fs::write(&path, r#"{"name": "Total"}"#).unwrap();

        assert!(matches!(
            clean_calculations_file(&path, &ConverterConfig::default()),
            Err(BimError::Validation(_))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"name": "Total"}"#);
    }
}
