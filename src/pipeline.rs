//! End-to-end conversion of workbooks into model documents
//!
//! Each workbook runs through extraction, translation, assembly, measure
//! placement and validation with no state shared between runs, so batch
//! conversion can run one workbook per worker task.

use crate::config::ConverterConfig;
use crate::core::{validate_database, ValidationReport};
use crate::dax::FormulaTranslator;
use crate::error::{BimError, BimResult};
use crate::extractor::{extract_from_str, WorkbookMetadata};
use crate::model::{Database, MeasureStats, ModelAssembler};
use crate::report::write_report;
use crate::types::CalculationRecord;
use crate::writer::{read_calculations, write_model};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Suffix of the calculation file picked up next to a workbook in batch mode
pub const CALCULATIONS_SUFFIX: &str = "_dax_calculations.json";

/// Result of converting one workbook in memory
#[derive(Debug, Clone)]
pub struct Conversion {
    pub database: Database,
    /// Every workbook calculation, translated
    pub calculations: Vec<CalculationRecord>,
    pub measures: MeasureStats,
    pub validation: ValidationReport,
}

/// Table a calculation is translated against: its mapped table, else the
/// configured default when the workbook has it, else the first table.
fn translation_table<'m>(name: &str, metadata: &'m WorkbookMetadata, config: &'m ConverterConfig) -> &'m str {
    if let Some(mapped) = metadata.measure_tables.get(name) {
        if let Some(table) = metadata.table(mapped) {
            return &table.name;
        }
    }
    if metadata.table(&config.default_table).is_some() {
        return &config.default_table;
    }
    metadata
        .tables
        .first()
        .map(|t| t.name.as_str())
        .unwrap_or(&config.default_table)
}

/// Translate every workbook calculation into a calculation record
pub fn translate_calculations(metadata: &WorkbookMetadata, config: &ConverterConfig) -> Vec<CalculationRecord> {
    let translator = FormulaTranslator::new(config).with_catalog(&metadata.tables);
    metadata
        .calculations
        .iter()
        .map(|calc| {
            let table = translation_table(&calc.name, metadata, config);
            let translated = translator.translate(&calc.formula, table);
            CalculationRecord {
                name: calc.name.clone(),
                source_formula: calc.formula.clone(),
                destination_formula: translated.expression,
                classification: translated.classification,
            }
        })
        .collect()
}

/// Assemble, populate and validate a model from extracted metadata.
///
/// Workbook measures are attached when measure extraction is enabled;
/// `calculations` from an earlier run are attached after them.
pub fn convert_metadata(
    name: &str,
    metadata: &WorkbookMetadata,
    calculations: Option<&[CalculationRecord]>,
    config: &ConverterConfig,
) -> BimResult<Conversion> {
    let assembler = ModelAssembler::new(config).with_catalog(&metadata.tables);
    let mut database = assembler.assemble(name, metadata);
    let translated = translate_calculations(metadata, config);

    let mut measures = MeasureStats::default();
    if config.extract_measures {
        measures.merge(assembler.attach_measures(&mut database, &translated, Some(&metadata.measure_tables)));
    }
    if let Some(records) = calculations {
        measures.merge(assembler.attach_measures(&mut database, records, Some(&metadata.measure_tables)));
    }

    let validation = validate_database(&database)?;
    for issue in &validation.issues {
        warn!(model = name, issue = %issue, "validation finding");
    }

    Ok(Conversion {
        database,
        calculations: translated,
        measures,
        validation,
    })
}

/// Convert workbook XML text held in memory
pub fn convert_str(
    xml: &str,
    name: &str,
    calculations: Option<&[CalculationRecord]>,
    config: &ConverterConfig,
) -> BimResult<Conversion> {
    let metadata = extract_from_str(xml, config)?;
    convert_metadata(name, &metadata, calculations, config)
}

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub output_dir: PathBuf,
    /// Calculation file produced by an earlier run
    pub calculations: Option<PathBuf>,
    pub write_report: bool,
}

/// What a file conversion produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSummary {
    pub source: PathBuf,
    pub model_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
    /// Source tables (generated date tables excluded)
    pub tables: usize,
    pub measures: usize,
    pub relationships: usize,
    pub measure_stats: MeasureStats,
    pub validation: ValidationReport,
}

fn file_stem(path: &Path) -> BimResult<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| BimError::Extraction(format!("{}: not a workbook file name", path.display())))
}

/// Convert one workbook file and write `<stem>_Model.bim` into the output
/// directory, plus a conversion report when requested.
pub fn convert_workbook(input: &Path, options: &ConvertOptions, config: &ConverterConfig) -> BimResult<ConversionSummary> {
    let stem = file_stem(input)?;
    let xml = fs::read_to_string(input)?;

    let mut rejected = 0;
    let calculations = match &options.calculations {
        Some(path) => {
            let file = read_calculations(path)?;
            rejected = file.rejected;
            Some(file.records)
        }
        None => None,
    };

    let model_name = format!("{}_Model", stem);
    let mut conversion = convert_str(&xml, &model_name, calculations.as_deref(), config)?;
    conversion.measures.failed += rejected;

    let model_path = options.output_dir.join(format!("{}.bim", model_name));
    write_model(&model_path, &conversion.database)?;

    let report_path = if options.write_report {
        Some(write_report(&options.output_dir, input, &model_path, &conversion)?)
    } else {
        None
    };

    let model = &conversion.database.model;
    Ok(ConversionSummary {
        source: input.to_path_buf(),
        model_path,
        report_path,
        tables: model.visible_tables().count(),
        measures: model.measure_count(),
        relationships: model.relationships.len(),
        measure_stats: conversion.measures,
        validation: conversion.validation,
    })
}

/// Outcome of one workbook in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ConversionSummary>,
}

/// Workbooks in `dir` whose extension matches `extension`, sorted by path
pub fn find_workbooks(dir: &Path, extension: &str) -> BimResult<Vec<PathBuf>> {
    let extension = extension.trim_start_matches("*.").trim_start_matches('.');
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Convert every matching workbook in `dir`, one blocking worker per file.
///
/// A calculation file named `<stem>_dax_calculations.json` next to a workbook
/// is attached to its model. Failures are recorded per workbook.
pub async fn convert_batch(
    dir: &Path,
    extension: &str,
    output_dir: &Path,
    config: Arc<ConverterConfig>,
) -> BimResult<BTreeMap<String, BatchEntry>> {
    let workbooks = find_workbooks(dir, extension)?;
    if workbooks.is_empty() {
        warn!(dir = %dir.display(), extension, "no workbooks found");
    }
    fs::create_dir_all(output_dir)?;

    let mut tasks = JoinSet::new();
    for workbook in workbooks {
        let stem = file_stem(&workbook)?;
        let calculations = dir.join(format!("{}{}", stem, CALCULATIONS_SUFFIX));
        let options = ConvertOptions {
            output_dir: output_dir.to_path_buf(),
            calculations: calculations.is_file().then_some(calculations),
            write_report: false,
        };
        let config = Arc::clone(&config);
        tasks.spawn_blocking(move || (stem, convert_workbook(&workbook, &options, &config)));
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (stem, outcome) = joined.map_err(|e| BimError::Extraction(format!("worker failed: {}", e)))?;
        let entry = match outcome {
            Ok(summary) => {
                info!(workbook = %stem, "converted");
                BatchEntry {
                    success: true,
                    error: None,
                    summary: Some(summary),
                }
            }
            Err(e) => {
                error!(workbook = %stem, error = %e, "conversion failed");
                BatchEntry {
                    success: false,
                    error: Some(e.to_string()),
                    summary: None,
                }
            }
        };
        results.insert(stem, entry);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Classification;

    const WORKBOOK: &str = r#"<workbook><datasources>
        <datasource caption='Sales' name='federated.1'>
          <connection class='federated'>
            <relation name='Sales' table='[Sales$]' type='table'>
              <columns>
                <column datatype='real' name='Revenue' ordinal='0'/>
                <column datatype='string' name='Region' ordinal='1'/>
              </columns>
            </relation>
          </connection>
          <column caption='Total Revenue' datatype='real' name='[Calculation_1]' role='measure'>
            <calculation class='tableau' formula='SUM([Revenue])'/>
          </column>
          <column caption='Regional Revenue' datatype='real' name='[Calculation_2]' role='measure'>
            <calculation class='tableau' formula='{FIXED [Region]: SUM([Revenue])}'/>
          </column>
        </datasource>
    </datasources></workbook>"#;

    #[test]
    fn test_convert_str_attaches_measures() {
        let config = ConverterConfig::default();
        let conversion = convert_str(WORKBOOK, "Sales_Model", None, &config).unwrap();

        let sales = conversion.database.model.table("Sales").unwrap();
        assert_eq!(sales.measure("Total Revenue").unwrap().expression, "SUM('Sales'[Revenue])");
        assert_eq!(
            sales.measure("Regional Revenue").unwrap().expression,
            "CALCULATE(SUM('Sales'[Revenue]), ALLEXCEPT('Sales', 'Sales'[Region]))"
        );
        assert_eq!(conversion.measures.added, 2);
        assert!(conversion.validation.is_valid, "{:?}", conversion.validation.issues);
    }

    #[test]
    fn test_measure_extraction_can_be_disabled() {
        let config = ConverterConfig::default().with_extract_measures(false);
        let conversion = convert_str(WORKBOOK, "Sales_Model", None, &config).unwrap();

        assert_eq!(conversion.database.model.measure_count(), 0);
        // records are still produced for calculation files
        assert_eq!(conversion.calculations.len(), 2);
        assert_eq!(conversion.calculations[0].classification, Classification::Measure);
    }

    #[test]
    fn test_calculation_records_override_workbook_measures() {
        let config = ConverterConfig::default();
        let records = vec![CalculationRecord {
            name: "Total Revenue".to_string(),
            source_formula: String::new(),
            destination_formula: "SUMX('Sales', 'Sales'[Revenue])".to_string(),
            classification: Classification::Measure,
        }];
        let conversion = convert_str(WORKBOOK, "Sales_Model", Some(&records), &config).unwrap();

        assert_eq!(conversion.measures.updated, 1);
        let sales = conversion.database.model.table("Sales").unwrap();
        assert_eq!(
            sales.measure("Total Revenue").unwrap().expression,
            "SUMX('Sales', 'Sales'[Revenue])"
        );
    }
}
