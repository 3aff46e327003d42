use crate::config::ConverterConfig;
use crate::core::{validate_file, ValidationReport};
use crate::dax::FormulaTranslator;
use crate::error::{BimError, BimResult};
use crate::extractor::extract_from_str;
use crate::pipeline::{convert_batch, convert_workbook, translate_calculations, ConvertOptions, CALCULATIONS_SUFFIX};
use crate::types::Classification;
use crate::writer::{clean_calculations_file, write_calculations};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load the configuration file if one was given, else the defaults
pub fn load_config(path: Option<&Path>) -> BimResult<ConverterConfig> {
    match path {
        Some(path) => ConverterConfig::load(path),
        None => Ok(ConverterConfig::default()),
    }
}

fn print_issues(report: &ValidationReport) {
    if report.is_valid {
        println!("{}", "✅ Model is valid".bold().green());
        return;
    }
    println!(
        "{}",
        format!("⚠️  {} validation issue(s):", report.issues.len()).bold().yellow()
    );
    for issue in &report.issues {
        println!("   - {}", issue.yellow());
    }
}

/// Execute the translate command
pub fn translate(formula: String, table: Option<String>, config: Option<PathBuf>) -> BimResult<()> {
    let mut config = load_config(config.as_deref())?;
    if let Some(table) = table {
        config = config.with_default_table(table);
    }

    let translated = FormulaTranslator::new(&config).translate(&formula, &config.default_table);

    println!("{}", translated.expression.bold());
    let kind = match translated.classification {
        Classification::Measure => "measure".bright_blue(),
        Classification::CalculatedColumn => "calculated column".cyan(),
    };
    println!("   Type:  {}", kind);
    println!("   Table: {}", config.default_table);
    Ok(())
}

/// Execute the calcs command: translate every calculation of a workbook
pub fn calcs(
    input: PathBuf,
    output: Option<PathBuf>,
    table: Option<String>,
    config: Option<PathBuf>,
) -> BimResult<()> {
    let mut config = load_config(config.as_deref())?;
    if let Some(table) = table {
        config = config.with_default_table(table);
    }

    println!("{}", "🔄 Translating calculations".bold().green());
    println!("   Workbook: {}", input.display());

    let xml = fs::read_to_string(&input)?;
    let metadata = extract_from_str(&xml, &config)?;
    let records = translate_calculations(&metadata, &config);

    let output = match output {
        Some(path) => path,
        None => {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| BimError::Extraction(format!("{}: not a workbook file name", input.display())))?;
            input.with_file_name(format!("{}{}", stem, CALCULATIONS_SUFFIX))
        }
    };
    write_calculations(&output, &records)?;

    let measures = records
        .iter()
        .filter(|r| r.classification == Classification::Measure)
        .count();
    println!(
        "   Found {} calculations ({} measures, {} calculated columns)",
        records.len(),
        measures,
        records.len() - measures
    );
    for record in &records {
        println!("   {} = {}", record.name.bright_blue(), record.destination_formula);
    }
    println!("\n{}", format!("✅ Wrote {}", output.display()).bold().green());
    Ok(())
}

/// Execute the convert command
pub fn convert(
    input: PathBuf,
    output_dir: PathBuf,
    calculations: Option<PathBuf>,
    report: bool,
    no_measures: bool,
    config: Option<PathBuf>,
) -> BimResult<()> {
    let mut config = load_config(config.as_deref())?;
    if no_measures {
        config = config.with_extract_measures(false);
    }

    println!("{}", "🔥 Converting workbook".bold().green());
    println!("   Workbook: {}", input.display());
    if let Some(path) = &calculations {
        println!("   Calculations: {}", path.display());
    }
    println!();

    let options = ConvertOptions {
        output_dir,
        calculations,
        write_report: report,
    };
    let summary = convert_workbook(&input, &options, &config)?;

    println!("   📊 Tables:        {}", summary.tables);
    println!("   📐 Measures:      {}", summary.measures);
    println!("   🔗 Relationships: {}", summary.relationships);
    let stats = summary.measure_stats;
    println!(
        "   Measures added {}, updated {}, kept {}, failed {}",
        stats.added.to_string().green(),
        stats.updated.to_string().cyan(),
        stats.skipped,
        if stats.failed > 0 {
            stats.failed.to_string().red()
        } else {
            stats.failed.to_string().normal()
        }
    );
    println!();
    print_issues(&summary.validation);

    println!("\n{}", format!("✅ Wrote {}", summary.model_path.display()).bold().green());
    if let Some(path) = &summary.report_path {
        println!("   Report: {}", path.display());
    }
    Ok(())
}

/// Execute the batch command
pub fn batch(dir: PathBuf, output_dir: PathBuf, pattern: String, config: Option<PathBuf>) -> BimResult<()> {
    let config = Arc::new(load_config(config.as_deref())?);

    println!("{}", "🔥 Batch conversion".bold().green());
    println!("   Source: {}", dir.display());
    println!("   Output: {}\n", output_dir.display());

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let results = runtime.block_on(convert_batch(&dir, &pattern, &output_dir, config))?;

    if results.is_empty() {
        println!("{}", format!("⚠️  No .{} files found", pattern).yellow());
        return Ok(());
    }

    let mut failed = 0;
    for (name, entry) in &results {
        match (&entry.summary, &entry.error) {
            (Some(summary), _) => {
                let status = if summary.validation.is_valid {
                    "valid".green()
                } else {
                    format!("{} issue(s)", summary.validation.issues.len()).yellow()
                };
                println!(
                    "   ✅ {}: {} tables, {} measures, {} relationships ({})",
                    name.bright_blue().bold(),
                    summary.tables,
                    summary.measures,
                    summary.relationships,
                    status
                );
            }
            (None, error) => {
                failed += 1;
                println!(
                    "   ❌ {}: {}",
                    name.bright_blue().bold(),
                    error.as_deref().unwrap_or("unknown error").red()
                );
            }
        }
    }

    let summary_path = output_dir.join("batch_summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&results)?)?;
    println!(
        "\n{}",
        format!(
            "Converted {} of {} workbooks, summary in {}",
            results.len() - failed,
            results.len(),
            summary_path.display()
        )
        .bold()
    );

    if failed > 0 {
        return Err(BimError::Extraction(format!("{} workbook(s) failed to convert", failed)));
    }
    Ok(())
}

/// Execute the clean command
pub fn clean(file: PathBuf, config: Option<PathBuf>) -> BimResult<()> {
    let config = load_config(config.as_deref())?;
    let changed = clean_calculations_file(&file, &config)?;
    println!(
        "{}",
        format!("✅ Cleaned {} formula(s) in {}", changed, file.display())
            .bold()
            .green()
    );
    Ok(())
}

/// Execute the validate command over one or more model files
pub fn validate(files: Vec<PathBuf>) -> BimResult<()> {
    let mut invalid = 0;
    for file in &files {
        println!("{}", format!("🔍 {}", file.display()).bold());
        let report = validate_file(file)?;
        print_issues(&report);
        if !report.is_valid {
            invalid += 1;
        }
        println!();
    }

    if invalid > 0 {
        return Err(BimError::Validation(format!(
            "{} of {} model(s) have validation issues",
            invalid,
            files.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
