//! CLI binary tests
//!
//! These run the `bimforge` binary as a subprocess against the fixtures in
//! test-data/ and a scratch directory.

#![allow(deprecated)] // Command::cargo_bin deprecation - no stable replacement yet

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn test_data_path(filename: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("test-data");
    path.push(filename);
    path
}

fn bimforge() -> Command {
    let mut cmd = Command::cargo_bin("bimforge").unwrap();
    cmd.env_remove("BIMFORGE_CONFIG").env_remove("RUST_LOG");
    cmd
}

// ═══════════════════════════════════════════════════════════════════════════
// TRANSLATE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_translate_prints_dax() {
    bimforge()
        .args(["translate", "SUM([Revenue])", "--table", "Sales"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SUM('Sales'[Revenue])"))
        .stdout(predicate::str::contains("measure"));
}

#[test]
fn test_translate_level_of_detail() {
    bimforge()
        .args(["translate", "{FIXED [Region]: SUM([Revenue])}", "-t", "Sales"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "CALCULATE(SUM('Sales'[Revenue]), ALLEXCEPT('Sales', 'Sales'[Region]))",
        ));
}

#[test]
fn test_translate_uses_config_default_table() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bimforge.yaml");
    fs::write(&config, "default_table: Orders\n").unwrap();

    bimforge()
        .args(["translate", "[A]/[B]", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("DIVIDE('Orders'[A], 'Orders'[B], 0)"))
        .stdout(predicate::str::contains("calculated column"));
}

// ═══════════════════════════════════════════════════════════════════════════
// CALCS AND CLEAN
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_calcs_writes_calculation_file() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("calcs.json");

    bimforge()
        .arg("calcs")
        .arg(test_data_path("superstore.twb"))
        .arg("-o")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 5 calculations (4 measures, 1 calculated columns)"));

    let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    let entries = written.as_array().unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0]["name"], "Total Sales");
    assert_eq!(entries[0]["destinationFormula"], "SUM('orders'[Amount])");
}

#[test]
fn test_clean_strips_annotations() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("calcs.json");
    fs::write(
        &file,
        r#"[{"name": "Total", "dax_formula": "SUM('orders'[Amount (orders.csv)])", "type": "measure"}]"#,
    )
    .unwrap();

    bimforge()
        .arg("clean")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleaned 1 formula(s)"));

    let cleaned = fs::read_to_string(&file).unwrap();
    assert!(cleaned.contains("SUM('orders'[Amount])"));
    assert!(!cleaned.contains("(orders.csv)"));
}

// ═══════════════════════════════════════════════════════════════════════════
// CONVERT AND VALIDATE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_convert_then_validate() {
    let dir = TempDir::new().unwrap();

    bimforge()
        .arg("convert")
        .arg(test_data_path("superstore.twb"))
        .arg("-o")
        .arg(dir.path())
        .arg("--report")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tables:        2"))
        .stdout(predicate::str::contains("Model is valid"));

    let model = dir.path().join("superstore_Model.bim");
    assert!(model.exists());
    let reports = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("superstore_conversion_report_"))
        .count();
    assert_eq!(reports, 1);

    bimforge()
        .arg("validate")
        .arg(&model)
        .assert()
        .success()
        .stdout(predicate::str::contains("Model is valid"));
}

#[test]
fn test_convert_without_measures() {
    let dir = TempDir::new().unwrap();

    bimforge()
        .arg("convert")
        .arg(test_data_path("superstore.twb"))
        .arg("-o")
        .arg(dir.path())
        .arg("--no-measures")
        .assert()
        .success()
        .stdout(predicate::str::contains("Measures:      0"));
}

#[test]
fn test_convert_missing_workbook_fails() {
    let dir = TempDir::new().unwrap();

    bimforge()
        .arg("convert")
        .arg(dir.path().join("missing.twb"))
        .arg("-o")
        .arg(dir.path())
        .assert()
        .failure();
}

#[test]
fn test_validate_reports_issues() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("broken_Model.bim");
    fs::write(
        &model,
        r#"{"name": "broken", "compatibilityLevel": 1550, "model": {"tables": [], "relationships": [{"name": "r1", "fromTable": "a"}]}}"#,
    )
    .unwrap();

    bimforge()
        .arg("validate")
        .arg(&model)
        .assert()
        .failure()
        .stdout(predicate::str::contains("No tables found in the model"))
        .stdout(predicate::str::contains("Invalid relationship"));
}

// ═══════════════════════════════════════════════════════════════════════════
// BATCH
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_batch_writes_models_and_summary() {
    let source = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    for fixture in ["superstore.twb", "projects.twb"] {
        fs::copy(test_data_path(fixture), source.path().join(fixture)).unwrap();
    }

    bimforge()
        .arg("batch")
        .arg(source.path())
        .arg("-o")
        .arg(out.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Converted 2 of 2 workbooks"));

    assert!(out.path().join("superstore_Model.bim").exists());
    assert!(out.path().join("projects_Model.bim").exists());

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.path().join("batch_summary.json")).unwrap()).unwrap();
    assert_eq!(summary["projects"]["success"], true);
    assert_eq!(summary["superstore"]["summary"]["tables"], 2);
}

#[test]
fn test_batch_empty_directory() {
    let source = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    bimforge()
        .arg("batch")
        .arg(source.path())
        .arg("-o")
        .arg(out.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No .twb files found"));
}
