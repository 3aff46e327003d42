//! Markdown conversion report

use crate::error::BimResult;
use crate::pipeline::Conversion;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const EXPRESSION_PREVIEW: usize = 50;

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Shorten long expressions and keep them inside one table cell
fn preview(expression: &str) -> String {
    let flat = expression.replace(['\n', '\r'], " ").replace('|', "\\|");
    if flat.chars().count() > EXPRESSION_PREVIEW {
        let head: String = flat.chars().take(EXPRESSION_PREVIEW - 3).collect();
        format!("{}...", head)
    } else {
        flat
    }
}

/// Render the report for one conversion
pub fn render_report(source: &Path, model_path: &Path, conversion: &Conversion, generated: DateTime<Local>) -> String {
    let model = &conversion.database.model;
    let tables: Vec<&str> = model.visible_tables().map(|t| t.name.as_str()).collect();
    let measures: Vec<(&str, &str, &str)> = model
        .visible_tables()
        .flat_map(|t| {
            t.measures
                .iter()
                .map(move |m| (t.name.as_str(), m.name.as_str(), m.expression.as_str()))
        })
        .collect();
    let issues = &conversion.validation.issues;

    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(out, "# Conversion Report\n");
    let _ = writeln!(out, "**Date:** {}\n", generated.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "**Source File:** {}", file_name(source));
    let _ = writeln!(out, "**Output File:** {}\n", file_name(model_path));

    let _ = writeln!(out, "## Conversion Summary\n");
    let _ = writeln!(out, "* **Tables:** {}", tables.len());
    let _ = writeln!(out, "* **Measures:** {}", measures.len());
    let _ = writeln!(out, "* **Relationships:** {}", model.relationships.len());
    let _ = writeln!(
        out,
        "* **Measures added / updated / kept / failed:** {} / {} / {} / {}",
        conversion.measures.added,
        conversion.measures.updated,
        conversion.measures.skipped,
        conversion.measures.failed
    );
    let _ = writeln!(out, "* **Validation Issues:** {}\n", issues.len());

    let _ = writeln!(out, "## Tables\n");
    if tables.is_empty() {
        let _ = writeln!(out, "No tables were converted.");
    } else {
        let _ = writeln!(out, "| # | Table Name |\n|---|------------|");
        for (i, table) in tables.iter().enumerate() {
            let _ = writeln!(out, "| {} | {} |", i + 1, table);
        }
    }

    let _ = writeln!(out, "\n## Measures\n");
    if measures.is_empty() {
        let _ = writeln!(out, "No measures were converted.");
    } else {
        let _ = writeln!(out, "| # | Table | Measure Name | Expression |\n|---|-------|--------------|------------|");
        for (i, (table, name, expression)) in measures.iter().enumerate() {
            let _ = writeln!(out, "| {} | {} | {} | `{}` |", i + 1, table, name, preview(expression));
        }
    }

    let _ = writeln!(out, "\n## Relationships\n");
    if model.relationships.is_empty() {
        let _ = writeln!(out, "No relationships were created.");
    } else {
        let _ = writeln!(
            out,
            "| # | From Table | From Column | To Table | To Column |\n|---|------------|-------------|----------|-----------|"
        );
        for (i, rel) in model.relationships.iter().enumerate() {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                i + 1,
                rel.from_table,
                rel.from_column,
                rel.to_table,
                rel.to_column
            );
        }
    }

    let _ = writeln!(out, "\n## Validation Issues\n");
    if issues.is_empty() {
        let _ = writeln!(out, "No validation issues found.");
    } else {
        let _ = writeln!(out, "| # | Issue |\n|---|-------|");
        for (i, issue) in issues.iter().enumerate() {
            let _ = writeln!(out, "| {} | {} |", i + 1, issue.replace('|', "\\|"));
        }
    }

    out
}

/// Write `<stem>_conversion_report_<timestamp>.md` into `output_dir`
pub fn write_report(output_dir: &Path, source: &Path, model_path: &Path, conversion: &Conversion) -> BimResult<PathBuf> {
    let now = Local::now();
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook".to_string());
    let path = output_dir.join(format!(
        "{}_conversion_report_{}.md",
        stem,
        now.format("%Y%m%d_%H%M%S")
    ));

    fs::create_dir_all(output_dir)?;
    fs::write(&path, render_report(source, model_path, conversion, now))?;
    info!(path = %path.display(), "wrote conversion report");
    Ok(path)
}
