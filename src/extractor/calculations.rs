//! Calculated field extraction

use crate::parser::Element;
use crate::types::{ColumnRole, RawCalculation};
use std::collections::HashSet;
use tracing::debug;

/// Collapse line breaks and surrounding whitespace so formulas compare equal
/// regardless of how they were wrapped in the workbook.
pub fn normalize_formula_text(formula: &str) -> String {
    formula
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

/// Display name of a calculation: caption, then name without brackets
pub(crate) fn calculation_name(column: &Element) -> String {
    if let Some(caption) = column.non_empty_attr("caption") {
        return caption.to_string();
    }
    if let Some(name) = column.non_empty_attr("name") {
        return name
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
    }
    "Unnamed Calculation".to_string()
}

/// Extract every `<column>` carrying a `<calculation formula=...>`.
///
/// Identical (name, formula) pairs are kept once; the first occurrence wins.
/// Calculations without formula text (bins, groups) are skipped.
pub fn extract_calculations(root: &Element) -> Vec<RawCalculation> {
    let mut calculations = Vec::new();
    let mut seen = HashSet::new();

    for column in root.descendants("column") {
        let Some(calc) = column.child("calculation") else {
            continue;
        };
        let Some(formula) = calc.non_empty_attr("formula") else {
            continue;
        };

        let name = calculation_name(column);
        let formula = normalize_formula_text(formula);
        if !seen.insert((name.clone(), formula.clone())) {
            continue;
        }

        calculations.push(RawCalculation {
            name,
            formula,
            role: column.attr("role").and_then(ColumnRole::parse),
            declared_type: column.attr("datatype").map(|d| d.to_lowercase()),
        });
    }

    debug!(count = calculations.len(), "extracted calculations");
    calculations
}
