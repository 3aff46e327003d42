//! Formula translation from workbook calculations to DAX

use super::reference_normalizer::ReferenceNormalizer;
use super::rules::RULES;
use super::scoped_aggregation::{has_scoped_aggregation, resolve_scoped_aggregations};
use crate::config::ConverterConfig;
use crate::extractor::normalize_formula_text;
use crate::types::{Classification, SourceTable, TranslatedFormula};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, trace};

static AGGREGATE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(SUMX?|AVG|AVERAGEX?|COUNTD|COUNTX?|COUNTA|COUNTROWS|DISTINCTCOUNT|MINX?|MAXX?|MEDIANX?)\s*\(",
    )
    .unwrap()
});

/// Classify a source formula: aggregate calls or scoped blocks make a
/// measure, anything else is a row-level calculated column.
///
/// Classification looks at the source text because translation can fold an
/// aggregation keyword into a different call (`COUNTD` → `DISTINCTCOUNT`).
pub fn classify(formula: &str) -> Classification {
    if AGGREGATE_CALL.is_match(formula) || has_scoped_aggregation(formula) {
        Classification::Measure
    } else {
        Classification::CalculatedColumn
    }
}

/// Translates workbook formulas to DAX against a destination table
pub struct FormulaTranslator<'a> {
    config: &'a ConverterConfig,
    catalog: &'a [SourceTable],
}

impl<'a> FormulaTranslator<'a> {
    pub fn new(config: &'a ConverterConfig) -> Self {
        Self {
            config,
            catalog: &[],
        }
    }

    /// Known tables, used to repair malformed `table]` references
    pub fn with_catalog(mut self, tables: &'a [SourceTable]) -> Self {
        self.catalog = tables;
        self
    }

    /// Translate one formula for `table`.
    ///
    /// Shapes no rule recognizes pass through unchanged; translation never
    /// fails. Translating the output a second time returns it unchanged.
    ///
    /// Example:
    /// - Input: `{FIXED [Region]: SUM([Revenue])}`, table `Sales`
    /// - Output: `CALCULATE(SUM('Sales'[Revenue]), ALLEXCEPT('Sales', 'Sales'[Region]))`
    pub fn translate(&self, formula: &str, table: &str) -> TranslatedFormula {
        let source = normalize_formula_text(formula);
        let normalizer = ReferenceNormalizer::new(self.config)
            .with_default_table(table)
            .with_catalog(self.catalog);

        let mut text = normalizer.requalify_source_references(&source);
        text = normalizer.repair_table_references(&text);
        text = resolve_scoped_aggregations(&text, table);

        for rule in RULES.iter() {
            let next = rule.apply(&text, table);
            if next != text {
                trace!(rule = rule.name, before = %text, after = %next, "rule applied");
                text = next;
            }
        }

        while text.contains("[[") || text.contains("]]") {
            text = text.replace("[[", "[").replace("]]", "]");
        }

        let expression = normalizer.normalize(&text).trim().to_string();
        let classification = classify(&source);
        debug!(table, classification = classification.as_str(), "translated formula");

        TranslatedFormula {
            expression,
            classification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::build_column;

    fn translate(formula: &str) -> TranslatedFormula {
        let config = ConverterConfig::default();
        FormulaTranslator::new(&config).translate(formula, "Sales")
    }

    #[test]
    fn test_sum_is_measure() {
        let out = translate("SUM([Revenue])");
        assert_eq!(out.expression, "SUM('Sales'[Revenue])");
        assert_eq!(out.classification, Classification::Measure);
    }

    #[test]
    fn test_fixed_lod() {
        let out = translate("{FIXED [Region]: SUM([Revenue])}");
        assert_eq!(
            out.expression,
            "CALCULATE(SUM('Sales'[Revenue]), ALLEXCEPT('Sales', 'Sales'[Region]))"
        );
        assert_eq!(out.classification, Classification::Measure);
    }

    #[test]
    fn test_column_division() {
        let out = translate("[A]/[B]");
        assert_eq!(out.expression, "DIVIDE('Sales'[A], 'Sales'[B], 0)");
        assert_eq!(out.classification, Classification::CalculatedColumn);
    }

    #[test]
    fn test_ratio_of_aggregates() {
        let out = translate("SUM([Profit]) / SUM([Sales])");
        assert_eq!(
            out.expression,
            "DIVIDE(SUM('Sales'[Profit]), SUM('Sales'[Sales]), 0)"
        );
    }

    #[test]
    fn test_conditional_with_literals_and_logic() {
        let out = translate("IF [Region] = 'East' AND [Sales] > 100\nTHEN 'Top' ELSE 'Other' END");
        assert_eq!(
            out.expression,
            "IF('Sales'[Region] = \"East\" && 'Sales'[Sales] > 100, \"Top\", \"Other\")"
        );
        assert_eq!(out.classification, Classification::CalculatedColumn);
    }

    #[test]
    fn test_source_qualified_and_annotated_references() {
        let out = translate("SUM([orders.csv].[Amount]) + [Cost (orders.csv)]");
        assert_eq!(out.expression, "SUM('orders'[Amount]) + 'Sales'[Cost]");
    }

    #[test]
    fn test_unknown_shapes_pass_through() {
        let out = translate("WINDOW_SUM(SUM([Sales]), -2, 0)");
        assert_eq!(out.expression, "WINDOW_SUM(SUM('Sales'[Sales]), -2, 0)");
    }

    #[test]
    fn test_catalog_repairs_bare_table() {
        let config = ConverterConfig::default();
        let tables = vec![SourceTable {
            name: "projects".to_string(),
            columns: vec![build_column("id", None, None), build_column("Budget", None, None)],
        }];
        let out = FormulaTranslator::new(&config)
            .with_catalog(&tables)
            .translate("SUM(projects])", "projects");
        assert_eq!(out.expression, "SUM('projects'[Budget])");
    }

    #[test]
    fn test_classification_uses_source_text() {
        assert_eq!(classify("COUNTD([Customer])"), Classification::Measure);
        assert_eq!(classify("{INCLUDE [a]: MAX([b])}"), Classification::Measure);
        assert_eq!(classify("[Summary Flag]"), Classification::CalculatedColumn);
        assert_eq!(classify("LEFT([Name], 3)"), Classification::CalculatedColumn);
    }
}
