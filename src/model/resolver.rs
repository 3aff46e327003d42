//! Measure → base table resolution
//!
//! Resolution is a priority cascade; the first rule that yields a candidate
//! wins:
//!
//! 1. the explicit mapping extracted from the workbook,
//! 2. the candidate referenced most often in the expression,
//! 3. the first candidate whose name appears in the measure name,
//! 4. the first candidate.
//!
//! After a table is chosen, references to other candidate tables are moved
//! onto it when the chosen table owns the referenced column.

use super::bim::Table;
use crate::config::ConverterConfig;
use crate::dax::{qualified_column, ReferenceNormalizer};
use crate::error::{BimError, BimResult};
use crate::extractor::{strip_source_annotation, MeasureTableIndex};
use crate::types::SourceTable;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// `'Table'[Column]`, with `''` as an escaped quote inside the table name
static QUALIFIED_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'((?:[^']|'')+)'\[([^\[\]]+)\]").unwrap());

/// Which rule of the cascade picked the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    ExplicitMapping,
    FormulaReferences,
    NameMatch,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub table: String,
    pub source: ResolutionSource,
    /// The expression after reference correction against `table`
    pub expression: String,
}

/// A table a measure may be attached to, with its column names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTable {
    pub name: String,
    pub columns: Vec<String>,
}

impl CandidateTable {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

impl From<&Table> for CandidateTable {
    fn from(table: &Table) -> Self {
        Self::new(&table.name, table.columns.iter().map(|c| c.name.clone()).collect())
    }
}

pub struct MeasureTableResolver<'a> {
    config: &'a ConverterConfig,
    candidates: Vec<CandidateTable>,
    index: Option<&'a MeasureTableIndex>,
    catalog: &'a [SourceTable],
}

impl<'a> MeasureTableResolver<'a> {
    pub fn new(config: &'a ConverterConfig, candidates: Vec<CandidateTable>) -> Self {
        Self {
            config,
            candidates,
            index: None,
            catalog: &[],
        }
    }

    /// Resolver over the visible tables of an assembled model
    pub fn for_tables<'t>(config: &'a ConverterConfig, tables: impl IntoIterator<Item = &'t Table>) -> Self {
        Self::new(config, tables.into_iter().map(CandidateTable::from).collect())
    }

    /// Use an explicit measure → table mapping as the first priority
    pub fn with_index(mut self, index: &'a MeasureTableIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// Source tables used to repair `table]` references before resolution
    pub fn with_catalog(mut self, tables: &'a [SourceTable]) -> Self {
        self.catalog = tables;
        self
    }

    fn normalizer(&self) -> ReferenceNormalizer<'a> {
        ReferenceNormalizer::new(self.config).with_catalog(self.catalog)
    }

    pub fn candidates(&self) -> &[CandidateTable] {
        &self.candidates
    }

    fn candidate(&self, name: &str) -> Option<&CandidateTable> {
        self.candidates.iter().find(|c| c.name == name)
    }

    /// Choose the base table for a measure.
    ///
    /// Returns `None` only when there are no candidate tables.
    pub fn choose_table(&self, measure: &str, expression: &str) -> Option<(String, ResolutionSource)> {
        if let Some(mapped) = self.index.and_then(|index| index.get(measure)) {
            if self.candidate(mapped).is_some() {
                return Some((mapped.to_string(), ResolutionSource::ExplicitMapping));
            }
            warn!(measure, table = mapped, "mapped table is not in the model");
        }

        if let Some(table) = self.most_referenced(expression) {
            return Some((table, ResolutionSource::FormulaReferences));
        }

        let lower = measure.to_lowercase();
        if let Some(candidate) = self
            .candidates
            .iter()
            .find(|c| lower.contains(&c.name.to_lowercase()))
        {
            return Some((candidate.name.clone(), ResolutionSource::NameMatch));
        }

        self.candidates
            .first()
            .map(|c| (c.name.clone(), ResolutionSource::Fallback))
    }

    /// Candidate with the most `'T'[...]` references; ties go to the table
    /// referenced first.
    fn most_referenced(&self, expression: &str) -> Option<String> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for caps in QUALIFIED_REFERENCE.captures_iter(expression) {
            let table = caps[1].replace("''", "'");
            if self.candidate(&table).is_none() {
                continue;
            }
            match counts.iter_mut().find(|(t, _)| *t == table) {
                Some((_, n)) => *n += 1,
                None => counts.push((table, 1)),
            }
        }

        let max = counts.iter().map(|(_, n)| *n).max()?;
        counts.into_iter().find(|(_, n)| *n == max).map(|(t, _)| t)
    }

    /// Resolve a measure to its base table and correct its references.
    ///
    /// Fails only when there are no candidate tables.
    pub fn resolve(&self, measure: &str, expression: &str) -> BimResult<Resolution> {
        let repaired = self.normalizer().repair_table_references(expression);
        let (table, source) = self
            .choose_table(measure, &repaired)
            .ok_or_else(|| BimError::Resolution(format!("no candidate table for measure '{}'", measure)))?;
        match source {
            ResolutionSource::Fallback => {
                warn!(measure, table = %table, "no base table found, using first table")
            }
            _ => info!(measure, table = %table, ?source, "resolved measure table"),
        }

        let corrected = self.correct_references(&repaired, &table);
        if corrected != expression {
            debug!(measure, before = expression, after = %corrected, "corrected table references");
        }

        Ok(Resolution {
            table,
            source,
            expression: corrected,
        })
    }

    /// Move references to other candidate tables onto `table` where `table`
    /// owns the column, then normalize the result against `table`.
    pub fn correct_references(&self, expression: &str, table: &str) -> String {
        let normalizer = self.normalizer().with_default_table(table);
        let chosen_columns: Vec<String> = self
            .candidate(table)
            .map(|c| {
                c.columns
                    .iter()
                    .map(|col| strip_source_annotation(col, self.config))
                    .collect()
            })
            .unwrap_or_default();

        let corrected = QUALIFIED_REFERENCE.replace_all(expression, |caps: &Captures| {
            let referenced = caps[1].replace("''", "'");
            let raw_column = &caps[2];
            let column = strip_source_annotation(raw_column, self.config);

            if referenced == table {
                return qualified_column(table, &column);
            }
            if self.candidate(&referenced).is_some() {
                let annotated = normalizer
                    .annotation_table(&format!("[{}]", raw_column))
                    .is_some_and(|t| t.eq_ignore_ascii_case(table));
                if annotated || chosen_columns.iter().any(|c| *c == column) {
                    return qualified_column(table, &column);
                }
            }
            qualified_column(&referenced, &column)
        });

        normalizer.normalize(&corrected)
    }
}
