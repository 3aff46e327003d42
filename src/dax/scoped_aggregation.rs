//! Level-of-detail (scoped aggregation) resolution
//!
//! `{FIXED [Region]: SUM([Revenue])}` becomes
//! `CALCULATE(SUM([Revenue]), ALLEXCEPT('Sales', 'Sales'[Region]))`. Blocks are
//! rewritten innermost first until none remain; the aggregated expression
//! itself is left for the rewrite rules.

use super::reference_normalizer::qualify_bare_columns;
use super::{quote_table, split_top_level};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::debug;

/// Innermost `{KEYWORD dims: expr}` block (no braces inside)
static SCOPED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\{\s*(FIXED|INCLUDE|EXCLUDE)\b\s*([^{}:]*?)\s*:\s*([^{}]*?)\s*\}").unwrap()
});

/// `{MAX([Order Date])}`: table-scoped aggregate without a keyword
static TABLE_SCOPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\{\s*((?:SUM|AVG|MIN|MAX|COUNTD|COUNT|MEDIAN|ATTR)\s*\([^{}]*\))\s*\}")
        .unwrap()
});

/// Scope keyword of a level-of-detail block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Restrict the filter context to exactly the listed dimensions
    Fixed,
    /// Remove filters on the listed dimensions
    Include,
    /// Remove filters entirely on the listed dimensions' scope
    Exclude,
}

impl Scope {
    fn parse(keyword: &str) -> Option<Self> {
        match keyword.to_uppercase().as_str() {
            "FIXED" => Some(Scope::Fixed),
            "INCLUDE" => Some(Scope::Include),
            "EXCLUDE" => Some(Scope::Exclude),
            _ => None,
        }
    }
}

/// True if the formula contains any scoped-aggregation block
pub fn has_scoped_aggregation(formula: &str) -> bool {
    SCOPED_BLOCK.is_match(formula) || TABLE_SCOPED.is_match(formula)
}

fn qualify_dimension(dimension: &str, table: &str) -> String {
    qualify_bare_columns(dimension.trim(), table)
}

fn filter_modifier(scope: Scope, dimensions: &[String], table: &str) -> String {
    let quoted = quote_table(table);
    if dimensions.is_empty() {
        return format!("ALL({})", quoted);
    }
    let dims = dimensions.join(", ");
    match scope {
        Scope::Fixed => format!("ALLEXCEPT({}, {})", quoted, dims),
        Scope::Include => format!("ALL({})", dims),
        Scope::Exclude => format!("REMOVEFILTERS({})", dims),
    }
}

/// Rewrite every scoped block in `formula` against `table`, innermost first.
pub fn resolve_scoped_aggregations(formula: &str, table: &str) -> String {
    let mut current = formula.to_string();
    let mut passes = 0;

    loop {
        let next = SCOPED_BLOCK
            .replace_all(&current, |caps: &Captures| {
                let Some(scope) = Scope::parse(&caps[1]) else {
                    return caps[0].to_string();
                };
                let dimensions: Vec<String> = split_top_level(&caps[2])
                    .iter()
                    .filter(|d| !d.is_empty())
                    .map(|d| qualify_dimension(d, table))
                    .collect();
                format!(
                    "CALCULATE({}, {})",
                    caps[3].trim(),
                    filter_modifier(scope, &dimensions, table)
                )
            })
            .into_owned();
        let next = TABLE_SCOPED
            .replace_all(&next, |caps: &Captures| {
                format!("CALCULATE({}, ALL({}))", caps[1].trim(), quote_table(table))
            })
            .into_owned();

        if next == current {
            break;
        }
        current = next;
        passes += 1;
    }

    if passes > 0 {
        debug!(passes, "resolved scoped aggregations");
    }
    current
}
