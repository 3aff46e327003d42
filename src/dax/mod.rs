//! Source-formula → DAX translation
//!
//! The translator resolves scoped aggregations (`{FIXED ...}` blocks) to a
//! fixed point, then runs an ordered table of rewrite rules over the whole
//! formula text, and finally normalizes column references.

mod formula_translator;
mod reference_normalizer;
mod rules;
mod scoped_aggregation;

pub use formula_translator::{classify, FormulaTranslator};
pub use reference_normalizer::{value_column, ReferenceNormalizer};
pub use scoped_aggregation::{has_scoped_aggregation, resolve_scoped_aggregations};

/// Quote a table name for DAX: `Sales` → `'Sales'`
pub fn quote_table(table: &str) -> String {
    format!("'{}'", table.replace('\'', "''"))
}

/// Fully qualified column reference: `'Sales'[Revenue]`
pub fn qualified_column(table: &str, column: &str) -> String {
    format!("{}[{}]", quote_table(table), column.trim())
}

/// True when the end of `before` sits inside an open `[...]` column name
pub(crate) fn inside_brackets(before: &str) -> bool {
    let mut depth = 0i32;
    for c in before.chars() {
        match c {
            '[' => depth += 1,
            ']' => depth = (depth - 1).max(0),
            _ => {}
        }
    }
    depth > 0
}

/// True when the end of `before` sits inside an open `"..."` literal
pub(crate) fn inside_string(before: &str) -> bool {
    before.chars().filter(|c| *c == '"').count() % 2 == 1
}

/// True when the end of `before` sits inside an open `'...'` span, either a
/// source literal or a table qualifier. Quotes inside `[...]` or `"..."` do
/// not count.
pub(crate) fn inside_single_quotes(before: &str) -> bool {
    let mut brackets = 0i32;
    let mut in_string = false;
    let mut in_quote = false;
    for c in before.chars() {
        match c {
            '"' if !in_quote && brackets == 0 => in_string = !in_string,
            '\'' if !in_string && brackets == 0 => in_quote = !in_quote,
            '[' if !in_string && !in_quote => brackets += 1,
            ']' if !in_string && !in_quote => brackets = (brackets - 1).max(0),
            _ => {}
        }
    }
    in_quote
}

/// Split an argument list on commas that are not nested in parentheses,
/// brackets or string literals.
pub(crate) fn split_top_level(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut parens = 0i32;
    let mut brackets = 0i32;
    let mut in_string = false;

    for c in args.chars() {
        match c {
            '"' => in_string = !in_string,
            '(' if !in_string => parens += 1,
            ')' if !in_string => parens -= 1,
            '[' if !in_string => brackets += 1,
            ']' if !in_string => brackets -= 1,
            ',' if !in_string && parens == 0 && brackets == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current.trim().to_string());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_table() {
        assert_eq!(quote_table("Sales"), "'Sales'");
        assert_eq!(quote_table("Bob's"), "'Bob''s'");
        assert_eq!(qualified_column("Sales", " Revenue "), "'Sales'[Revenue]");
    }

    #[test]
    fn test_inside_brackets() {
        assert!(inside_brackets("SUM([Year"));
        assert!(!inside_brackets("SUM([Year]"));
        assert!(!inside_brackets(""));
    }

    #[test]
    fn test_inside_single_quotes() {
        assert!(inside_single_quotes("[Status] = 'THE "));
        assert!(!inside_single_quotes("[Status] = 'THE END' "));
        assert!(!inside_single_quotes("'Sales'[Bob's col] + "));
        assert!(!inside_single_quotes("\"it's\" & "));
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(
            split_top_level("[a], MAX([b], 2), \"x, y\""),
            vec!["[a]", "MAX([b], 2)", "\"x, y\""]
        );
        assert_eq!(split_top_level("[a,b]"), vec!["[a,b]"]);
    }
}
