//! Measure format strings

pub const PERCENT_FORMAT: &str = "0.00\\%";
pub const DECIMAL_FORMAT: &str = "0.00";
pub const DATE_FORMAT: &str = "General Date";
pub const CURRENCY_FORMAT: &str = "\\$#,0.00;(\\$#,0.00);\\$#,0.00";
pub const COUNT_FORMAT: &str = "#,0";
pub const DEFAULT_FORMAT: &str = "0";

const PERCENT_WORDS: [&str; 5] = ["ratio", "efficiency", "percentage", "percent", "%"];
const AVERAGE_WORDS: [&str; 3] = ["avg", "average", "mean"];
const DATE_WORDS: [&str; 2] = ["date", "time"];
const CURRENCY_WORDS: [&str; 7] = ["cost", "price", "revenue", "sales", "amount", "$", "dollar"];
const COUNT_WORDS: [&str; 4] = ["count", "num", "quantity", "qty"];

/// Pick a format string for a measure from its name, falling back to the
/// shape of its expression. Name groups are checked in order, first hit wins.
pub fn measure_format_string(name: &str, expression: &str) -> &'static str {
    let lower = name.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if has_any(&PERCENT_WORDS) {
        PERCENT_FORMAT
    } else if has_any(&AVERAGE_WORDS) {
        DECIMAL_FORMAT
    } else if has_any(&DATE_WORDS) {
        DATE_FORMAT
    } else if has_any(&CURRENCY_WORDS) {
        CURRENCY_FORMAT
    } else if has_any(&COUNT_WORDS) {
        COUNT_FORMAT
    } else if expression.contains("DIVIDE") || expression.contains('/') {
        DECIMAL_FORMAT
    } else {
        DEFAULT_FORMAT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_keywords() {
        assert_eq!(measure_format_string("Profit Ratio", "x"), PERCENT_FORMAT);
        assert_eq!(measure_format_string("Avg Rating", "x"), DECIMAL_FORMAT);
        assert_eq!(measure_format_string("Last Order Date", "x"), DATE_FORMAT);
        assert_eq!(measure_format_string("Total Revenue", "x"), CURRENCY_FORMAT);
        assert_eq!(measure_format_string("Order Count", "x"), COUNT_FORMAT);
    }

    #[test]
    fn test_earlier_group_wins() {
        // "sales" is a currency word, but percentages are checked first
        assert_eq!(measure_format_string("Sales %", "x"), PERCENT_FORMAT);
    }

    #[test]
    fn test_expression_fallback() {
        assert_eq!(
            measure_format_string("Margin", "DIVIDE('t'[a], 't'[b], 0)"),
            DECIMAL_FORMAT
        );
        assert_eq!(measure_format_string("Margin", "SUM('t'[a])"), DEFAULT_FORMAT);
    }
}
