//! Ordered rewrite rules
//!
//! Each rule scans the whole formula text and rewrites every non-overlapping
//! match before the next rule runs. Later rules rely on earlier ones: by the
//! time arithmetic and conditionals are rewritten, aggregation arguments are
//! already table-qualified. No rule matches the DAX it produces, so applying
//! the table twice gives the same text.

use super::reference_normalizer::qualify_bare_columns;
use super::{inside_brackets, inside_single_quotes, inside_string, quote_table, split_top_level};
use regex::{Captures, Regex};
use std::ops::Range;
use std::sync::LazyLock;

/// Balanced parentheses, up to two levels of nesting inside
const NESTED: &str = r"\((?:[^()]|\((?:[^()]|\([^()]*\))*\))*\)";

/// Call arguments (the inside of [`NESTED`])
const ARGS: &str = r"(?:[^()]|\((?:[^()]|\([^()]*\))*\))*";

/// Optionally table-qualified column: `[Sales]`, `'Orders'[Sales]`
const COLUMN: &str = r"(?:'[^']+')?\[[^\[\]]+\]";

/// Upper bound on passes for rules that run to a fixed point
const MAX_PASSES: usize = 16;

static COLUMN_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^\s*{}\s*$", COLUMN)).unwrap());

static QUOTED_LITERAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^'([^']*)'$").unwrap());

static AND_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\s+AND\s+").unwrap());

static ELSE_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bELSE").unwrap());

fn operand() -> String {
    format!(
        r"(?:'[^']+'\[[^\[\]]+\]|\[[^\[\]]+\]|\b\w+\s*{n}|{n}|\b\d+(?:\.\d+)?\b)",
        n = NESTED
    )
}

/// Where a match sits in the formula, and the table being translated for
pub(crate) struct Context<'t> {
    pub before: &'t str,
    pub after: &'t str,
    pub table: &'t str,
}

type Rewrite = fn(&Captures<'_>, &Context<'_>) -> Option<String>;
type Pass = fn(&str, &str) -> String;

enum Action {
    /// Rewrite each match; `None` leaves the match as it is
    Pattern {
        pattern: Regex,
        rewrite: Rewrite,
        repeat: bool,
    },
    /// Whole-text pass for shapes a single pattern cannot express
    Pass(Pass),
}

pub(crate) struct Rule {
    pub name: &'static str,
    action: Action,
}

impl Rule {
    fn pattern(name: &'static str, pattern: &str, rewrite: Rewrite) -> Self {
        Self {
            name,
            action: Action::Pattern {
                pattern: Regex::new(pattern).unwrap(),
                rewrite,
                repeat: false,
            },
        }
    }

    fn repeating(name: &'static str, pattern: &str, rewrite: Rewrite) -> Self {
        Self {
            name,
            action: Action::Pattern {
                pattern: Regex::new(pattern).unwrap(),
                rewrite,
                repeat: true,
            },
        }
    }

    fn pass(name: &'static str, pass: Pass) -> Self {
        Self {
            name,
            action: Action::Pass(pass),
        }
    }

    pub fn apply(&self, text: &str, table: &str) -> String {
        match &self.action {
            Action::Pass(pass) => pass(text, table),
            Action::Pattern {
                pattern,
                rewrite,
                repeat,
            } => {
                let mut current = rewrite_matches(pattern, *rewrite, text, table);
                if *repeat {
                    for _ in 1..MAX_PASSES {
                        let next = rewrite_matches(pattern, *rewrite, &current, table);
                        if next == current {
                            break;
                        }
                        current = next;
                    }
                }
                current
            }
        }
    }
}

fn rewrite_matches(pattern: &Regex, rewrite: Rewrite, text: &str, table: &str) -> String {
    let replacements: Vec<(Range<usize>, String)> = pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let before = &text[..whole.start()];
            if inside_brackets(before) {
                return None;
            }
            let ctx = Context {
                before,
                after: &text[whole.end()..],
                table,
            };
            rewrite(&caps, &ctx).map(|r| (whole.range(), r))
        })
        .collect();

    let mut result = text.to_string();
    for (range, replacement) in replacements.into_iter().rev() {
        result.replace_range(range, &replacement);
    }
    result
}

/// The rule table, in application order
pub(crate) static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let op = operand();
    vec![
        // Aggregations
        Rule::pattern(
            "conditional distinct count",
            r"(?is)\bCOUNTD\s*\(\s*IF\s+(.+?)\s+THEN\s+(.+?)\s+END\s*\)",
            conditional_distinct_count,
        ),
        Rule::repeating(
            "aggregation",
            &format!(r"(?i)\b(SUM|AVG|AVERAGE|MIN|MAX|MEDIAN|COUNTD|COUNT)\s*\(({})\)", ARGS),
            aggregation,
        ),
        Rule::pattern(
            "attribute",
            &format!(r"(?i)\bATTR\s*\(\s*({})\s*\)", COLUMN),
            |caps, ctx| Some(format!("SELECTEDVALUE({})", qualify(&caps[1], ctx.table))),
        ),
        // Ratio and subtraction
        Rule::repeating("division", &format!(r"({op})\s*/\s*({op})", op = op), division),
        Rule::repeating("subtraction", &format!(r"({op})\s*-\s*({op})", op = op), subtraction),
        // Branching
        Rule::pattern("inline if", &format!(r"(?i)\bIIF\s*\(({})\)", ARGS), inline_if),
        Rule::pass("conditional blocks", conditionals::rewrite),
        // Null handling
        Rule::pattern("zero if null", &format!(r"(?i)\bZN\s*\(({})\)", ARGS), zero_if_null),
        Rule::pattern("null check", &format!(r"(?i)\bISNULL\s*\(({})\)", ARGS), |caps, ctx| {
            Some(format!("ISBLANK({})", qualify(&caps[1], ctx.table)))
        }),
        Rule::pattern("null fallback", &format!(r"(?i)\bIFNULL\s*\(({})\)", ARGS), if_null),
        // Ranking
        Rule::pattern("rank", &format!(r"(?i)\bRANK\s*\(({})\)", ARGS), rank),
        // String and date functions
        Rule::pattern("date truncation", &format!(r"(?i)\bDATETRUNC\s*\(({})\)", ARGS), date_trunc),
        Rule::pattern("date shift", &format!(r"(?i)\bDATEADD\s*\(({})\)", ARGS), date_add),
        Rule::pattern("date difference", &format!(r"(?i)\bDATEDIFF\s*\(({})\)", ARGS), date_diff),
        Rule::pattern(
            "scalar function",
            &format!(
                r"(?i)\b(LEFT|RIGHT|MID|LEN|UPPER|LOWER|TRIM|YEAR|MONTH|DAY)\s*\(({})\)",
                ARGS
            ),
            |caps, ctx| {
                Some(format!(
                    "{}({})",
                    caps[1].to_uppercase(),
                    qualify(&caps[2], ctx.table)
                ))
            },
        ),
        Rule::pattern("to string", &format!(r"(?i)\bSTR\s*\(({})\)", ARGS), |caps, ctx| {
            Some(format!(
                "FORMAT({}, \"General Number\")",
                qualify(&caps[1], ctx.table)
            ))
        }),
        Rule::pattern("contains", &format!(r"(?i)\bCONTAINS\s*\(({})\)", ARGS), |caps, ctx| {
            let args = split_top_level(&caps[1]);
            (args.len() == 2).then(|| {
                format!(
                    "CONTAINSSTRING({}, {})",
                    qualify(&args[0], ctx.table),
                    literal(&args[1])
                )
            })
        }),
        // Bracketed-column arithmetic
        Rule::pattern(
            "column arithmetic",
            &format!(r"({c})\s*([+*])\s*({c})", c = COLUMN),
            |caps, ctx| {
                Some(format!(
                    "{} {} {}",
                    qualify(&caps[1], ctx.table),
                    &caps[2],
                    qualify(&caps[3], ctx.table)
                ))
            },
        ),
        // Comparisons
        Rule::pattern("comparison operator", r"==|!=", |caps, ctx| {
            if inside_string(ctx.before) {
                return None;
            }
            Some(if &caps[0] == "==" { "=" } else { "<>" }.to_string())
        }),
        Rule::pattern(
            "comparison literal",
            r"(<>|<=|>=|=|<|>)\s*'([^']*)'",
            |caps, ctx| {
                if ctx.after.starts_with('[') || inside_string(ctx.before) {
                    return None;
                }
                Some(format!("{} \"{}\"", &caps[1], caps[2].replace('"', "\"\"")))
            },
        ),
        // Logical operators
        Rule::pattern("logical operator", r"(?i)\b(AND|OR)\b", |caps, ctx| {
            if inside_string(ctx.before) || inside_single_quotes(ctx.before) {
                return None;
            }
            Some(if caps[1].eq_ignore_ascii_case("AND") { "&&" } else { "||" }.to_string())
        }),
    ]
});

/// Qualify bare column references in a rule argument
fn qualify(text: &str, table: &str) -> String {
    qualify_bare_columns(text.trim(), table)
}

fn is_column(text: &str) -> bool {
    COLUMN_ONLY.is_match(text)
}

/// Single-quoted source literal → DAX string literal; anything else unchanged
pub(crate) fn literal(text: &str) -> String {
    let text = text.trim();
    match QUOTED_LITERAL.captures(text) {
        Some(caps) => format!("\"{}\"", caps[1].replace('"', "\"\"")),
        None => text.to_string(),
    }
}

/// `'month'` / `"month"` → `MONTH`
fn date_unit(text: &str) -> Option<String> {
    let text = text.trim();
    let inner = text
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .or_else(|| text.strip_prefix('"').and_then(|t| t.strip_suffix('"')))?;
    Some(inner.trim().to_uppercase())
}

/// Left operand must not continue an identifier, number or literal
fn detached(ctx: &Context<'_>) -> bool {
    let attached_before = ctx
        .before
        .ends_with(|c: char| c.is_alphanumeric() || matches!(c, '_' | '.' | '#' | '\'' | '"'));
    let attached_after = ctx
        .after
        .starts_with(|c: char| c.is_alphanumeric() || matches!(c, '_' | '.' | '#' | '['));
    !attached_before && !attached_after
}

fn conditional_distinct_count(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    let condition = &caps[1];
    let value = &caps[2];
    if ELSE_WORD.is_match(condition) || ELSE_WORD.is_match(value) {
        return None;
    }
    let mut args = vec![format!("DISTINCTCOUNT({})", qualify(value, ctx.table))];
    for part in AND_SPLIT.split(condition) {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        if is_column(part) {
            args.push(format!("{} = TRUE()", qualify(part, ctx.table)));
        } else {
            args.push(qualify(part, ctx.table));
        }
    }
    Some(format!("CALCULATE({})", args.join(", ")))
}

fn aggregation(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    let func = caps[1].to_uppercase();
    let arg = caps[2].trim();
    if arg.is_empty() {
        return None;
    }

    let (scalar, iterator) = match func.as_str() {
        "SUM" => ("SUM", Some("SUMX")),
        "AVG" | "AVERAGE" => ("AVERAGE", Some("AVERAGEX")),
        "MIN" => ("MIN", Some("MINX")),
        "MAX" => ("MAX", Some("MAXX")),
        "MEDIAN" => ("MEDIAN", Some("MEDIANX")),
        "COUNT" => ("COUNT", Some("COUNTX")),
        "COUNTD" => ("DISTINCTCOUNT", None),
        _ => return None,
    };

    if is_column(arg) {
        return Some(format!("{}({})", scalar, qualify(arg, ctx.table)));
    }
    // Two-argument MIN/MAX and similar are already scalar calls
    if split_top_level(arg).len() > 1 {
        return None;
    }
    iterator.map(|x| format!("{}({}, {})", x, quote_table(ctx.table), qualify(arg, ctx.table)))
}

fn division(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    if !detached(ctx) {
        return None;
    }
    Some(format!(
        "DIVIDE({}, {}, 0)",
        qualify(&caps[1], ctx.table),
        qualify(&caps[2], ctx.table)
    ))
}

fn subtraction(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    if !detached(ctx) || inside_string(ctx.before) {
        return None;
    }
    let wrapped = ctx.before.trim_end().ends_with('(') && ctx.after.trim_start().starts_with(')');
    if wrapped {
        return None;
    }
    Some(format!(
        "({} - {})",
        qualify(&caps[1], ctx.table),
        qualify(&caps[2], ctx.table)
    ))
}

/// `IIF(test, then, else[, unknown])`; the unknown branch has no DAX
/// counterpart and is dropped
fn inline_if(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    let args = split_top_level(&caps[1]);
    let (condition, then, otherwise) = match args.as_slice() {
        [condition, then, otherwise] | [condition, then, otherwise, _] => (condition, then, otherwise),
        _ => return None,
    };
    Some(format!(
        "IF({}, {}, {})",
        qualify(condition, ctx.table),
        literal(&qualify(then, ctx.table)),
        literal(&qualify(otherwise, ctx.table))
    ))
}

fn zero_if_null(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    let value = qualify(&caps[1], ctx.table);
    if value.is_empty() {
        return None;
    }
    Some(format!("IF(ISBLANK({v}), 0, {v})", v = value))
}

fn if_null(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    let args = split_top_level(&caps[1]);
    if args.len() != 2 {
        return None;
    }
    let value = qualify(&args[0], ctx.table);
    Some(format!(
        "IF(ISBLANK({v}), {}, {v})",
        literal(&qualify(&args[1], ctx.table)),
        v = value
    ))
}

fn rank(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    let args = split_top_level(&caps[1]);
    let table = quote_table(ctx.table);
    match args.as_slice() {
        [expr] => Some(format!("RANKX(ALL({}), {})", table, qualify(expr, ctx.table))),
        [expr, direction] => {
            let direction = date_unit(direction)?;
            if direction != "ASC" && direction != "DESC" {
                return None;
            }
            Some(format!(
                "RANKX(ALL({}), {}, , {})",
                table,
                qualify(expr, ctx.table),
                direction
            ))
        }
        _ => None,
    }
}

fn date_trunc(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    let args = split_top_level(&caps[1]);
    let [unit, date] = args.as_slice() else {
        return None;
    };
    let d = qualify(date, ctx.table);
    match date_unit(unit)?.as_str() {
        "YEAR" => Some(format!("DATE(YEAR({d}), 1, 1)", d = d)),
        "QUARTER" => Some(format!("DATE(YEAR({d}), (QUARTER({d}) - 1) * 3 + 1, 1)", d = d)),
        "MONTH" => Some(format!("DATE(YEAR({d}), MONTH({d}), 1)", d = d)),
        "DAY" => Some(format!("DATE(YEAR({d}), MONTH({d}), DAY({d}))", d = d)),
        _ => None,
    }
}

fn date_add(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    let args = split_top_level(&caps[1]);
    let [unit, amount, date] = args.as_slice() else {
        return None;
    };
    let unit = date_unit(unit)?;
    let date = qualify(date, ctx.table);
    match unit.as_str() {
        "YEAR" | "QUARTER" | "MONTH" | "DAY" => {
            Some(format!("DATEADD({}, {}, {})", date, amount.trim(), unit))
        }
        "WEEK" => Some(format!("DATEADD({}, {} * 7, DAY)", date, amount.trim())),
        _ => None,
    }
}

fn date_diff(caps: &Captures<'_>, ctx: &Context<'_>) -> Option<String> {
    let args = split_top_level(&caps[1]);
    let [unit, start, end] = args.as_slice() else {
        return None;
    };
    let unit = date_unit(unit)?;
    if !matches!(
        unit.as_str(),
        "YEAR" | "QUARTER" | "MONTH" | "WEEK" | "DAY" | "HOUR" | "MINUTE" | "SECOND"
    ) {
        return None;
    }
    Some(format!(
        "DATEDIFF({}, {}, {})",
        qualify(start, ctx.table),
        qualify(end, ctx.table),
        unit
    ))
}

/// IF/ELSEIF/ELSE/END and CASE/WHEN blocks
///
/// Blocks are rewritten innermost first. A rewritten block is parked behind a
/// placeholder so outer blocks can see that a branch holds a nested
/// conditional; such blocks become one flattened `SWITCH(TRUE(), ...)` chain.
mod conditionals {
    use super::{inside_brackets, inside_single_quotes, inside_string, literal};
    use regex::{Captures, Regex};
    use std::ops::Range;
    use std::sync::LazyLock;

    const MARK: char = '\u{1}';

    static OPENER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(IF|CASE)\b").unwrap());

    static KEYWORD: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\b(THEN|ELSEIF|ELSE|WHEN|END)\b").unwrap());

    static PLACEHOLDER: LazyLock<Regex> =
        LazyLock::new(|| Regex::new("\u{1}(\\d+)\u{1}").unwrap());

    static WHOLE_PLACEHOLDER: LazyLock<Regex> =
        LazyLock::new(|| Regex::new("^\u{1}(\\d+)\u{1}$").unwrap());

    struct Keyword {
        word: String,
        start: usize,
        end: usize,
    }

    struct Conditional {
        arms: Vec<(String, String)>,
        otherwise: Option<String>,
        chain: bool,
    }

    impl Conditional {
        fn new(
            mut arms: Vec<(String, String)>,
            mut otherwise: Option<String>,
            mut chain: bool,
            blocks: &[Conditional],
        ) -> Self {
            let nested_else = otherwise
                .as_deref()
                .and_then(|o| WHOLE_PLACEHOLDER.captures(o))
                .and_then(|caps| caps[1].parse::<usize>().ok())
                .and_then(|id| blocks.get(id));
            if let Some(inner) = nested_else {
                arms.extend(inner.arms.iter().cloned());
                otherwise = inner.otherwise.clone();
                chain = true;
            }
            let has_nested = arms
                .iter()
                .any(|(c, v)| c.contains(MARK) || v.contains(MARK))
                || otherwise.as_deref().is_some_and(|o| o.contains(MARK));
            Self {
                arms,
                otherwise,
                chain: chain || has_nested,
            }
        }

        fn render(&self, blocks: &[Conditional]) -> String {
            if !self.chain && self.arms.len() == 1 {
                let (condition, value) = &self.arms[0];
                return match &self.otherwise {
                    Some(otherwise) => format!(
                        "IF({}, {}, {})",
                        expand(condition, blocks),
                        expand(value, blocks),
                        expand(otherwise, blocks)
                    ),
                    None => format!("IF({}, {})", expand(condition, blocks), expand(value, blocks)),
                };
            }
            let mut parts = vec!["TRUE()".to_string()];
            for (condition, value) in &self.arms {
                parts.push(expand(condition, blocks));
                parts.push(expand(value, blocks));
            }
            parts.push(
                self.otherwise
                    .as_deref()
                    .map(|o| expand(o, blocks))
                    .unwrap_or_else(|| "BLANK()".to_string()),
            );
            format!("SWITCH({})", parts.join(", "))
        }
    }

    fn expand(text: &str, blocks: &[Conditional]) -> String {
        PLACEHOLDER
            .replace_all(text, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|id| blocks.get(id))
                    .map(|block| block.render(blocks))
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn outside_literals(text: &str, start: usize) -> bool {
        let before = &text[..start];
        !inside_brackets(before) && !inside_string(before) && !inside_single_quotes(before)
    }

    fn keywords(text: &str) -> Vec<Keyword> {
        KEYWORD
            .find_iter(text)
            .filter(|m| outside_literals(text, m.start()))
            .map(|m| Keyword {
                word: m.as_str().to_uppercase(),
                start: m.start(),
                end: m.end(),
            })
            .collect()
    }

    pub(super) fn rewrite(text: &str, _table: &str) -> String {
        if !OPENER.is_match(text) {
            return text.to_string();
        }
        let mut blocks: Vec<Conditional> = Vec::new();
        let mut current = text.to_string();
        while let Some((range, block)) = innermost_block(&current, &blocks) {
            let id = blocks.len();
            blocks.push(block);
            current.replace_range(range, &format!("{m}{id}{m}", m = MARK, id = id));
        }
        expand(&current, &blocks)
    }

    fn innermost_block(text: &str, blocks: &[Conditional]) -> Option<(Range<usize>, Conditional)> {
        let keywords = keywords(text);
        let openers: Vec<_> = OPENER
            .find_iter(text)
            .filter(|m| outside_literals(text, m.start()))
            .collect();

        for opener in openers.iter().rev() {
            let following: Vec<&Keyword> =
                keywords.iter().filter(|k| k.start >= opener.end()).collect();
            let Some(end_at) = following.iter().position(|k| k.word == "END") else {
                continue;
            };
            let end = following[end_at];
            let inner = &following[..end_at];

            let head_end = inner.first().map_or(end.start, |k| k.start);
            let head = text[opener.end()..head_end].trim();
            let parts: Vec<(&str, &str)> = inner
                .iter()
                .enumerate()
                .map(|(i, k)| {
                    let stop = inner.get(i + 1).map_or(end.start, |next| next.start);
                    (k.word.as_str(), text[k.end..stop].trim())
                })
                .collect();

            let block = if opener.as_str().eq_ignore_ascii_case("CASE") {
                parse_case(head, &parts, blocks)
            } else {
                parse_if(head, &parts, blocks)
            };
            if let Some(block) = block {
                return Some((opener.start()..end.end, block));
            }
        }
        None
    }

    fn parse_if(head: &str, parts: &[(&str, &str)], blocks: &[Conditional]) -> Option<Conditional> {
        if head.is_empty() {
            return None;
        }
        let mut arms = Vec::new();
        let mut otherwise = None;
        let mut condition = head.to_string();
        let mut iter = parts.iter();

        loop {
            match iter.next() {
                Some(("THEN", value)) if !value.is_empty() => {
                    arms.push((condition.clone(), literal(value)))
                }
                _ => return None,
            }
            match iter.next() {
                None => break,
                Some(("ELSEIF", next)) if !next.is_empty() => condition = next.to_string(),
                Some(("ELSE", value)) if !value.is_empty() => {
                    otherwise = Some(literal(value));
                    if iter.next().is_some() {
                        return None;
                    }
                    break;
                }
                _ => return None,
            }
        }
        Some(Conditional::new(arms, otherwise, false, blocks))
    }

    fn parse_case(
        subject: &str,
        parts: &[(&str, &str)],
        blocks: &[Conditional],
    ) -> Option<Conditional> {
        if subject.is_empty() {
            return None;
        }
        let mut arms = Vec::new();
        let mut otherwise = None;
        let mut iter = parts.iter();

        while let Some((word, text)) = iter.next() {
            match *word {
                "WHEN" => {
                    let Some(("THEN", value)) = iter.next() else {
                        return None;
                    };
                    arms.push((format!("{} = {}", subject, literal(text)), literal(value)));
                }
                "ELSE" => {
                    otherwise = Some(literal(text));
                    if iter.next().is_some() {
                        return None;
                    }
                }
                _ => return None,
            }
        }
        if arms.is_empty() {
            return None;
        }
        Some(Conditional::new(arms, otherwise, true, blocks))
    }
}
