//! Table name discovery

use crate::config::ConverterConfig;
use crate::parser::Element;
use tracing::debug;

/// Relation nodes are `<relation>`, or carry a feature-flag prefix in newer
/// workbooks (`_.fcp.ObjectModelEncapsulateLegacy.true...relation`).
pub(crate) fn is_relation(element: &Element) -> bool {
    element.name == "relation" || element.name.ends_with(".relation")
}

pub(crate) fn relations(root: &Element) -> Vec<&Element> {
    let mut found = Vec::new();
    collect_relations(root, &mut found);
    found
}

fn collect_relations<'a>(node: &'a Element, found: &mut Vec<&'a Element>) {
    for child in &node.children {
        if is_relation(child) {
            found.push(child);
        }
        collect_relations(child, found);
    }
}

/// Strip `[...]` and a known file extension: `[orders.csv]` → `orders`
pub(crate) fn clean_table_ref(raw: &str, config: &ConverterConfig) -> String {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    config.strip_extension(trimmed).to_string()
}

/// Discover table names, in preference order:
/// 1. physical relation names
/// 2. datasource captions (first whitespace token)
/// 3. `parent-name` of column nodes
/// 4. the configured fallback name
pub fn discover_table_names(root: &Element, config: &ConverterConfig) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();

    for relation in relations(root) {
        if let Some(name) = relation.non_empty_attr("name") {
            push_unique(&mut names, clean_table_ref(name, config));
        }
    }
    if !names.is_empty() {
        debug!(source = "relations", ?names, "discovered tables");
        return names;
    }

    for datasource in root.descendants("datasource") {
        if datasource.attr("name") == Some("Parameters") {
            continue;
        }
        if let Some(caption) = datasource.non_empty_attr("caption") {
            if let Some(first) = caption.split_whitespace().next() {
                push_unique(&mut names, first.to_string());
            }
        }
    }
    if !names.is_empty() {
        debug!(source = "datasource captions", ?names, "discovered tables");
        return names;
    }

    for column in root.descendants("column") {
        if let Some(parent) = column.non_empty_attr("parent-name") {
            push_unique(&mut names, clean_table_ref(parent, config));
        }
    }
    if !names.is_empty() {
        debug!(source = "column parents", ?names, "discovered tables");
        return names;
    }

    debug!(fallback = %config.default_table, "no tables found, using fallback");
    vec![config.default_table.clone()]
}

fn push_unique(names: &mut Vec<String>, name: String) {
    if !name.is_empty() && !names.contains(&name) {
        names.push(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_workbook;

    fn names(xml: &str) -> Vec<String> {
        let root = parse_workbook(xml).unwrap();
        discover_table_names(&root, &ConverterConfig::default())
    }

    #[test]
    fn test_relation_names_win() {
        let xml = r#"<workbook><datasources><datasource caption='Ignored source'>
            <connection>
              <relation type='join'>
                <relation name='orders.csv' type='table'/>
                <relation name='customers.csv' type='table'/>
              </relation>
            </connection>
            <column name='[x]' parent-name='[other.csv]'/>
        </datasource></datasources></workbook>"#;
        assert_eq!(names(xml), vec!["orders", "customers"]);
    }

    #[test]
    fn test_duplicate_relations_collapse() {
        let xml = r#"<workbook>
            <relation name='orders.csv'/>
            <relation name='orders.csv'/>
        </workbook>"#;
        assert_eq!(names(xml), vec!["orders"]);
    }

    #[test]
    fn test_prefixed_relation_elements() {
        let xml = r#"<workbook>
            <_.fcp.ObjectModelEncapsulateLegacy.true...relation name='sales.csv' type='table'/>
        </workbook>"#;
        assert_eq!(names(xml), vec!["sales"]);
    }

    #[test]
    fn test_datasource_caption_fallback() {
        let xml = r#"<workbook><datasources>
            <datasource name='Parameters' caption='Parameters'/>
            <datasource caption='Superstore Sales (copy)'/>
        </datasources></workbook>"#;
        assert_eq!(names(xml), vec!["Superstore"]);
    }

    #[test]
    fn test_parent_name_fallback() {
        let xml = r#"<workbook><column name='[a]' parent-name='[projects.csv]'/></workbook>"#;
        assert_eq!(names(xml), vec!["projects"]);
    }

    #[test]
    fn test_placeholder_fallback() {
        assert_eq!(names("<workbook/>"), vec!["YourTable"]);
    }
}
