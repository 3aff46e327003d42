//! Workbook metadata tree
//!
//! A `.twb` workbook is an XML document. [`parse_workbook`] reads the raw text
//! once into an owned [`Element`] tree so the extractor can walk it with simple
//! path queries instead of driving a pull parser.

use crate::error::{BimError, BimResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// One XML element with its attributes (in document order) and children
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Attribute value by key
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, treating empty strings as absent
    pub fn non_empty_attr(&self, key: &str) -> Option<&str> {
        self.attr(key).filter(|v| !v.trim().is_empty())
    }

    /// Direct children with the given element name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First direct child with the given element name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Follow a `/`-separated path of direct children, returning the first match
    pub fn find_path(&self, path: &str) -> Option<&Element> {
        path.split('/')
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// All elements along a `/`-separated path of direct children
    pub fn find_all_path<'a>(&'a self, path: &str) -> Vec<&'a Element> {
        let mut current = vec![self];
        for segment in path.split('/') {
            current = current
                .into_iter()
                .flat_map(|node| node.children.iter().filter(move |c| c.name == segment))
                .collect();
        }
        current
    }

    /// All descendants (not including `self`) with the given name, in document order
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }

    /// First descendant with the given name
    pub fn first_descendant(&self, name: &str) -> Option<&Element> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.first_descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// Text content of a direct child (`<parent-name>[orders.csv]</parent-name>`)
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }
}

/// Parse raw workbook XML into an element tree rooted at the document element.
///
/// This is the only fatal extraction failure: if the text is not well-formed
/// XML, the whole workbook is rejected.
pub fn parse_workbook(xml: &str) -> BimResult<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(start_element(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let element = start_element(&e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| BimError::Xml("unbalanced closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                if let Some(current) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| BimError::Xml(e.to_string()))?;
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BimError::Xml(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(BimError::Xml(format!(
            "unexpected end of document inside <{}>",
            stack.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }

    root.ok_or_else(|| BimError::Xml("document has no root element".to_string()))
}

fn start_element(e: &BytesStart<'_>) -> BimResult<Element> {
    let mut element = Element::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr.map_err(|e| BimError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| BimError::Xml(e.to_string()))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> BimResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_some() {
                return Err(BimError::Xml("multiple root elements".to_string()));
            }
            *root = Some(element);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version='1.0' encoding='utf-8' ?>
<workbook version='18.1'>
  <datasources>
    <datasource caption='orders (sample)' name='federated.1'>
      <connection class='federated'>
        <relation name='orders.csv' table='[orders#csv]' type='table'>
          <columns>
            <column datatype='integer' name='id' ordinal='0' />
          </columns>
        </relation>
      </connection>
      <column caption='Total &amp; Tax' name='[Calculation_1]' role='measure'>
        <calculation class='tableau' formula='SUM([Amount]) &gt; 0' />
      </column>
    </datasource>
  </datasources>
</workbook>"#;

    #[test]
    fn test_parse_builds_tree() {
        let root = parse_workbook(SAMPLE).unwrap();
        assert_eq!(root.name, "workbook");
        assert_eq!(root.attr("version"), Some("18.1"));

        let relation = root.first_descendant("relation").unwrap();
        assert_eq!(relation.attr("name"), Some("orders.csv"));
        assert_eq!(relation.find_all_path("columns/column").len(), 1);
    }

    #[test]
    fn test_parse_unescapes_attributes() {
        let root = parse_workbook(SAMPLE).unwrap();
        let calc = root.first_descendant("calculation").unwrap();
        assert_eq!(calc.attr("formula"), Some("SUM([Amount]) > 0"));

        let columns = root.descendants("column");
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].attr("caption"), Some("Total & Tax"));
    }

    #[test]
    fn test_find_path() {
        let root = parse_workbook(SAMPLE).unwrap();
        let connection = root.find_path("datasources/datasource/connection").unwrap();
        assert_eq!(connection.attr("class"), Some("federated"));
        assert!(root.find_path("datasources/missing").is_none());
    }

    #[test]
    fn test_child_text() {
        let root = parse_workbook(
            "<record><parent-name>[orders.csv]</parent-name><local-type>real</local-type></record>",
        )
        .unwrap();
        assert_eq!(root.child_text("parent-name"), Some("[orders.csv]"));
        assert_eq!(root.child_text("local-type"), Some("real"));
    }

    #[test]
    fn test_malformed_xml_is_rejected() {
        let err = parse_workbook("<workbook><datasources></workbook>").unwrap_err();
        assert!(matches!(err, BimError::Xml(_)));
    }

    #[test]
    fn test_empty_document_is_rejected() {
        assert!(parse_workbook("").is_err());
    }
}
