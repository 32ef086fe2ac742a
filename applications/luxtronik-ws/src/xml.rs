//! Small helpers over `xmltree` for the controller's positional documents.
//!
//! Controller documents are generic trees of `<item id="..">` nodes. A leaf
//! item holds exactly two sub-elements, `<name>` then `<value>`.

use crate::error::Result;
use xmltree::Element;

pub fn parse(text: &str) -> Result<Element> {
    Ok(Element::parse(text.as_bytes())?)
}

/// Child elements in document order, skipping text and comments.
pub fn elements(el: &Element) -> impl Iterator<Item = &Element> {
    el.children.iter().filter_map(|n| n.as_element())
}

pub fn element_at(el: &Element, index: usize) -> Option<&Element> {
    elements(el).nth(index)
}

pub fn element_count(el: &Element) -> usize {
    elements(el).count()
}

pub fn id_of(el: &Element) -> Option<&str> {
    el.attributes.get("id").map(String::as_str)
}

pub fn text_of(el: &Element) -> Option<String> {
    el.get_text().map(|t| t.into_owned())
}

/// Text of the first sub-element, the display name of a leaf item.
pub fn item_name(el: &Element) -> Option<String> {
    element_at(el, 0).and_then(text_of)
}

/// Text of the second sub-element, the raw value of a leaf item.
pub fn item_value(el: &Element) -> Option<String> {
    element_at(el, 1).and_then(text_of)
}

/// A leaf item carries exactly two sub-elements.
pub fn is_leaf_item(el: &Element) -> bool {
    element_count(el) == 2
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<Content>
        <item id="0x1"><name>Vorlauf</name><value>28.5°C</value></item>
        <!-- comment -->
        <item id="0x2"><name>Ruecklauf</name><value>25.1°C</value></item>
        <name>Temperaturen</name>
    </Content>"#;

    #[test]
    fn test_elements_skip_non_elements() {
        let root = parse(DOC).unwrap();
        assert_eq!(element_count(&root), 3);
        let second = element_at(&root, 1).unwrap();
        assert_eq!(id_of(second), Some("0x2"));
        assert_eq!(item_name(second).as_deref(), Some("Ruecklauf"));
        assert_eq!(item_value(second).as_deref(), Some("25.1°C"));
    }

    #[test]
    fn test_leaf_detection() {
        let root = parse(DOC).unwrap();
        assert!(is_leaf_item(element_at(&root, 0).unwrap()));
        assert!(!is_leaf_item(element_at(&root, 2).unwrap()));
        assert!(element_at(&root, 3).is_none());
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(parse("<Content><item></Content>").is_err());
    }
}
