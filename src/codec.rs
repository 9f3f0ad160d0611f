//! Decoding of the device's `status.xml` document into a flat [`StatusSnapshot`].
//!
//! Nested elements are flattened by joining tag names with `_`
//! (`<heater1><battv>` becomes `heater1_battv`). Fault-list containers are the
//! exception: each `<fault>` entry becomes `fault_<name>`, keyed by its `<name>`
//! child rather than its position in the tree.

use std::collections::BTreeMap;

use xmltree::{Element, XMLNode};

use crate::types::{FAULT_PREFIX, FieldValue, StatusSnapshot};
use crate::{Error, Result};

/// Tags whose children are `<fault><name/><value/></fault>` entries.
const FAULT_CONTAINERS: &[&str] = &["heater1-faults", "faults"];

pub fn decode(xml: &str) -> Result<StatusSnapshot> {
    let root = Element::parse(xml.as_bytes()).map_err(|e| Error::Decode(e.to_string()))?;
    let mut fields = BTreeMap::new();
    flatten(&root, "", &mut fields);
    Ok(StatusSnapshot::new(fields))
}

/// Empty text is null; otherwise integer, then finite float, then the trimmed text.
pub fn coerce(text: &str) -> FieldValue {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return FieldValue::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return FieldValue::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>()
        && f.is_finite()
    {
        return FieldValue::Float(f);
    }
    FieldValue::Text(trimmed.to_string())
}

fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(XMLNode::as_element)
}

fn is_leaf(element: &Element) -> bool {
    child_elements(element).next().is_none()
}

fn text_value(element: &Element) -> FieldValue {
    element
        .get_text()
        .map_or(FieldValue::Null, |text| coerce(&text))
}

fn flatten(element: &Element, prefix: &str, out: &mut BTreeMap<String, FieldValue>) {
    for child in child_elements(element) {
        if FAULT_CONTAINERS.contains(&child.name.as_str()) {
            extract_faults(child, out);
            continue;
        }

        let key = if prefix.is_empty() {
            child.name.clone()
        } else {
            format!("{prefix}_{}", child.name)
        };

        if is_leaf(child) {
            out.insert(key, text_value(child));
        } else {
            flatten(child, &key, out);
        }
    }
}

fn extract_faults(container: &Element, out: &mut BTreeMap<String, FieldValue>) {
    for fault in child_elements(container).filter(|e| e.name == "fault") {
        let name = match fault.get_child("name").and_then(|n| n.get_text()) {
            Some(n) if !n.trim().is_empty() => n.trim().to_string(),
            _ => continue,
        };
        let value = fault
            .get_child("value")
            .map_or(FieldValue::Null, text_value);
        out.insert(format!("{FAULT_PREFIX}{name}"), value);
    }
}
