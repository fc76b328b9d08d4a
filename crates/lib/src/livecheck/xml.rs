//! XML documents as JSON values, so one pipeline language serves both
//! strategies.
//!
//! An element becomes an object: attributes under `@name`, child elements
//! under their tag name (an array when the tag repeats) and non-blank text
//! under `#text`. An element with only text collapses to the string itself.
//! The document is wrapped in an object keyed by the root tag.

use serde_json::{Map, Value};

pub fn to_value(text: &str) -> Result<Value, roxmltree::Error> {
  let doc = roxmltree::Document::parse(text)?;
  let root = doc.root_element();
  let mut wrapper = Map::new();
  wrapper.insert(root.tag_name().name().to_string(), element(root));
  Ok(Value::Object(wrapper))
}

fn element(node: roxmltree::Node<'_, '_>) -> Value {
  let mut map = Map::new();
  for attr in node.attributes() {
    map.insert(format!("@{}", attr.name()), Value::String(attr.value().to_string()));
  }

  let mut text = String::new();
  for child in node.children() {
    if child.is_element() {
      let key = child.tag_name().name().to_string();
      let value = element(child);
      match map.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
          let first = existing.take();
          *existing = Value::Array(vec![first, value]);
        }
        None => {
          map.insert(key, value);
        }
      }
    } else if let Some(t) = child.text() {
      text.push_str(t);
    }
  }

  let text = text.trim();
  if map.is_empty() {
    return Value::String(text.to_string());
  }
  if !text.is_empty() {
    map.insert("#text".to_string(), Value::String(text.to_string()));
  }
  Value::Object(map)
}
