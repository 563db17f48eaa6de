//! The flat field map shipped to the search index.

use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::normalize::NormalizationForm;

/// A field value: a single string or an ordered list of strings.
///
/// Boolean markers (`merged_boolean` and friends) are carried as the strings
/// `"true"`/`"false"`; numeric values arriving from the index are stringified
/// on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolrValue {
  Str(String),
  List(Vec<String>),
}

impl SolrValue {
  /// All values, a scalar counting as a one-element slice.
  pub fn values(&self) -> &[String] {
    match self {
      SolrValue::Str(s) => std::slice::from_ref(s),
      SolrValue::List(l) => l.as_slice(),
    }
  }

  pub fn first(&self) -> Option<&str> {
    self.values().first().map(String::as_str)
  }
}

impl From<String> for SolrValue {
  fn from(s: String) -> Self {
    SolrValue::Str(s)
  }
}

impl From<&str> for SolrValue {
  fn from(s: &str) -> Self {
    SolrValue::Str(s.to_string())
  }
}

impl From<Vec<String>> for SolrValue {
  fn from(l: Vec<String>) -> Self {
    SolrValue::List(l)
  }
}

/// An index-ready document: ordered flat map from field name to value.
///
/// Iteration order is the lexicographic field order, which keeps batch
/// serialization and merge fusion deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolrDocument {
  fields: BTreeMap<String, SolrValue>,
}

impl SolrDocument {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, field: &str) -> Option<&SolrValue> {
    self.fields.get(field)
  }

  pub fn get_str(&self, field: &str) -> Option<&str> {
    self.fields.get(field).and_then(SolrValue::first)
  }

  /// Values of a field, a scalar counting as one value. Empty when absent.
  pub fn values_of(&self, field: &str) -> &[String] {
    self.fields.get(field).map(SolrValue::values).unwrap_or(&[])
  }

  pub fn contains(&self, field: &str) -> bool {
    self.fields.contains_key(field)
  }

  pub fn insert(&mut self, field: impl Into<String>, value: impl Into<SolrValue>) {
    self.fields.insert(field.into(), value.into());
  }

  /// Insert only if the field is absent.
  pub fn insert_if_absent(&mut self, field: &str, value: impl Into<SolrValue>) {
    if !self.fields.contains_key(field) {
      self.fields.insert(field.to_string(), value.into());
    }
  }

  pub fn remove(&mut self, field: &str) -> Option<SolrValue> {
    self.fields.remove(field)
  }

  /// Append a value, converting a scalar field into a list.
  pub fn append(&mut self, field: &str, value: impl Into<String>) {
    let value = value.into();
    match self.fields.get_mut(field) {
      Some(SolrValue::List(list)) => list.push(value),
      Some(SolrValue::Str(existing)) => {
        let existing = std::mem::take(existing);
        self.fields.insert(field.to_string(), SolrValue::List(vec![existing, value]));
      }
      None => {
        self.fields.insert(field.to_string(), SolrValue::List(vec![value]));
      }
    }
  }

  pub fn extend(&mut self, field: &str, values: impl IntoIterator<Item = String>) {
    for value in values {
      self.append(field, value);
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &SolrValue)> {
    self.fields.iter()
  }

  pub fn field_names(&self) -> impl Iterator<Item = &String> {
    self.fields.keys()
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  /// Final cleanup before a document leaves the pipeline: normalize every
  /// string value under `form` (except `fullrecord`), drop empty and `"0"`
  /// entries, and deduplicate lists preserving order. Scalar fields whose
  /// value is dropped disappear entirely.
  pub fn finalize(&mut self, form: NormalizationForm) {
    let mut dropped = Vec::new();
    for (field, value) in self.fields.iter_mut() {
      let skip_normalization = field == "fullrecord";
      match value {
        SolrValue::Str(s) => {
          if !skip_normalization {
            *s = form.apply(s);
          }
          if is_dropped_value(s) {
            dropped.push(field.clone());
          }
        }
        SolrValue::List(list) => {
          let normalized = list
            .iter()
            .map(|v| if skip_normalization { v.clone() } else { form.apply(v) })
            .filter(|v| !is_dropped_value(v));
          *list = unique_preserving_order(normalized, true);
          if list.is_empty() {
            dropped.push(field.clone());
          }
        }
      }
    }
    for field in dropped {
      self.fields.remove(&field);
    }
  }
}

/// Values the index never receives: empty strings and bare zero.
pub fn is_dropped_value(value: &str) -> bool {
  value.is_empty() || value == "0"
}

/// Order-preserving deduplication. Case-insensitive comparison keeps the
/// first-seen spelling.
pub fn unique_preserving_order(values: impl IntoIterator<Item = String>, case_sensitive: bool) -> Vec<String> {
  let mut seen = HashSet::new();
  let mut out = Vec::new();
  for value in values {
    let key = if case_sensitive { value.clone() } else { value.to_lowercase() };
    if seen.insert(key) {
      out.push(value);
    }
  }
  out
}

impl Serialize for SolrDocument {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.fields.len()))?;
    for (field, value) in &self.fields {
      match value {
        SolrValue::Str(s) => map.serialize_entry(field, s)?,
        SolrValue::List(l) => map.serialize_entry(field, l)?,
      }
    }
    map.end()
  }
}

impl<'de> Deserialize<'de> for SolrDocument {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct DocVisitor;

    impl<'de> Visitor<'de> for DocVisitor {
      type Value = SolrDocument;

      fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a flat map of field names to values")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SolrDocument, A::Error> {
        let mut doc = SolrDocument::new();
        while let Some((field, value)) = access.next_entry::<String, serde_json::Value>()? {
          match value {
            serde_json::Value::Array(items) => {
              let list = items.into_iter().map(json_to_string).collect();
              doc.insert(field, SolrValue::List(list));
            }
            other => doc.insert(field, json_to_string(other)),
          }
        }
        Ok(doc)
      }
    }

    deserializer.deserialize_map(DocVisitor)
  }
}

fn json_to_string(value: serde_json::Value) -> String {
  match value {
    serde_json::Value::String(s) => s,
    serde_json::Value::Bool(b) => b.to_string(),
    serde_json::Value::Number(n) => n.to_string(),
    serde_json::Value::Null => String::new(),
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_append_converts_scalar() {
    let mut doc = SolrDocument::new();
    doc.insert("topic", "history");
    doc.append("topic", "art");
    assert_eq!(doc.values_of("topic"), ["history", "art"]);
  }

  #[test]
  fn test_finalize_drops_empties_and_zeroes() {
    let mut doc = SolrDocument::new();
    doc.insert("title", "A Title");
    doc.insert("edition", "0");
    doc.insert("blank", "");
    doc.insert("topic", SolrValue::List(vec!["art".into(), "".into(), "0".into(), "art".into(), "Art".into()]));
    doc.finalize(NormalizationForm::Nfkc);

    assert_eq!(doc.get_str("title"), Some("A Title"));
    assert!(!doc.contains("edition"));
    assert!(!doc.contains("blank"));
    assert_eq!(doc.values_of("topic"), ["art", "Art"]);
  }

  #[test]
  fn test_finalize_skips_fullrecord() {
    let mut doc = SolrDocument::new();
    doc.insert("fullrecord", "cafe\u{0301}");
    doc.insert("title", "cafe\u{0301}");
    doc.finalize(NormalizationForm::Nfc);
    assert_eq!(doc.get_str("fullrecord"), Some("cafe\u{0301}"));
    assert_eq!(doc.get_str("title"), Some("caf\u{00e9}"));
  }

  #[test]
  fn test_serialization_round_trip() {
    let mut doc = SolrDocument::new();
    doc.insert("id", "src1.001");
    doc.insert("topic", SolrValue::List(vec!["a".into(), "b".into()]));
    let json = serde_json::to_string(&doc).unwrap();
    assert_eq!(json, r#"{"id":"src1.001","topic":["a","b"]}"#);

    let parsed: SolrDocument = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, doc);
  }

  #[test]
  fn test_deserialize_stringifies_scalars() {
    let parsed: SolrDocument = serde_json::from_str(r#"{"merged_boolean":true,"year":2001}"#).unwrap();
    assert_eq!(parsed.get_str("merged_boolean"), Some("true"));
    assert_eq!(parsed.get_str("year"), Some("2001"));
  }

  #[test]
  fn test_unique_preserving_order() {
    let values = vec!["B".to_string(), "a".to_string(), "b".to_string(), "A".to_string()];
    assert_eq!(unique_preserving_order(values.clone(), false), ["B", "a"]);
    assert_eq!(unique_preserving_order(values, true), ["B", "a", "b", "A"]);
  }
}
