//! The seam to external record parsers.
//!
//! A [`MetadataRecord`] wraps one parsed payload and answers the questions the
//! document builder asks. Concrete parsers live outside this workspace and are
//! registered in a [`FormatRegistry`] at startup; a JSON-backed implementation
//! ships here for tests and simple feeds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::SolrDocument;
use crate::record::Record;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
  #[error("no parser registered for format '{0}'")]
  UnknownFormat(String),
  #[error("payload parse error: {0}")]
  Parse(String),
}

/// A title participating in work identification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkTitle {
  pub value: String,
  /// Uniform titles identify the work on their own; others pair with authors.
  #[serde(default)]
  pub uniform: bool,
}

/// Titles and authors used to derive work keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkIdentificationData {
  #[serde(default)]
  pub titles: Vec<WorkTitle>,
  #[serde(default)]
  pub authors: Vec<String>,
  #[serde(default)]
  pub titles_alt_script: Vec<WorkTitle>,
  #[serde(default)]
  pub authors_alt_script: Vec<String>,
}

impl WorkIdentificationData {
  pub fn is_empty(&self) -> bool {
    (self.titles.is_empty() && self.titles_alt_script.is_empty())
      || (self.authors.is_empty() && self.authors_alt_script.is_empty() && !self.has_uniform_title())
  }

  fn has_uniform_title(&self) -> bool {
    self.titles.iter().chain(&self.titles_alt_script).any(|t| t.uniform)
  }
}

/// One parsed metadata payload.
pub trait MetadataRecord: Send + Sync {
  /// Native transformation into index fields.
  fn to_solr_array(&self) -> SolrDocument;
  /// Current serialized form, reflecting any merged component parts.
  fn to_xml(&self) -> String;
  fn format(&self) -> String;
  fn title(&self) -> String;
  fn volume(&self) -> String;
  fn issue(&self) -> String;
  fn start_page(&self) -> String;
  fn container_reference(&self) -> String;
  fn container_title(&self) -> String;
  fn is_component_part(&self) -> bool;
  /// Fold component part records into this host. Returns the newest change
  /// date among the parts, used to promote the host's change date.
  fn merge_component_parts(&mut self, parts: &[Record]) -> Option<DateTime<Utc>>;
  fn work_identification_data(&self) -> WorkIdentificationData;
  /// Warnings accumulated while parsing, attached to the warnings field.
  fn processing_warnings(&self) -> Vec<String>;
  fn serialize(&self) -> String;
}

type Constructor = Arc<dyn Fn(&str) -> Result<Box<dyn MetadataRecord>, MetadataError> + Send + Sync>;

/// Format tag → parser constructor, injected at startup.
#[derive(Clone, Default)]
pub struct FormatRegistry {
  constructors: HashMap<String, Constructor>,
}

impl FormatRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with the built-in JSON format under the `json` tag.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register("json", |payload| {
      Ok(Box::new(JsonMetadataRecord::parse(payload)?) as Box<dyn MetadataRecord>)
    });
    registry
  }

  pub fn register<F>(&mut self, format: &str, constructor: F)
  where
    F: Fn(&str) -> Result<Box<dyn MetadataRecord>, MetadataError> + Send + Sync + 'static,
  {
    self.constructors.insert(format.to_string(), Arc::new(constructor));
  }

  pub fn create(&self, format: &str, payload: &str) -> Result<Box<dyn MetadataRecord>, MetadataError> {
    let constructor = self
      .constructors
      .get(format)
      .ok_or_else(|| MetadataError::UnknownFormat(format.to_string()))?;
    constructor(payload)
  }

  pub fn knows(&self, format: &str) -> bool {
    self.constructors.contains_key(format)
  }
}

impl std::fmt::Debug for FormatRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let mut formats: Vec<_> = self.constructors.keys().collect();
    formats.sort();
    f.debug_struct("FormatRegistry").field("formats", &formats).finish()
  }
}

/// JSON payload shape understood by [`JsonMetadataRecord`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct JsonPayload {
  format: String,
  fields: SolrDocument,
  work: WorkIdentificationData,
  warnings: Vec<String>,
  /// Titles of merged component parts, carried into `contents`.
  merged_parts: Vec<String>,
}

/// Reference parser for JSON feeds: the payload already carries index fields.
#[derive(Debug, Clone)]
pub struct JsonMetadataRecord {
  payload: JsonPayload,
}

impl JsonMetadataRecord {
  pub fn parse(payload: &str) -> Result<Self, MetadataError> {
    let payload: JsonPayload = serde_json::from_str(payload).map_err(|e| MetadataError::Parse(e.to_string()))?;
    Ok(Self { payload })
  }

  fn field(&self, name: &str) -> String {
    self.payload.fields.get_str(name).unwrap_or_default().to_string()
  }
}

impl MetadataRecord for JsonMetadataRecord {
  fn to_solr_array(&self) -> SolrDocument {
    let mut doc = self.payload.fields.clone();
    for title in &self.payload.merged_parts {
      doc.append("contents", title.clone());
    }
    doc
  }

  fn to_xml(&self) -> String {
    self.serialize()
  }

  fn format(&self) -> String {
    if !self.payload.format.is_empty() {
      return self.payload.format.clone();
    }
    self.field("format")
  }

  fn title(&self) -> String {
    self.field("title")
  }

  fn volume(&self) -> String {
    self.field("volume")
  }

  fn issue(&self) -> String {
    self.field("issue")
  }

  fn start_page(&self) -> String {
    self.field("start_page")
  }

  fn container_reference(&self) -> String {
    self.field("container_reference")
  }

  fn container_title(&self) -> String {
    self.field("container_title")
  }

  fn is_component_part(&self) -> bool {
    !self.field("host_record_id").is_empty()
  }

  fn merge_component_parts(&mut self, parts: &[Record]) -> Option<DateTime<Utc>> {
    let mut latest = None;
    for part in parts {
      let title = JsonMetadataRecord::parse(&part.payload)
        .map(|r| r.title())
        .unwrap_or_default();
      if !title.is_empty() {
        self.payload.merged_parts.push(title);
      }
      if latest.is_none_or(|t| part.updated > t) {
        latest = Some(part.updated);
      }
    }
    latest
  }

  fn work_identification_data(&self) -> WorkIdentificationData {
    self.payload.work.clone()
  }

  fn processing_warnings(&self) -> Vec<String> {
    self.payload.warnings.clone()
  }

  fn serialize(&self) -> String {
    serde_json::to_string(&self.payload).unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_registry_create() {
    let registry = FormatRegistry::with_builtins();
    assert!(registry.knows("json"));
    assert!(!registry.knows("marc"));

    let record = registry
      .create("json", r#"{"format":"Book","fields":{"title":"A Title"}}"#)
      .unwrap();
    assert_eq!(record.format(), "Book");
    assert_eq!(record.title(), "A Title");

    assert!(matches!(
      registry.create("marc", "<record/>"),
      Err(MetadataError::UnknownFormat(_))
    ));
  }

  #[test]
  fn test_merge_component_parts() {
    let mut host = JsonMetadataRecord::parse(r#"{"fields":{"title":"Host"}}"#).unwrap();
    let part = Record {
      id: "s.c1".into(),
      source_id: "s".into(),
      format: "json".into(),
      payload: r#"{"fields":{"title":"Part One"}}"#.into(),
      linking_ids: Vec::new(),
      host_record_ids: vec!["h1".into()],
      deleted: false,
      created: Utc::now(),
      updated: Utc::now(),
      dedup_id: None,
    };
    let latest = host.merge_component_parts(std::slice::from_ref(&part));
    assert_eq!(latest, Some(part.updated));
    assert_eq!(host.to_solr_array().values_of("contents"), ["Part One"]);
  }

  #[test]
  fn test_work_data_emptiness() {
    let empty = WorkIdentificationData::default();
    assert!(empty.is_empty());

    let uniform_only = WorkIdentificationData {
      titles: vec![WorkTitle {
        value: "Kalevala".into(),
        uniform: true,
      }],
      ..Default::default()
    };
    assert!(!uniform_only.is_empty());

    let titles_without_authors = WorkIdentificationData {
      titles: vec![WorkTitle {
        value: "Plain".into(),
        uniform: false,
      }],
      ..Default::default()
    };
    assert!(titles_without_authors.is_empty());
  }
}
