//! Record and dedup-group value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DataSourceSettings;

/// A normalized bibliographic record as stored in the document store.
///
/// The id carries the `source.localId` form. A record belongs to at most one
/// dedup group, tracked by the back-pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
  pub id: String,
  pub source_id: String,
  /// Metadata format tag resolved against the format registry.
  pub format: String,
  /// Original payload, typically XML.
  pub payload: String,
  #[serde(default)]
  pub linking_ids: Vec<String>,
  #[serde(default)]
  pub host_record_ids: Vec<String>,
  #[serde(default)]
  pub deleted: bool,
  pub created: DateTime<Utc>,
  pub updated: DateTime<Utc>,
  #[serde(default)]
  pub dedup_id: Option<String>,
}

impl Record {
  /// The local part of the two-part id.
  pub fn local_id(&self) -> &str {
    self.id.split_once('.').map(|(_, local)| local).unwrap_or(&self.id)
  }

  /// Component parts point at a host record's linking id.
  pub fn is_component_part(&self) -> bool {
    !self.host_record_ids.is_empty()
  }
}

/// A deduplication group: records judged to describe the same work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupGroup {
  pub id: String,
  /// Member record ids, ordered.
  pub record_ids: Vec<String>,
  #[serde(default)]
  pub deleted: bool,
  pub updated: DateTime<Utc>,
}

/// Turn a stored record id into the id indexed in Solr.
///
/// The source prefix is stripped when the source sets `index_unprefixed_ids`,
/// and replaced when an `id_prefix` differing from the source id is set.
pub fn create_solr_id(record_id: &str, settings: Option<&DataSourceSettings>) -> String {
  let Some((source, local)) = record_id.split_once('.') else {
    return record_id.to_string();
  };
  let Some(settings) = settings else {
    return record_id.to_string();
  };
  if settings.index_unprefixed_ids {
    return local.to_string();
  }
  match settings.id_prefix.as_deref() {
    Some(prefix) if prefix != source => format!("{prefix}.{local}"),
    _ => record_id.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(id: &str) -> Record {
    Record {
      id: id.to_string(),
      source_id: "src1".to_string(),
      format: "marc".to_string(),
      payload: "<record/>".to_string(),
      linking_ids: Vec::new(),
      host_record_ids: Vec::new(),
      deleted: false,
      created: Utc::now(),
      updated: Utc::now(),
      dedup_id: None,
    }
  }

  #[test]
  fn test_local_id() {
    assert_eq!(record("src1.001").local_id(), "001");
    assert_eq!(record("noprefix").local_id(), "noprefix");
  }

  #[test]
  fn test_create_solr_id() {
    let default = DataSourceSettings::default();
    assert_eq!(create_solr_id("src1.001", Some(&default)), "src1.001");
    assert_eq!(create_solr_id("src1.001", None), "src1.001");

    let unprefixed = DataSourceSettings {
      index_unprefixed_ids: true,
      ..Default::default()
    };
    assert_eq!(create_solr_id("src1.001", Some(&unprefixed)), "001");

    let prefixed = DataSourceSettings {
      id_prefix: Some("alt".to_string()),
      ..Default::default()
    };
    assert_eq!(create_solr_id("src1.001", Some(&prefixed)), "alt.001");
  }
}
