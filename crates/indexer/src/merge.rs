//! Fusing dedup-group members into one composite document.
//!
//! Children are scored on field richness and casing quality, then walked in
//! score order: the best child wins single-valued fields, multi-valued and
//! configured merge fields union across all children.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bibdex_core::{Config, SolrDocument, SolrValue, unique_preserving_order};
use tracing::trace;

/// Field receiving every child's own id.
const LOCAL_IDS_FIELD: &str = "local_ids_str_mv";

#[derive(Clone)]
pub struct MergeEngine {
  config: Arc<Config>,
  merged_fields: HashSet<String>,
  single_fields: HashSet<String>,
  /// `author=author2` style redirects parsed out of the merged fields list.
  aliases: HashMap<String, String>,
}

impl MergeEngine {
  pub fn new(config: Arc<Config>) -> Self {
    let mut merged_fields = HashSet::new();
    let mut aliases = HashMap::new();
    for entry in &config.solr.merged_fields {
      match entry.split_once('=') {
        Some((from, to)) => {
          aliases.insert(from.to_string(), to.to_string());
        }
        None => {
          merged_fields.insert(entry.clone());
        }
      }
    }
    let single_fields = config.solr.single_fields.iter().cloned().collect();
    Self {
      config,
      merged_fields,
      single_fields,
      aliases,
    }
  }

  /// Fuse child documents into the merged representation.
  pub fn merge_records(&self, children: &[SolrDocument]) -> SolrDocument {
    let mut sorted: Vec<&SolrDocument> = children.iter().collect();
    // id tiebreak keeps the outcome independent of input order
    sorted.sort_by(|a, b| {
      let (sa, sb) = (self.score(a), self.score(b));
      sb.partial_cmp(&sa)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.get_str("id").cmp(&b.get_str("id")))
    });

    let mut merged = SolrDocument::new();
    for child in sorted {
      trace!(id = child.get_str("id").unwrap_or(""), "Merging child");
      for (field, value) in child.iter() {
        if field == "id" {
          if let Some(id) = value.first() {
            merged.append(LOCAL_IDS_FIELD, id);
          }
          continue;
        }
        let values = value.values();

        if let Some(target) = self.aliases.get(field) {
          if !merged.contains(field) {
            merged.insert(field.clone(), value.clone());
          } else if merged.values_of(field) != values {
            merged.extend(target, values.iter().cloned());
          }
          continue;
        }

        if field.ends_with("_mv") || self.merged_fields.contains(field) {
          merged.extend(field, values.iter().cloned());
        } else if self.single_fields.contains(field) {
          if !merged.contains(field) {
            merged.insert(field.clone(), value.clone());
          }
        } else if field == "allfields" {
          merged.extend("allfields", values.iter().cloned());
        }
        // remaining fields belong to individual records only
      }
    }

    self.dedup_lists(&mut merged);
    merged
  }

  /// Union configured merged-record fields back onto each child.
  pub fn copy_merged_data_to_children(&self, merged: &SolrDocument, children: &mut [SolrDocument]) {
    for field in &self.config.solr.copy_from_merged_record {
      let merged_values = merged.values_of(field);
      if merged_values.is_empty() {
        continue;
      }
      let case_sensitive = self.config.solr.hierarchical_facets.contains(field);
      for child in children.iter_mut() {
        let mut combined = child.values_of(field).to_vec();
        combined.extend(merged_values.iter().cloned());
        child.insert(
          field.clone(),
          SolrValue::List(unique_preserving_order(combined, case_sensitive)),
        );
      }
    }
  }

  /// Merge candidate score: field count, title length, and casing quality.
  /// More lowercase text scores higher; an all-caps record is usually the
  /// poorer transcription.
  pub fn score(&self, doc: &SolrDocument) -> f64 {
    let mut field_count = 0usize;
    let mut ratios: Vec<f64> = Vec::new();
    for field in &self.config.solr.scored_fields {
      let values = doc.values_of(field);
      field_count += values.len();
      for value in values {
        if value.is_empty() {
          continue;
        }
        let similarity = lcs_len(value.as_bytes(), value.to_lowercase().as_bytes());
        ratios.push(1.0 - similarity as f64 / value.len() as f64);
      }
    }
    if field_count == 0 {
      return 0.0;
    }
    let caps_ratio = if ratios.is_empty() {
      0.0
    } else {
      ratios.iter().sum::<f64>() / ratios.len() as f64
    };
    let title_len = doc.get_str("title").map(str::len).unwrap_or(0);
    if caps_ratio == 0.0 {
      field_count as f64
    } else {
      (field_count + title_len) as f64 / caps_ratio
    }
  }

  fn dedup_lists(&self, doc: &mut SolrDocument) {
    let list_fields: Vec<String> = doc
      .iter()
      .filter(|(_, value)| matches!(value, SolrValue::List(_)))
      .map(|(field, _)| field.clone())
      .collect();
    for field in list_fields {
      // hierarchical facet values encode path depth in their casing
      let case_sensitive = self.config.solr.hierarchical_facets.contains(&field);
      let values = doc.values_of(&field).to_vec();
      doc.insert(field, SolrValue::List(unique_preserving_order(values, case_sensitive)));
    }
  }
}

/// Longest-common-subsequence length over bytes, rolling-row DP.
fn lcs_len(a: &[u8], b: &[u8]) -> usize {
  if a.is_empty() || b.is_empty() {
    return 0;
  }
  let mut prev = vec![0usize; b.len() + 1];
  let mut curr = vec![0usize; b.len() + 1];
  for &ac in a {
    for (j, &bc) in b.iter().enumerate() {
      curr[j + 1] = if ac == bc { prev[j] + 1 } else { prev[j + 1].max(curr[j]) };
    }
    std::mem::swap(&mut prev, &mut curr);
  }
  prev[b.len()]
}
