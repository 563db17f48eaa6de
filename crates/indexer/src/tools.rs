//! Maintenance operations: field value counting and index/store consistency.

use std::collections::HashMap;
use std::time::Duration;

use bibdex_core::SourceFilter;
use bibdex_solr::SolrTransport;
use bibdex_store::{FindOptions, RecordFilter, RecordStore};
use futures::StreamExt;
use tracing::{info, warn};

use crate::builder::BuildOutcome;
use crate::compare::url_encode;
use crate::coordinator::{Coordinator, RunOutcome};
use crate::error::IndexError;
use crate::sink::UpdateSink;

const READ_TIMEOUT: Duration = Duration::from_secs(300);
const SCROLL_ROWS: usize = 1000;

impl Coordinator {
  /// Tally the values of one field across records, using either the raw
  /// parser output or fully mapped documents. Sorted by count descending.
  pub async fn count_values(
    &self,
    source: Option<&str>,
    field: &str,
    mapped: bool,
  ) -> Result<Vec<(String, u64)>, IndexError> {
    let filter = RecordFilter {
      source: source
        .map(SourceFilter::parse)
        .transpose()
        .map_err(|e| IndexError::Config(e.to_string()))?,
      deleted: Some(false),
      ..Default::default()
    };

    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut stream = self.store.find_records(&filter, &FindOptions::default()).await?;
    let mut processed = 0u64;
    while let Some(record) = stream.next().await {
      if self.cancel.is_cancelled() {
        return Err(IndexError::Interrupted);
      }
      let record = record?;
      let doc = if mapped {
        match self.builder.build_document(&record, None).await {
          Ok(BuildOutcome::Document { doc, .. }) => doc,
          Ok(BuildOutcome::Skip) => continue,
          Err(e) => {
            warn!(id = %record.id, err = %e, "Failed to build document for counting");
            continue;
          }
        }
      } else {
        match self.builder.raw_document(&record) {
          Ok(doc) => doc,
          Err(e) => {
            warn!(id = %record.id, err = %e, "Failed to parse record for counting");
            continue;
          }
        }
      };
      for value in doc.values_of(field) {
        *counts.entry(value.clone()).or_insert(0) += 1;
      }
      processed += 1;
      if processed.is_multiple_of(1000) {
        info!(processed, "Records counted");
      }
    }

    let mut counts: Vec<(String, u64)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(counts)
  }

  /// Scroll the whole index and delete every id whose record (or dedup
  /// group) no longer lives in the store.
  pub async fn check_indexed_records(&self) -> Result<RunOutcome, IndexError> {
    let mut sink = UpdateSink::new(
      &self.config.solr,
      self.client.clone(),
      None,
      true,
      self.cancel.child_token(),
    )?;

    let mut cursor = "*".to_string();
    let mut checked = 0u64;
    let mut orphans = 0u64;
    loop {
      if self.cancel.is_cancelled() {
        sink.drain().await?;
        sink.destroy().await;
        return Ok(RunOutcome::Interrupted);
      }
      let url = format!(
        "{}?q=*:*&wt=json&fl=id,record_format,recordtype&rows={SCROLL_ROWS}&sort=id+asc&cursorMark={}",
        self.config.solr.search_url,
        url_encode(&cursor)
      );
      let response = self.transport.get_json(&url, READ_TIMEOUT).await.map_err(IndexError::Solr)?;
      let docs = response
        .get("response")
        .and_then(|r| r.get("docs"))
        .and_then(|d| d.as_array())
        .cloned()
        .unwrap_or_default();

      for doc in &docs {
        let Some(id) = doc.get("id").and_then(|v| v.as_str()) else {
          continue;
        };
        let format = doc
          .get("record_format")
          .and_then(|v| v.as_str())
          .or_else(|| doc.get("recordtype").and_then(|v| v.as_str()));
        let live = if format == Some("merged") {
          self.store.get_dedup(id).await?.map(|d| !d.deleted).unwrap_or(false)
        } else {
          self.store.get_record(id).await?.map(|r| !r.deleted).unwrap_or(false)
        };
        if !live {
          sink.push_delete(id).await?;
          orphans += 1;
        }
        checked += 1;
        if checked.is_multiple_of(10_000) {
          info!(checked, orphans, "Checking indexed records");
        }
      }

      let next = response.get("nextCursorMark").and_then(|v| v.as_str());
      match next {
        Some(next) if next != cursor => cursor = next.to_string(),
        _ => break,
      }
    }

    let updated = sink.finish().await?;
    sink.destroy().await;
    info!(checked, orphans, "Index check complete");
    Ok(RunOutcome::Completed { updated })
  }
}
