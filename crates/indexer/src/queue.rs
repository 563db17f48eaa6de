//! Materializing the set of dedup-group ids to visit.
//!
//! A queue collection is content-addressed by its selection parameters and
//! bounded by a time window. Finalized collections are reused while their
//! window still covers the request; everything else is built in two stages
//! and garbage-collected opportunistically.

use std::sync::Arc;

use bibdex_core::SourceFilter;
use bibdex_store::{DedupFilter, FindOptions, RecordFilter, RecordSort, RecordStore};
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::IndexError;

/// Selection parameters entering the content hash.
#[derive(Debug, Clone, Default)]
pub struct QueueSelection {
  pub source_spec: Option<String>,
  pub single_id: Option<String>,
}

impl QueueSelection {
  fn content_hash(&self) -> String {
    let canonical = format!(
      "source={};single={}",
      self.source_spec.as_deref().unwrap_or(""),
      self.single_id.as_deref().unwrap_or("")
    );
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
  }
}

pub struct QueueManager {
  store: Arc<dyn RecordStore>,
}

impl QueueManager {
  pub fn new(store: Arc<dyn RecordStore>) -> Self {
    Self { store }
  }

  /// Reuse or build the queue collection for `[from, latest]`. Returns the
  /// collection name, or `None` when nothing is queued.
  pub async fn materialize(
    &self,
    selection: &QueueSelection,
    source_filter: Option<&SourceFilter>,
    from: Option<DateTime<Utc>>,
    latest: DateTime<Utc>,
    cancel: &CancellationToken,
  ) -> Result<Option<String>, IndexError> {
    let hash = selection.content_hash();
    let window_from = from.unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());

    if let Some(existing) = self.store.find_queue_collection(&hash, window_from, latest).await? {
      info!(queue = %existing, "Reusing existing queue collection");
      return Ok(Some(existing));
    }

    let dropped = self.store.cleanup_queue_collections(latest).await?;
    if dropped > 0 {
      debug!(dropped, "Cleaned up stale queue collections");
    }

    let name = self.store.create_queue_collection(&hash, window_from, latest).await?;
    let result = self.populate(selection, source_filter, from, &name, cancel).await;
    match result {
      Ok(queued) if queued > 0 => {
        self.store.finalize_queue_collection(&name).await?;
        info!(queue = %name, queued, "Queue collection finalized");
        Ok(Some(name))
      }
      Ok(_) => {
        self.store.drop_queue_collection(&name).await?;
        debug!("No dedup ids to queue");
        Ok(None)
      }
      Err(e) => {
        // never leave a partial building collection behind
        let _ = self.store.drop_queue_collection(&name).await;
        Err(e)
      }
    }
  }

  async fn populate(
    &self,
    selection: &QueueSelection,
    source_filter: Option<&SourceFilter>,
    from: Option<DateTime<Utc>>,
    name: &str,
    cancel: &CancellationToken,
  ) -> Result<usize, IndexError> {
    let mut queued = 0usize;

    // stage 1: changed records, walked in dedup-id order
    let filter = RecordFilter {
      id: selection.single_id.clone(),
      source: source_filter.cloned(),
      updated_since: from,
      ..Default::default()
    };
    let options = FindOptions {
      sort: RecordSort::DedupId,
      limit: None,
    };
    let mut records = self.store.find_records(&filter, &options).await?;
    let mut last_dedup: Option<String> = None;
    while let Some(record) = records.next().await {
      if cancel.is_cancelled() {
        return Err(IndexError::Interrupted);
      }
      let record = record?;
      let Some(dedup_id) = record.dedup_id else { continue };
      if last_dedup.as_deref() != Some(&dedup_id) {
        if self.store.add_id_to_queue(name, &dedup_id).await? {
          queued += 1;
        }
        last_dedup = Some(dedup_id);
      }
    }

    // stage 2: changed dedup groups
    let dedup_filter = match (&selection.single_id, from) {
      (Some(single), _) => DedupFilter {
        ids: vec![single.clone()],
        ..Default::default()
      },
      (None, Some(from)) => DedupFilter {
        changed_since: Some(from),
        ..Default::default()
      },
      (None, None) => DedupFilter::default(),
    };
    if dedup_filter.is_unbounded() {
      warn!("Processing all dedup groups; stale deleted groups may make this slow");
    }
    let mut dedups = self.store.find_dedups(&dedup_filter).await?;
    while let Some(dedup) = dedups.next().await {
      if cancel.is_cancelled() {
        return Err(IndexError::Interrupted);
      }
      let dedup = dedup?;
      if self.store.add_id_to_queue(name, &dedup.id).await? {
        queued += 1;
      }
    }

    Ok(queued)
  }
}
