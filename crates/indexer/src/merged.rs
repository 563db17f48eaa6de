//! The merged dedup-group stream.
//!
//! Queued dedup ids flow through a merge worker pool; each worker rebuilds
//! the group's child documents, fuses them, and reports the upserts and
//! deletions the group now requires.

use std::sync::Arc;

use bibdex_core::{SourceFilter, create_solr_id};
use bibdex_store::RecordStore;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::builder::BuildOutcome;
use crate::compare::CompareWriter;
use crate::coordinator::Coordinator;
use crate::error::IndexError;
use crate::pool::{PoolHandler, PoolInit, WorkerPool};
use crate::queue::{QueueManager, QueueSelection};
use crate::sink::UpdateSink;

const MERGE_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergedOutcome {
  NoUpdates,
  Updated,
  Interrupted,
}

#[derive(Debug, Clone)]
pub(crate) struct MergedParams {
  pub source_spec: Option<String>,
  pub source_filter: Option<SourceFilter>,
  pub single: Option<String>,
  pub from: Option<DateTime<Utc>>,
  /// Mark the filtered sources' members for deletion instead of indexing.
  pub delete: bool,
  pub dump_prefix: Option<String>,
  pub no_commit: bool,
}

/// What one dedup group resolves to.
pub(crate) struct DedupResult {
  pub dedup_id: String,
  pub updates: Vec<bibdex_core::SolrDocument>,
  pub deletes: Vec<String>,
  pub error: Option<String>,
}

impl Coordinator {
  /// Run the merged stream over the materialized dedup-id queue.
  pub(crate) async fn process_merged(
    &self,
    params: MergedParams,
    mut compare: Option<&mut CompareWriter>,
  ) -> Result<MergedOutcome, IndexError> {
    // own connection; this may run as a sibling of the single stream
    self.store.reconnect().await?;

    let latest = self.store.latest_record_update().await?.unwrap_or_else(Utc::now);
    let selection = QueueSelection {
      source_spec: params.source_spec.clone(),
      single_id: params.single.clone(),
    };
    let queue = match QueueManager::new(self.store.clone())
      .materialize(&selection, params.source_filter.as_ref(), params.from, latest, &self.cancel)
      .await
    {
      Ok(queue) => queue,
      Err(IndexError::Interrupted) => return Ok(MergedOutcome::Interrupted),
      Err(e) => return Err(e),
    };
    let Some(queue_name) = queue else {
      debug!("No dedup groups to process");
      return Ok(MergedOutcome::NoUpdates);
    };

    let ids = self.store.queued_ids(&queue_name).await?;
    info!(count = ids.len(), "Processing dedup groups");

    let mut sink = match compare.is_some() {
      true => None,
      false => Some(UpdateSink::new(
        &self.config.solr,
        self.client.clone(),
        params.dump_prefix.as_deref(),
        !params.no_commit,
        self.cancel.child_token(),
      )?),
    };

    let mut pool = self.merge_pool(&params);
    let mut count = 0u64;
    let mut interrupted = false;

    for dedup_id in ids {
      if self.cancel.is_cancelled() {
        interrupted = true;
        break;
      }
      pool.add_request(dedup_id).await?;
      while let Some(result) = pool.try_result() {
        count += 1;
        self.emit_dedup_result(result, &mut sink, compare.as_deref_mut()).await?;
        self.after_record(count, &mut sink).await?;
      }
    }

    if !interrupted {
      while let Some(result) = pool.next_result().await {
        count += 1;
        self.emit_dedup_result(result, &mut sink, compare.as_deref_mut()).await?;
        self.after_record(count, &mut sink).await?;
      }
    }
    pool.destroy().await;

    let updated = match sink.as_mut() {
      Some(sink) => {
        sink.drain().await?;
        sink.updated()
      }
      None => false,
    };
    if let Some(sink) = sink {
      sink.destroy().await;
    }

    info!(count, "Merged stream done");
    if interrupted {
      return Ok(MergedOutcome::Interrupted);
    }
    Ok(if updated {
      MergedOutcome::Updated
    } else {
      MergedOutcome::NoUpdates
    })
  }

  fn merge_pool(&self, params: &MergedParams) -> WorkerPool<String, DedupResult> {
    let coordinator = self.clone();
    let source_filter = params.source_filter.clone();
    let delete = params.delete;
    let handler: PoolHandler<String, DedupResult> = Arc::new(move |dedup_id: String| {
      let coordinator = coordinator.clone();
      let source_filter = source_filter.clone();
      Box::pin(async move {
        coordinator
          .process_dedup_record(&dedup_id, source_filter.as_ref(), delete)
          .await
      })
    });
    let store = self.store.clone();
    let init: PoolInit = Arc::new(move |worker_id| {
      let store = store.clone();
      Box::pin(async move {
        if let Err(e) = store.reconnect().await {
          warn!(worker_id, err = %e, "Merge worker reconnect failed");
        }
      })
    });
    WorkerPool::new(
      "merge",
      self.config.solr.record_workers,
      MERGE_QUEUE_SIZE,
      handler,
      Some(init),
      self.cancel.child_token(),
    )
  }

  /// Resolve one dedup group into upserts and deletions.
  pub(crate) async fn process_dedup_record(
    &self,
    dedup_id: &str,
    source_filter: Option<&SourceFilter>,
    delete: bool,
  ) -> DedupResult {
    let mut result = DedupResult {
      dedup_id: dedup_id.to_string(),
      updates: Vec::new(),
      deletes: Vec::new(),
      error: None,
    };
    if let Err(e) = self.resolve_dedup_record(&mut result, source_filter, delete).await {
      result.error = Some(e.to_string());
    }
    result
  }

  async fn resolve_dedup_record(
    &self,
    result: &mut DedupResult,
    source_filter: Option<&SourceFilter>,
    delete: bool,
  ) -> Result<(), IndexError> {
    let Some(dedup) = self.store.get_dedup(&result.dedup_id).await? else {
      warn!(dedup_id = %result.dedup_id, "Dedup record not found");
      return Ok(());
    };
    if dedup.deleted {
      result.deletes.push(dedup.id.clone());
      return Ok(());
    }

    let non_indexed = self.config.non_indexed_sources();
    let mut children = Vec::new();
    for record_id in &dedup.record_ids {
      let Some(record) = self.store.get_record(record_id).await? else {
        warn!(dedup_id = %dedup.id, record_id = %record_id, "Dedup group member missing");
        continue;
      };
      if non_indexed.contains(&record.source_id) {
        continue;
      }
      let settings = self.config.source_settings(&record.source_id);
      if record.deleted || (delete && source_filter.is_some_and(|f| f.matches(&record.source_id))) {
        result.deletes.push(create_solr_id(&record.id, settings));
        continue;
      }
      match self.builder.build_document(&record, Some(&dedup)).await {
        Ok(BuildOutcome::Document { doc, .. }) => children.push(doc),
        Ok(BuildOutcome::Skip) => {}
        Err(e) => {
          error!(record_id = %record.id, err = %e, "Failed to build dedup group member");
        }
      }
    }

    match children.len() {
      0 => result.deletes.push(dedup.id.clone()),
      1 => {
        if !delete {
          warn!(dedup_id = %dedup.id, "Dedup group has only one indexable record");
        }
        result.updates.push(children.into_iter().next().expect("one child"));
        result.deletes.push(dedup.id.clone());
      }
      _ => {
        let mut merged = self.merge.merge_records(&children);
        let mut children = children;
        self.merge.copy_merged_data_to_children(&merged, &mut children);
        for mut child in children {
          child.insert("merged_child_boolean", "true");
          result.updates.push(child);
        }
        merged.insert("id", dedup.id.clone());
        merged.insert("record_format", "merged");
        merged.insert("merged_boolean", "true");
        result.updates.push(merged);
      }
    }
    Ok(())
  }

  async fn emit_dedup_result(
    &self,
    result: DedupResult,
    sink: &mut Option<UpdateSink>,
    compare: Option<&mut CompareWriter>,
  ) -> Result<(), IndexError> {
    if let Some(error) = result.error {
      error!(dedup_id = %result.dedup_id, err = %error, "Failed to process dedup group");
      return Ok(());
    }
    if let Some(compare) = compare {
      for doc in &result.updates {
        compare.compare(doc).await?;
      }
      return Ok(());
    }
    let Some(sink) = sink.as_mut() else { return Ok(()) };
    for doc in &result.updates {
      sink.push_document(doc).await?;
    }
    for id in &result.deletes {
      sink.push_delete(id).await?;
    }
    Ok(())
  }
}
