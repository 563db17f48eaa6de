//! The top-level indexing loop.
//!
//! `update_records` discovers changed records since the checkpoint and drives
//! two streams against the index: the single-record stream here and the
//! merged dedup-group stream in [`crate::merged`]. The merged stream runs
//! either sequentially before the single stream or as a sibling task,
//! matching the configured concurrency layout.

use std::sync::Arc;

use bibdex_core::{Config, Record, SourceFilter, create_solr_id};
use bibdex_solr::{SolrClient, SolrTransport};
use bibdex_store::{FindOptions, RecordFilter, RecordStore};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::{BuildOutcome, DocumentBuilder};
use crate::compare::CompareWriter;
use crate::error::IndexError;
use crate::merge::MergeEngine;
use crate::merged::{MergedOutcome, MergedParams};
use crate::pool::{PoolHandler, PoolInit, WorkerPool};
use crate::sink::UpdateSink;

/// Progress is reported at this cadence.
const PROGRESS_INTERVAL: u64 = 1000;

const RECORD_QUEUE_SIZE: usize = 256;

/// Inputs to one `update_records` run.
#[derive(Debug, Clone, Default)]
pub struct UpdateParams {
  /// Explicit lower bound; falls back to the stored checkpoint.
  pub from: Option<DateTime<Utc>>,
  /// Raw `--source` specification.
  pub source: Option<String>,
  pub single: Option<String>,
  pub no_commit: bool,
  /// Delete the selected sources from the index instead of updating.
  pub delete: bool,
  /// Diff against the live index instead of updating; path or `-`.
  pub compare: Option<String>,
  /// Write batches to `<prefix>-<N>.json` instead of posting them.
  pub dump_prefix: Option<String>,
  /// Keep a separate checkpoint for this update URL.
  pub date_per_server: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  Completed { updated: bool },
  /// Cancelled mid-run; committed work stands, the checkpoint does not move.
  Interrupted,
}

/// A record worker's answer, errors tagged rather than thrown.
pub(crate) struct RecordResult {
  pub record_id: String,
  pub outcome: Result<BuildOutcome, String>,
}

#[derive(Clone)]
pub struct Coordinator {
  pub(crate) config: Arc<Config>,
  pub(crate) store: Arc<dyn RecordStore>,
  pub(crate) builder: DocumentBuilder,
  pub(crate) merge: MergeEngine,
  pub(crate) client: Arc<SolrClient>,
  pub(crate) transport: Arc<dyn SolrTransport>,
  pub(crate) cancel: CancellationToken,
}

impl Coordinator {
  pub fn new(
    config: Arc<Config>,
    store: Arc<dyn RecordStore>,
    builder: DocumentBuilder,
    client: Arc<SolrClient>,
    transport: Arc<dyn SolrTransport>,
    cancel: CancellationToken,
  ) -> Self {
    let merge = MergeEngine::new(config.clone());
    Self {
      config,
      store,
      builder,
      merge,
      client,
      transport,
      cancel,
    }
  }

  /// Update the index with everything changed since the checkpoint (or the
  /// given bounds). See [`UpdateParams`] for the modes.
  pub async fn update_records(&self, params: UpdateParams) -> Result<RunOutcome, IndexError> {
    let source_filter = params
      .source
      .as_deref()
      .map(SourceFilter::parse)
      .transpose()
      .map_err(|e| IndexError::Config(e.to_string()))?;

    let checkpoint_key = self.checkpoint_key(&params);
    let stored_from = match self.store.get_state(&checkpoint_key).await? {
      Some(value) => Some(parse_timestamp(&value)?),
      None => None,
    };
    let from = params.from.or(stored_from);
    // only a full-scope run may advance the checkpoint
    let full_scope = params.from.is_none() && params.source.is_none() && params.single.is_none();
    let last_indexing_date = full_scope.then(Utc::now);

    match from {
      Some(from) => info!(from = %from, "Updating records"),
      None => info!("Updating all records from the beginning"),
    }

    if params.delete {
      return self.delete_source_run(&params, source_filter.as_ref(), from).await;
    }

    let dedup_eligible = self.dedup_eligible(source_filter.as_ref());
    let compare_mode = params.compare.is_some();
    let mut compare = match &params.compare {
      Some(destination) => Some(CompareWriter::new(
        self.transport.clone(),
        self.config.solr.search_url.clone(),
        self.config.solr.ignore_in_comparison.clone(),
        destination,
      )?),
      None => None,
    };

    let threaded = self.config.solr.threaded_merged_record_update && !compare_mode;
    let merged_params = MergedParams {
      source_spec: params.source.clone(),
      source_filter: source_filter.clone(),
      single: params.single.clone(),
      from,
      delete: false,
      dump_prefix: params.dump_prefix.clone(),
      no_commit: params.no_commit,
    };

    let mut merged_handle: Option<JoinHandle<Result<MergedOutcome, IndexError>>> = None;
    let mut merged_outcome = MergedOutcome::NoUpdates;
    if dedup_eligible {
      if threaded {
        let sibling = self.clone();
        merged_handle = Some(tokio::spawn(async move { sibling.process_merged(merged_params, None).await }));
      } else {
        merged_outcome = self.process_merged(merged_params, compare.as_mut()).await?;
        if merged_outcome == MergedOutcome::Interrupted {
          return Ok(RunOutcome::Interrupted);
        }
      }
    } else {
      debug!("No dedup-enabled sources selected, skipping merged stream");
    }

    let mut sibling_outcome: Option<MergedOutcome> = None;
    let single_result = self
      .process_single(
        &params,
        source_filter.as_ref(),
        from,
        compare.as_mut(),
        &mut merged_handle,
        &mut sibling_outcome,
      )
      .await;

    // the sibling finishes before any final commit
    if let Some(handle) = merged_handle.take() {
      if single_result.is_err() {
        self.cancel.cancel();
      }
      match handle.await {
        Ok(Ok(outcome)) => sibling_outcome = Some(outcome),
        Ok(Err(e)) => {
          single_result?;
          return Err(e);
        }
        Err(e) => {
          single_result?;
          return Err(IndexError::MergedStream(e.to_string()));
        }
      }
    }
    if let Some(outcome) = sibling_outcome {
      merged_outcome = outcome;
    }
    let (single_updated, single_interrupted) = single_result?;

    let updated = single_updated || merged_outcome == MergedOutcome::Updated;
    if updated && !params.no_commit && !compare_mode && params.dump_prefix.is_none() {
      self.client.commit().await.map_err(IndexError::Solr)?;
    }

    if single_interrupted || merged_outcome == MergedOutcome::Interrupted {
      info!("Indexing interrupted");
      return Ok(RunOutcome::Interrupted);
    }

    if let Some(ts) = last_indexing_date
      && !compare_mode
      && params.dump_prefix.is_none()
    {
      let value = ts.to_rfc3339_opts(SecondsFormat::Secs, true);
      self.store.save_state(&checkpoint_key, &value).await?;
      debug!(key = %checkpoint_key, value = %value, "Checkpoint advanced");
    }

    info!(updated, "Indexing complete");
    Ok(RunOutcome::Completed { updated })
  }

  /// The cancellation handle observed by every stream and pool.
  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  fn checkpoint_key(&self, params: &UpdateParams) -> String {
    if self.config.solr.track_updates_per_update_url || params.date_per_server {
      format!("Last Index Update {}", self.config.solr.update_url)
    } else {
      "Last Index Update".to_string()
    }
  }

  /// The merged stream runs unless a source filter selects no dedup sources.
  fn dedup_eligible(&self, source_filter: Option<&SourceFilter>) -> bool {
    match source_filter {
      None => true,
      Some(filter) => self
        .config
        .sources
        .iter()
        .any(|(id, settings)| settings.dedup && filter.matches(id)),
    }
  }

  /// The single-record stream: records outside any dedup group.
  async fn process_single(
    &self,
    params: &UpdateParams,
    source_filter: Option<&SourceFilter>,
    from: Option<DateTime<Utc>>,
    mut compare: Option<&mut CompareWriter>,
    merged_handle: &mut Option<JoinHandle<Result<MergedOutcome, IndexError>>>,
    sibling_outcome: &mut Option<MergedOutcome>,
  ) -> Result<(bool, bool), IndexError> {
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

    let filter = match &params.single {
      Some(single) => RecordFilter {
        id: Some(single.clone()),
        has_dedup_id: Some(false),
        ..Default::default()
      },
      None => RecordFilter {
        updated_since: from,
        source: source_filter.cloned(),
        has_dedup_id: Some(false),
        ..Default::default()
      },
    };

    let mut pool = self.record_pool();
    let mut stream = self.store.find_records(&filter, &FindOptions::default()).await?;
    let mut count = 0u64;
    let mut interrupted = false;

    while let Some(record) = stream.next().await {
      if self.cancel.is_cancelled() {
        interrupted = true;
        break;
      }
      let record = record?;

      if record.deleted {
        let settings = self.config.source_settings(&record.source_id);
        let id = create_solr_id(&record.id, settings);
        if let Some(sink) = sink.as_mut() {
          sink.push_delete(&id).await?;
        }
        count += 1;
        self.after_record(count, &mut sink).await?;
        continue;
      }

      pool.add_request(record).await?;
      while let Some(result) = pool.try_result() {
        count += 1;
        self.handle_record_result(result, &mut sink, compare.as_deref_mut()).await?;
        self.after_record(count, &mut sink).await?;
      }
      self.poll_sibling(merged_handle, sibling_outcome).await?;
    }

    if !interrupted {
      while let Some(result) = pool.next_result().await {
        count += 1;
        self.handle_record_result(result, &mut sink, compare.as_deref_mut()).await?;
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
    info!(count, "Single-record stream done");
    Ok((updated, interrupted))
  }

  fn record_pool(&self) -> WorkerPool<Record, RecordResult> {
    let builder = self.builder.clone();
    let handler: PoolHandler<Record, RecordResult> = Arc::new(move |record: Record| {
      let builder = builder.clone();
      Box::pin(async move {
        let record_id = record.id.clone();
        let outcome = builder
          .build_document(&record, None)
          .await
          .map_err(|e| e.to_string());
        RecordResult { record_id, outcome }
      })
    });
    let store = self.store.clone();
    let init: PoolInit = Arc::new(move |worker_id| {
      let store = store.clone();
      Box::pin(async move {
        if let Err(e) = store.reconnect().await {
          warn!(worker_id, err = %e, "Record worker reconnect failed");
        }
      })
    });
    WorkerPool::new(
      "record",
      self.config.solr.record_workers,
      RECORD_QUEUE_SIZE,
      handler,
      Some(init),
      self.cancel.child_token(),
    )
  }

  async fn handle_record_result(
    &self,
    result: RecordResult,
    sink: &mut Option<UpdateSink>,
    compare: Option<&mut CompareWriter>,
  ) -> Result<(), IndexError> {
    match result.outcome {
      Ok(BuildOutcome::Document { doc, .. }) => {
        if let Some(compare) = compare {
          compare.compare(&doc).await?;
        } else if let Some(sink) = sink.as_mut() {
          sink.push_document(&doc).await?;
        }
      }
      Ok(BuildOutcome::Skip) => {}
      Err(message) => {
        // data defect; the record is skipped, the run continues
        error!(id = %result.record_id, err = %message, "Failed to build document");
      }
    }
    Ok(())
  }

  pub(crate) async fn after_record(&self, count: u64, sink: &mut Option<UpdateSink>) -> Result<(), IndexError> {
    if count.is_multiple_of(PROGRESS_INTERVAL) {
      info!(count, "Records processed");
    }
    if count > 0
      && count.is_multiple_of(self.config.solr.max_commit_interval as u64)
      && let Some(sink) = sink.as_mut()
    {
      sink.interval_commit().await?;
    }
    Ok(())
  }

  /// Non-blocking check on the sibling stream; a failed sibling is fatal.
  async fn poll_sibling(
    &self,
    merged_handle: &mut Option<JoinHandle<Result<MergedOutcome, IndexError>>>,
    sibling_outcome: &mut Option<MergedOutcome>,
  ) -> Result<(), IndexError> {
    let finished = merged_handle.as_ref().is_some_and(|h| h.is_finished());
    if !finished {
      return Ok(());
    }
    let handle = merged_handle.take().expect("checked above");
    match handle.await {
      Ok(Ok(outcome)) => {
        debug!(?outcome, "Merged stream finished early");
        *sibling_outcome = Some(outcome);
        Ok(())
      }
      Ok(Err(e)) => Err(e),
      Err(e) => Err(IndexError::MergedStream(e.to_string())),
    }
  }

  /// Delete-source mode: fix up affected dedup groups, then delete by query.
  async fn delete_source_run(
    &self,
    params: &UpdateParams,
    source_filter: Option<&SourceFilter>,
    from: Option<DateTime<Utc>>,
  ) -> Result<RunOutcome, IndexError> {
    let Some(filter) = source_filter else {
      return Err(IndexError::Config("--delete requires --source".to_string()));
    };

    if self.dedup_eligible(Some(filter)) {
      let merged_params = MergedParams {
        source_spec: params.source.clone(),
        source_filter: Some(filter.clone()),
        single: None,
        from,
        delete: true,
        dump_prefix: None,
        no_commit: params.no_commit,
      };
      if self.process_merged(merged_params, None).await? == MergedOutcome::Interrupted {
        return Ok(RunOutcome::Interrupted);
      }
    }

    for source in filter.included() {
      self.client.delete_source(source).await.map_err(IndexError::Solr)?;
    }
    if !params.no_commit {
      self.client.commit().await.map_err(IndexError::Solr)?;
    }
    Ok(RunOutcome::Completed { updated: true })
  }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, IndexError> {
  DateTime::parse_from_rfc3339(value)
    .map(|ts| ts.with_timezone(&Utc))
    .map_err(|e| IndexError::Config(format!("bad stored timestamp '{value}': {e}")))
}
