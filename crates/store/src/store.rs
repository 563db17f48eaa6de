//! The document store trait.

use async_trait::async_trait;
use bibdex_core::{DedupGroup, Record};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::Result;
use crate::filter::{DedupFilter, FindOptions, RecordFilter};

pub type RecordStream = BoxStream<'static, Result<Record>>;
pub type DedupStream = BoxStream<'static, Result<DedupGroup>>;

/// Lifecycle state of a queue collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
  /// Not yet finalized; never reused by other runs.
  Building,
  /// Complete and reusable while its time window still covers the request.
  Final,
}

/// Read access to records and dedup groups, plus the pipeline-owned state:
/// checkpoint entries and queue collections.
///
/// Every worker holds its own connection; [`RecordStore::reconnect`] is called
/// from worker initializers so connections are never shared across tasks that
/// outlive each other.
#[async_trait]
pub trait RecordStore: Send + Sync {
  async fn find_records(&self, filter: &RecordFilter, options: &FindOptions) -> Result<RecordStream>;
  async fn count_records(&self, filter: &RecordFilter) -> Result<u64>;
  async fn find_record(&self, filter: &RecordFilter) -> Result<Option<Record>>;
  async fn get_record(&self, id: &str) -> Result<Option<Record>>;

  async fn get_dedup(&self, id: &str) -> Result<Option<DedupGroup>>;
  async fn find_dedups(&self, filter: &DedupFilter) -> Result<DedupStream>;

  /// Change timestamp of the most recently updated record, across all sources.
  async fn latest_record_update(&self) -> Result<Option<DateTime<Utc>>>;

  async fn get_state(&self, key: &str) -> Result<Option<String>>;
  async fn save_state(&self, key: &str, value: &str) -> Result<()>;

  /// A `final` queue collection for this parameter hash whose window covers
  /// `[from, to]`, when one exists.
  async fn find_queue_collection(&self, hash: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Option<String>>;
  /// Create a fresh `building` collection named by the parameter hash.
  async fn create_queue_collection(&self, hash: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<String>;
  /// Add an id; returns whether the id was new to the collection.
  async fn add_id_to_queue(&self, name: &str, id: &str) -> Result<bool>;
  async fn queued_ids(&self, name: &str) -> Result<Vec<String>>;
  async fn queue_len(&self, name: &str) -> Result<usize>;
  async fn finalize_queue_collection(&self, name: &str) -> Result<()>;
  async fn drop_queue_collection(&self, name: &str) -> Result<()>;
  /// Drop non-building collections whose high-water is older than `high_water`.
  /// Returns the number dropped.
  async fn cleanup_queue_collections(&self, high_water: DateTime<Utc>) -> Result<usize>;

  /// Re-establish the connection; called from per-worker initializers and at
  /// the start of the merged sibling stream.
  async fn reconnect(&self) -> Result<()>;
}
