//! In-memory document store.
//!
//! Backs the test suite and small self-contained runs. Handles are cheap
//! clones sharing the same data, so "reconnecting" only counts the call.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bibdex_core::{DedupGroup, Record};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::debug;

use crate::filter::{DedupFilter, FindOptions, RecordFilter, RecordSort};
use crate::store::{DedupStream, QueueState, RecordStore, RecordStream};
use crate::{Result, StoreError};

#[derive(Debug)]
struct Queue {
  hash: String,
  from: DateTime<Utc>,
  to: DateTime<Utc>,
  state: QueueState,
  ids: Vec<String>,
  seen: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
  records: BTreeMap<String, Record>,
  dedups: BTreeMap<String, DedupGroup>,
  state: HashMap<String, String>,
  queues: HashMap<String, Queue>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  inner: Arc<RwLock<Inner>>,
  reconnects: Arc<AtomicUsize>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert_record(&self, record: Record) {
    self.inner.write().unwrap().records.insert(record.id.clone(), record);
  }

  pub fn insert_dedup(&self, group: DedupGroup) {
    self.inner.write().unwrap().dedups.insert(group.id.clone(), group);
  }

  pub fn record_count(&self) -> usize {
    self.inner.read().unwrap().records.len()
  }

  /// Number of `reconnect` calls; used to assert worker-init behavior.
  pub fn reconnect_count(&self) -> usize {
    self.reconnects.load(Ordering::SeqCst)
  }

  pub fn queue_state(&self, name: &str) -> Option<QueueState> {
    self.inner.read().unwrap().queues.get(name).map(|q| q.state)
  }

  pub fn queue_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.inner.read().unwrap().queues.keys().cloned().collect();
    names.sort();
    names
  }

  fn matching_records(&self, filter: &RecordFilter, options: &FindOptions) -> Vec<Record> {
    let inner = self.inner.read().unwrap();
    let mut matches: Vec<Record> = inner.records.values().filter(|r| filter.matches(r)).cloned().collect();
    match options.sort {
      RecordSort::None => {}
      RecordSort::DedupId => {
        matches.retain(|r| r.dedup_id.is_some());
        matches.sort_by(|a, b| a.dedup_id.cmp(&b.dedup_id).then_with(|| a.id.cmp(&b.id)));
      }
    }
    if let Some(limit) = options.limit {
      matches.truncate(limit);
    }
    matches
  }
}

fn queue_name(hash: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
  format!("queue_{hash}_{}_{}", from.timestamp(), to.timestamp())
}

#[async_trait]
impl RecordStore for MemoryStore {
  async fn find_records(&self, filter: &RecordFilter, options: &FindOptions) -> Result<RecordStream> {
    let matches = self.matching_records(filter, options);
    Ok(futures::stream::iter(matches.into_iter().map(Ok)).boxed())
  }

  async fn count_records(&self, filter: &RecordFilter) -> Result<u64> {
    Ok(self.matching_records(filter, &FindOptions::default()).len() as u64)
  }

  async fn find_record(&self, filter: &RecordFilter) -> Result<Option<Record>> {
    Ok(
      self
        .matching_records(filter, &FindOptions { sort: RecordSort::None, limit: Some(1) })
        .pop(),
    )
  }

  async fn get_record(&self, id: &str) -> Result<Option<Record>> {
    Ok(self.inner.read().unwrap().records.get(id).cloned())
  }

  async fn get_dedup(&self, id: &str) -> Result<Option<DedupGroup>> {
    Ok(self.inner.read().unwrap().dedups.get(id).cloned())
  }

  async fn find_dedups(&self, filter: &DedupFilter) -> Result<DedupStream> {
    let matches: Vec<DedupGroup> = {
      let inner = self.inner.read().unwrap();
      inner
        .dedups
        .values()
        .filter(|d| filter.matches(&d.id, d.updated))
        .cloned()
        .collect()
    };
    Ok(futures::stream::iter(matches.into_iter().map(Ok)).boxed())
  }

  async fn latest_record_update(&self) -> Result<Option<DateTime<Utc>>> {
    Ok(self.inner.read().unwrap().records.values().map(|r| r.updated).max())
  }

  async fn get_state(&self, key: &str) -> Result<Option<String>> {
    Ok(self.inner.read().unwrap().state.get(key).cloned())
  }

  async fn save_state(&self, key: &str, value: &str) -> Result<()> {
    self.inner.write().unwrap().state.insert(key.to_string(), value.to_string());
    Ok(())
  }

  async fn find_queue_collection(&self, hash: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Option<String>> {
    let inner = self.inner.read().unwrap();
    Ok(
      inner
        .queues
        .iter()
        .find(|(_, q)| q.state == QueueState::Final && q.hash == hash && q.from <= from && q.to >= to)
        .map(|(name, _)| name.clone()),
    )
  }

  async fn create_queue_collection(&self, hash: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<String> {
    let name = queue_name(hash, from, to);
    let mut inner = self.inner.write().unwrap();
    inner.queues.insert(
      name.clone(),
      Queue {
        hash: hash.to_string(),
        from,
        to,
        state: QueueState::Building,
        ids: Vec::new(),
        seen: HashSet::new(),
      },
    );
    debug!(queue = %name, "Created queue collection");
    Ok(name)
  }

  async fn add_id_to_queue(&self, name: &str, id: &str) -> Result<bool> {
    let mut inner = self.inner.write().unwrap();
    let queue = inner
      .queues
      .get_mut(name)
      .ok_or_else(|| StoreError::NotFound(format!("queue collection {name}")))?;
    if queue.state != QueueState::Building {
      return Err(StoreError::QueueState { name: name.to_string(), state: "final" });
    }
    if queue.seen.insert(id.to_string()) {
      queue.ids.push(id.to_string());
      Ok(true)
    } else {
      Ok(false)
    }
  }

  async fn queued_ids(&self, name: &str) -> Result<Vec<String>> {
    let inner = self.inner.read().unwrap();
    inner
      .queues
      .get(name)
      .map(|q| q.ids.clone())
      .ok_or_else(|| StoreError::NotFound(format!("queue collection {name}")))
  }

  async fn queue_len(&self, name: &str) -> Result<usize> {
    let inner = self.inner.read().unwrap();
    inner
      .queues
      .get(name)
      .map(|q| q.ids.len())
      .ok_or_else(|| StoreError::NotFound(format!("queue collection {name}")))
  }

  async fn finalize_queue_collection(&self, name: &str) -> Result<()> {
    let mut inner = self.inner.write().unwrap();
    let queue = inner
      .queues
      .get_mut(name)
      .ok_or_else(|| StoreError::NotFound(format!("queue collection {name}")))?;
    queue.state = QueueState::Final;
    Ok(())
  }

  async fn drop_queue_collection(&self, name: &str) -> Result<()> {
    self.inner.write().unwrap().queues.remove(name);
    debug!(queue = %name, "Dropped queue collection");
    Ok(())
  }

  async fn cleanup_queue_collections(&self, high_water: DateTime<Utc>) -> Result<usize> {
    let mut inner = self.inner.write().unwrap();
    let before = inner.queues.len();
    inner
      .queues
      .retain(|_, q| q.state == QueueState::Building || q.to >= high_water);
    Ok(before - inner.queues.len())
  }

  async fn reconnect(&self) -> Result<()> {
    self.reconnects.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bibdex_core::SourceFilter;
  use chrono::TimeZone;

  fn record(id: &str, source: &str, updated_hour: u32, dedup: Option<&str>) -> Record {
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, updated_hour, 0, 0).unwrap();
    Record {
      id: id.to_string(),
      source_id: source.to_string(),
      format: "json".to_string(),
      payload: "{}".to_string(),
      linking_ids: Vec::new(),
      host_record_ids: Vec::new(),
      deleted: false,
      created: ts,
      updated: ts,
      dedup_id: dedup.map(String::from),
    }
  }

  #[tokio::test]
  async fn test_find_records_filtering() {
    let store = MemoryStore::new();
    store.insert_record(record("a.1", "a", 1, None));
    store.insert_record(record("a.2", "a", 2, Some("D1")));
    store.insert_record(record("b.1", "b", 3, None));

    let filter = RecordFilter {
      source: Some(SourceFilter::parse("a").unwrap()),
      has_dedup_id: Some(false),
      ..Default::default()
    };
    let mut stream = store.find_records(&filter, &FindOptions::default()).await.unwrap();
    let mut ids = Vec::new();
    while let Some(r) = stream.next().await {
      ids.push(r.unwrap().id);
    }
    assert_eq!(ids, ["a.1"]);

    assert_eq!(store.count_records(&RecordFilter::default()).await.unwrap(), 3);
    let latest = store.latest_record_update().await.unwrap().unwrap();
    assert_eq!(latest, Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap());
  }

  #[tokio::test]
  async fn test_dedup_id_sort_excludes_ungrouped() {
    let store = MemoryStore::new();
    store.insert_record(record("a.1", "a", 1, Some("D2")));
    store.insert_record(record("a.2", "a", 1, Some("D1")));
    store.insert_record(record("a.3", "a", 1, None));

    let options = FindOptions { sort: RecordSort::DedupId, limit: None };
    let mut stream = store.find_records(&RecordFilter::default(), &options).await.unwrap();
    let mut dedups = Vec::new();
    while let Some(r) = stream.next().await {
      dedups.push(r.unwrap().dedup_id.unwrap());
    }
    assert_eq!(dedups, ["D1", "D2"]);
  }

  #[tokio::test]
  async fn test_queue_lifecycle() {
    let store = MemoryStore::new();
    let from = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

    let name = store.create_queue_collection("abc", from, to).await.unwrap();
    assert!(store.add_id_to_queue(&name, "D1").await.unwrap());
    assert!(!store.add_id_to_queue(&name, "D1").await.unwrap());
    assert!(store.add_id_to_queue(&name, "D2").await.unwrap());

    // building collections are never reused
    assert!(store.find_queue_collection("abc", from, to).await.unwrap().is_none());

    store.finalize_queue_collection(&name).await.unwrap();
    assert_eq!(store.find_queue_collection("abc", from, to).await.unwrap(), Some(name.clone()));
    // a narrower window is covered, a wider one is not
    assert!(
      store
        .find_queue_collection("abc", from, to - chrono::Duration::hours(1))
        .await
        .unwrap()
        .is_some()
    );
    assert!(
      store
        .find_queue_collection("abc", from, to + chrono::Duration::hours(1))
        .await
        .unwrap()
        .is_none()
    );

    assert_eq!(store.queued_ids(&name).await.unwrap(), ["D1", "D2"]);

    // adding to a finalized collection fails
    assert!(store.add_id_to_queue(&name, "D3").await.is_err());

    // cleanup drops it once the high-water moves past
    let dropped = store
      .cleanup_queue_collections(to + chrono::Duration::hours(1))
      .await
      .unwrap();
    assert_eq!(dropped, 1);
    assert!(store.queue_names().is_empty());
  }

  #[tokio::test]
  async fn test_cleanup_spares_building() {
    let store = MemoryStore::new();
    let from = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
    let name = store.create_queue_collection("abc", from, to).await.unwrap();

    let dropped = store
      .cleanup_queue_collections(to + chrono::Duration::hours(1))
      .await
      .unwrap();
    assert_eq!(dropped, 0);
    assert_eq!(store.queue_state(&name), Some(QueueState::Building));
  }

  #[tokio::test]
  async fn test_state_round_trip() {
    let store = MemoryStore::new();
    assert!(store.get_state("Last Index Update").await.unwrap().is_none());
    store.save_state("Last Index Update", "2024-03-01T00:00:00Z").await.unwrap();
    assert_eq!(
      store.get_state("Last Index Update").await.unwrap().as_deref(),
      Some("2024-03-01T00:00:00Z")
    );
  }
}
