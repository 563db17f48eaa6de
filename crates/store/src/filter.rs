//! Record and dedup-group selection.

use bibdex_core::{Record, SourceFilter};
use chrono::{DateTime, Utc};

/// Record selection criteria. Unset members match everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
  pub id: Option<String>,
  pub source: Option<SourceFilter>,
  pub updated_since: Option<DateTime<Utc>>,
  /// `Some(true)` selects records belonging to a dedup group, `Some(false)`
  /// records outside any group.
  pub has_dedup_id: Option<bool>,
  pub deleted: Option<bool>,
  /// Select a host record carrying this linking id.
  pub linking_id: Option<String>,
  /// Select component parts whose host pointer is any of these linking ids.
  pub host_record_in: Vec<String>,
  /// Restrict to these source ids.
  pub source_in: Vec<String>,
}

impl RecordFilter {
  pub fn matches(&self, record: &Record) -> bool {
    if let Some(id) = &self.id
      && record.id != *id
    {
      return false;
    }
    if let Some(source) = &self.source
      && !source.matches(&record.source_id)
    {
      return false;
    }
    if let Some(since) = self.updated_since
      && record.updated < since
    {
      return false;
    }
    if let Some(has_dedup) = self.has_dedup_id
      && record.dedup_id.is_some() != has_dedup
    {
      return false;
    }
    if let Some(deleted) = self.deleted
      && record.deleted != deleted
    {
      return false;
    }
    if let Some(linking_id) = &self.linking_id
      && !record.linking_ids.iter().any(|l| l == linking_id)
    {
      return false;
    }
    if !self.host_record_in.is_empty()
      && !record.host_record_ids.iter().any(|h| self.host_record_in.contains(h))
    {
      return false;
    }
    if !self.source_in.is_empty() && !self.source_in.contains(&record.source_id) {
      return false;
    }
    true
  }
}

/// Cursor ordering for [`RecordFilter`] queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordSort {
  #[default]
  None,
  /// Dedup-id order, records without a dedup id excluded at query time.
  DedupId,
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
  pub sort: RecordSort,
  pub limit: Option<usize>,
}

/// Dedup group selection: explicit ids, a change window, or everything.
#[derive(Debug, Clone, Default)]
pub struct DedupFilter {
  pub ids: Vec<String>,
  pub changed_since: Option<DateTime<Utc>>,
}

impl DedupFilter {
  pub fn matches(&self, id: &str, updated: DateTime<Utc>) -> bool {
    if !self.ids.is_empty() && !self.ids.iter().any(|i| i == id) {
      return false;
    }
    if let Some(since) = self.changed_since
      && updated < since
    {
      return false;
    }
    true
  }

  pub fn is_unbounded(&self) -> bool {
    self.ids.is_empty() && self.changed_since.is_none()
  }
}
