//! JSON batch accumulation for updates and deletions.

use bibdex_core::SolrDocument;
use tracing::trace;

use crate::error::SolrError;

/// Delete directives are tiny; they batch by count alone.
const DELETE_BATCH_SIZE: usize = 1000;

/// Accumulates serialized documents and delete directives until a batch
/// trigger fires: document count reaching `max_records` or byte length
/// exceeding `max_size_kib`, deletions at a fixed 1000 ids.
///
/// The buffer is owned by the coordinating task; triggered batches come back
/// as ready-to-send JSON bodies for the Solr worker pool (or the dump file).
#[derive(Debug)]
pub struct UpdateBuffer {
  docs: Vec<String>,
  bytes: usize,
  deletions: Vec<String>,
  max_records: usize,
  max_bytes: usize,
}

impl UpdateBuffer {
  pub fn new(max_records: usize, max_size_kib: usize) -> Self {
    Self {
      docs: Vec::new(),
      bytes: 0,
      deletions: Vec::new(),
      max_records: max_records.max(1),
      max_bytes: max_size_kib * 1024,
    }
  }

  /// Buffer a document; returns an update body when the batch trigger fires.
  pub fn append(&mut self, doc: &SolrDocument) -> Result<Option<String>, SolrError> {
    let serialized = serde_json::to_string(doc)?;
    self.bytes += serialized.len() + 1;
    self.docs.push(serialized);
    if self.docs.len() >= self.max_records || self.bytes > self.max_bytes {
      trace!(docs = self.docs.len(), bytes = self.bytes, "Update batch trigger");
      return Ok(Some(self.take_update_body()));
    }
    Ok(None)
  }

  /// Buffer a delete directive; returns a delete body at the batch size.
  pub fn delete(&mut self, id: &str) -> Option<String> {
    self.deletions.push(id.to_string());
    if self.deletions.len() >= DELETE_BATCH_SIZE {
      trace!(deletions = self.deletions.len(), "Delete batch trigger");
      return Some(self.take_delete_body());
    }
    None
  }

  /// Drain everything pending, update body first.
  pub fn flush(&mut self) -> Vec<String> {
    let mut bodies = Vec::new();
    if !self.docs.is_empty() {
      bodies.push(self.take_update_body());
    }
    if !self.deletions.is_empty() {
      bodies.push(self.take_delete_body());
    }
    bodies
  }

  pub fn pending_docs(&self) -> usize {
    self.docs.len()
  }

  pub fn pending_deletions(&self) -> usize {
    self.deletions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.docs.is_empty() && self.deletions.is_empty()
  }

  fn take_update_body(&mut self) -> String {
    let docs = std::mem::take(&mut self.docs);
    self.bytes = 0;
    format!("[{}]", docs.join(","))
  }

  fn take_delete_body(&mut self) -> String {
    let deletions = std::mem::take(&mut self.deletions);
    let members: Vec<String> = deletions
      .iter()
      .map(|id| format!(r#""delete":{{"id":{}}}"#, serde_json::Value::String(id.clone())))
      .collect();
    format!("{{{}}}", members.join(","))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn doc(id: &str) -> SolrDocument {
    let mut doc = SolrDocument::new();
    doc.insert("id", id);
    doc
  }

  #[test]
  fn test_count_trigger() {
    let mut buffer = UpdateBuffer::new(3, 10_000);
    assert!(buffer.append(&doc("a.1")).unwrap().is_none());
    assert!(buffer.append(&doc("a.2")).unwrap().is_none());
    let body = buffer.append(&doc("a.3")).unwrap().expect("third doc fires the batch");
    assert_eq!(body, r#"[{"id":"a.1"},{"id":"a.2"},{"id":"a.3"}]"#);
    assert!(buffer.is_empty());
  }

  #[test]
  fn test_size_trigger() {
    // 1 KiB limit; ~600-byte docs fire on the second append
    let mut buffer = UpdateBuffer::new(1000, 1);
    let mut big = SolrDocument::new();
    big.insert("id", "a.1");
    big.insert("fullrecord", "x".repeat(600));
    assert!(buffer.append(&big).unwrap().is_none());
    assert!(buffer.append(&big).unwrap().is_some());
    assert_eq!(buffer.pending_docs(), 0);
  }

  #[test]
  fn test_delete_batching() {
    let mut buffer = UpdateBuffer::new(1000, 10_000);
    for i in 0..999 {
      assert!(buffer.delete(&format!("a.{i}")).is_none());
    }
    let body = buffer.delete("a.999").expect("thousandth id fires the batch");
    assert!(body.starts_with(r#"{"delete":{"id":"a.0"}"#));
    assert!(body.ends_with(r#""delete":{"id":"a.999"}}"#));
    assert_eq!(buffer.pending_deletions(), 0);
  }

  #[test]
  fn test_flush_emits_updates_then_deletes() {
    let mut buffer = UpdateBuffer::new(1000, 10_000);
    buffer.append(&doc("a.1")).unwrap();
    buffer.delete("a.2");
    let bodies = buffer.flush();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0], r#"[{"id":"a.1"}]"#);
    assert_eq!(bodies[1], r#"{"delete":{"id":"a.2"}}"#);
    assert!(buffer.is_empty());
    assert!(buffer.flush().is_empty());
  }

  #[test]
  fn test_delete_id_escaping() {
    let mut buffer = UpdateBuffer::new(1000, 10_000);
    buffer.delete(r#"weird"id"#);
    let bodies = buffer.flush();
    assert_eq!(bodies[0], r#"{"delete":{"id":"weird\"id"}}"#);
  }
}
