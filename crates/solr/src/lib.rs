//! Solr update machinery: the batching buffer, the retrying HTTP client, and
//! the SolrCloud cluster-state gate.
//!
//! The wire format is plain Solr JSON: update bodies are `[doc, doc, …]`,
//! delete bodies repeat `"delete":{"id":…}` members, commits are
//! `{"commit":{}}`. Transport is abstracted behind [`SolrTransport`] so tests
//! can record traffic without a server.

mod buffer;
mod client;
mod cluster;
mod dump;
mod error;
mod transport;

pub use buffer::UpdateBuffer;
pub use client::{COMMIT_TIMEOUT, SolrClient};
pub use cluster::{ClusterMonitor, ClusterState};
pub use dump::DumpWriter;
pub use error::SolrError;
pub use transport::{HttpTransport, SolrTransport};
