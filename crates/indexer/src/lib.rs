//! The bibdex indexing pipeline.
//!
//! Records from the document store flow through a record worker pool into
//! index-ready documents; dedup groups are fused into merged records; batched
//! update requests go to the search backend with at-least-once delivery.
//!
//! ```text
//! store ─▶ Coordinator ─▶ record workers ─▶ DocumentBuilder ──▶ UpdateBuffer ─▶ Solr workers ─▶ Solr
//!              └────────▶ merge workers ──▶ MergeEngine ────────────┘
//! ```
//!
//! [`Coordinator::update_records`] is the top-level entry point.

pub mod builder;
pub mod compare;
pub mod coordinator;
pub mod error;
pub mod mapping;
pub mod merge;
mod merged;
pub mod pool;
pub mod queue;
pub mod sink;
mod tools;

pub use builder::{BuildOutcome, DocumentBuilder};
pub use compare::CompareWriter;
pub use coordinator::{Coordinator, RunOutcome, UpdateParams};
pub use error::IndexError;
pub use mapping::{EnrichmentBridge, FieldMapper, MappingTable};
pub use merge::MergeEngine;
pub use pool::{PoolHandler, PoolInit, WorkerPool};
pub use queue::{QueueManager, QueueSelection};
pub use sink::UpdateSink;
