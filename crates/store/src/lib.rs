//! Document store abstraction.
//!
//! The indexing pipeline reads records and dedup groups through the
//! [`RecordStore`] trait and never talks to a concrete database. The trait
//! also covers the small amount of writable state the pipeline owns:
//! checkpoint entries and queue collections.
//!
//! [`MemoryStore`] is the bundled implementation, used by the test suite and
//! for small self-contained runs.

mod error;
mod filter;
mod memory;
mod store;

pub use error::StoreError;
pub use filter::{DedupFilter, FindOptions, RecordFilter, RecordSort};
pub use memory::MemoryStore;
pub use store::{DedupStream, QueueState, RecordStore, RecordStream};

pub type Result<T> = std::result::Result<T, StoreError>;
