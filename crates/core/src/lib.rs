//! Shared types and configuration for the bibdex indexing pipeline.
//!
//! This crate holds everything the pipeline crates agree on:
//!
//! - [`Record`] and [`DedupGroup`]: the value objects read from the document store
//! - [`SolrDocument`]: the flat field map shipped to the search index
//! - [`Config`] / [`DataSourceSettings`]: TOML-backed configuration
//! - [`MetadataRecord`] + [`FormatRegistry`]: the seam to external record parsers
//! - [`XsltTransformer`] / [`Enricher`]: external collaborator interfaces

pub mod config;
pub mod document;
pub mod enrich;
pub mod filter;
pub mod metadata;
pub mod normalize;
pub mod record;
pub mod transform;

pub use config::{ComponentParts, Config, ConfigError, DataSourceSettings, InstitutionInBuilding, SolrConfig, SolrFieldNames};
pub use document::{SolrDocument, SolrValue, is_dropped_value, unique_preserving_order};
pub use enrich::{Enricher, EnricherRegistry};
pub use filter::SourceFilter;
pub use metadata::{FormatRegistry, JsonMetadataRecord, MetadataError, MetadataRecord, WorkIdentificationData, WorkTitle};
pub use normalize::{NormalizationForm, normalize_key};
pub use record::{DedupGroup, Record, create_solr_id};
pub use transform::{TransformError, XsltTransformer};
