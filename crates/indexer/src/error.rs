use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
  #[error("store error: {0}")]
  Store(#[from] bibdex_store::StoreError),
  #[error("Solr error: {0}")]
  Solr(#[from] bibdex_solr::SolrError),
  #[error("metadata error: {0}")]
  Metadata(#[from] bibdex_core::MetadataError),
  #[error("transform error: {0}")]
  Transform(#[from] bibdex_core::TransformError),
  #[error("configuration error: {0}")]
  Config(String),
  #[error("worker pool '{0}' is closed")]
  PoolClosed(String),
  #[error("interrupted")]
  Interrupted,
  #[error("merged record stream failed: {0}")]
  MergedStream(String),
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}
