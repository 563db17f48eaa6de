use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolrError {
  #[error("transport error: {0}")]
  Transport(String),
  #[error("Solr returned {status}: {body}")]
  Status { status: u16, body: String },
  #[error("cluster unavailable: {0}")]
  ClusterDown(String),
  #[error("undecodable response: {0}")]
  Decode(String),
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("dump file error: {0}")]
  Io(#[from] std::io::Error),
}
