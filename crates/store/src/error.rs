use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("connection error: {0}")]
  Connection(String),
  #[error("not found: {0}")]
  NotFound(String),
  #[error("queue collection '{name}' is {state}")]
  QueueState { name: String, state: &'static str },
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("query error: {0}")]
  Query(String),
}
