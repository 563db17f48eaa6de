//! External XSLT engine interface.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
  #[error("stylesheet '{stylesheet}' failed: {message}")]
  Failed { stylesheet: String, message: String },
  #[error("stylesheet '{0}' not found")]
  NotFound(String),
}

/// Applies a named stylesheet to a record payload.
///
/// Implementations wrap whatever XSLT engine the host provides. Stylesheets
/// producing whole Solr documents return a flat JSON object; normalization
/// and pre-transformation stylesheets return the transformed payload.
pub trait XsltTransformer: Send + Sync {
  fn transform(
    &self,
    stylesheet: &str,
    payload: &str,
    params: &HashMap<String, String>,
  ) -> Result<String, TransformError>;
}
