//! HTTP transport behind a trait so tests can record traffic.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{trace, warn};

use crate::error::SolrError;

/// One HTTP round-trip to the search backend.
#[async_trait]
pub trait SolrTransport: Send + Sync {
  /// POST a JSON body; any HTTP status ≥ 300 is an error.
  async fn post_json(&self, url: &str, body: &str, timeout: Duration) -> Result<(), SolrError>;
  /// GET a JSON resource.
  async fn get_json(&self, url: &str, timeout: Duration) -> Result<serde_json::Value, SolrError>;
}

/// Keep-alive reqwest transport with optional basic auth.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  username: Option<String>,
  password: Option<String>,
}

impl HttpTransport {
  pub fn new(username: Option<String>, password: Option<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      username,
      password,
    }
  }

  fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.username {
      Some(username) => request.basic_auth(username, self.password.as_deref()),
      None => request,
    }
  }
}

#[async_trait]
impl SolrTransport for HttpTransport {
  async fn post_json(&self, url: &str, body: &str, timeout: Duration) -> Result<(), SolrError> {
    trace!(url, body_len = body.len(), "Sending update request");
    let request = self
      .client
      .post(url)
      .header("Content-Type", "application/json")
      .header("Connection", "keep-alive")
      .timeout(timeout)
      .body(body.to_string());

    let response = self
      .authorize(request)
      .send()
      .await
      .map_err(|e| SolrError::Transport(e.to_string()))?;

    let status = response.status();
    if status.as_u16() >= 300 {
      let body = response.text().await.unwrap_or_default();
      warn!(url, status = status.as_u16(), "Update request failed");
      return Err(SolrError::Status {
        status: status.as_u16(),
        body,
      });
    }
    Ok(())
  }

  async fn get_json(&self, url: &str, timeout: Duration) -> Result<serde_json::Value, SolrError> {
    trace!(url, "Sending read request");
    let request = self.client.get(url).timeout(timeout);
    let response = self
      .authorize(request)
      .send()
      .await
      .map_err(|e| SolrError::Transport(e.to_string()))?;

    let status = response.status();
    if status.as_u16() >= 300 {
      let body = response.text().await.unwrap_or_default();
      return Err(SolrError::Status {
        status: status.as_u16(),
        body,
      });
    }
    response.json().await.map_err(|e| SolrError::Decode(e.to_string()))
  }
}
