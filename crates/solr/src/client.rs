//! The retrying Solr update client.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cluster::ClusterMonitor;
use crate::error::SolrError;
use crate::transport::SolrTransport;

/// Commits walk the whole index; they get a long leash.
pub const COMMIT_TIMEOUT: Duration = Duration::from_secs(3600);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Sends update bodies to `update_url`, gated on cluster health and retried
/// with a fixed wait. The last attempt propagates the error.
pub struct SolrClient {
  transport: Arc<dyn SolrTransport>,
  update_url: String,
  max_tries: u32,
  retry_wait: Duration,
  cluster: Arc<ClusterMonitor>,
}

impl SolrClient {
  pub fn new(
    transport: Arc<dyn SolrTransport>,
    update_url: impl Into<String>,
    max_tries: u32,
    retry_wait_secs: u64,
    cluster: Arc<ClusterMonitor>,
  ) -> Self {
    Self {
      transport,
      update_url: update_url.into(),
      max_tries: max_tries.max(1),
      retry_wait: Duration::from_secs(retry_wait_secs),
      cluster,
    }
  }

  pub fn update_url(&self) -> &str {
    &self.update_url
  }

  /// POST an update body with the default timeout.
  pub async fn request(&self, body: &str) -> Result<(), SolrError> {
    self.request_with_timeout(body, DEFAULT_TIMEOUT).await
  }

  /// POST an update body. Blocks on the cluster gate before the first send
  /// and before each retry; transport errors and HTTP ≥ 300 retry after the
  /// configured wait.
  pub async fn request_with_timeout(&self, body: &str, timeout: Duration) -> Result<(), SolrError> {
    for attempt in 1..=self.max_tries {
      self.cluster.wait_until_ok(self.max_tries).await?;

      match self.transport.post_json(&self.update_url, body, timeout).await {
        Ok(()) => {
          if attempt > 1 {
            info!(attempt, "Update request succeeded after retry");
          }
          return Ok(());
        }
        Err(e) if attempt < self.max_tries => {
          warn!(
            attempt,
            max_tries = self.max_tries,
            wait_secs = self.retry_wait.as_secs(),
            err = %e,
            "Update request failed, retrying"
          );
          tokio::time::sleep(self.retry_wait).await;
        }
        Err(e) => {
          warn!(attempt, err = %e, "Update request failed, giving up");
          return Err(e);
        }
      }
    }
    unreachable!("retry loop always returns")
  }

  /// Issue an explicit commit. Callers drain outstanding batches first.
  pub async fn commit(&self) -> Result<(), SolrError> {
    debug!("Committing");
    self.request_with_timeout(r#"{"commit":{}}"#, COMMIT_TIMEOUT).await
  }

  /// Delete every document of a source by id wildcard.
  pub async fn delete_source(&self, source_id: &str) -> Result<(), SolrError> {
    let body = format!(r#"{{"delete":{{"query":"id:{source_id}.*"}}}}"#);
    info!(source = source_id, "Deleting source from index");
    self.request_with_timeout(&body, COMMIT_TIMEOUT).await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;
  use std::time::Duration;

  use async_trait::async_trait;

  use super::*;

  /// Transport failing the first `fail_count` posts, recording bodies.
  struct FlakyTransport {
    fail_count: Mutex<u32>,
    bodies: Mutex<Vec<String>>,
  }

  impl FlakyTransport {
    fn failing(fail_count: u32) -> Arc<Self> {
      Arc::new(Self {
        fail_count: Mutex::new(fail_count),
        bodies: Mutex::new(Vec::new()),
      })
    }

    fn attempts(&self) -> usize {
      self.bodies.lock().unwrap().len()
    }
  }

  #[async_trait]
  impl SolrTransport for FlakyTransport {
    async fn post_json(&self, _url: &str, body: &str, _timeout: Duration) -> Result<(), SolrError> {
      self.bodies.lock().unwrap().push(body.to_string());
      let mut remaining = self.fail_count.lock().unwrap();
      if *remaining > 0 {
        *remaining -= 1;
        return Err(SolrError::Status {
          status: 500,
          body: "Internal Server Error".into(),
        });
      }
      Ok(())
    }

    async fn get_json(&self, _url: &str, _timeout: Duration) -> Result<serde_json::Value, SolrError> {
      Err(SolrError::Transport("not used".into()))
    }
  }

  fn client(transport: Arc<FlakyTransport>, max_tries: u32, retry_wait: u64) -> SolrClient {
    let cluster = Arc::new(ClusterMonitor::disabled(transport.clone()));
    SolrClient::new(transport, "http://solr:8983/solr/biblio/update", max_tries, retry_wait, cluster)
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_until_success() {
    let transport = FlakyTransport::failing(2);
    let client = client(transport.clone(), 5, 60);

    let started = tokio::time::Instant::now();
    client.request("[]").await.unwrap();

    assert_eq!(transport.attempts(), 3);
    // exactly two waits of 60 s
    assert_eq!(started.elapsed(), Duration::from_secs(120));
  }

  #[tokio::test(start_paused = true)]
  async fn test_last_attempt_propagates() {
    let transport = FlakyTransport::failing(10);
    let client = client(transport.clone(), 3, 1);

    let result = client.request("[]").await;
    assert!(matches!(result, Err(SolrError::Status { status: 500, .. })));
    assert_eq!(transport.attempts(), 3);
  }

  /// Probes degraded once, then active; records event order.
  struct GatedTransport {
    events: Mutex<Vec<&'static str>>,
    probes: Mutex<u32>,
  }

  #[async_trait]
  impl SolrTransport for GatedTransport {
    async fn post_json(&self, _url: &str, _body: &str, _timeout: Duration) -> Result<(), SolrError> {
      self.events.lock().unwrap().push("post");
      Ok(())
    }

    async fn get_json(&self, _url: &str, _timeout: Duration) -> Result<serde_json::Value, SolrError> {
      let mut probes = self.probes.lock().unwrap();
      let state = if *probes == 0 { "recovering" } else { "active" };
      *probes += 1;
      self.events.lock().unwrap().push("probe");
      let data = serde_json::json!({
        "collection1": { "shards": { "shard1": { "state": state, "replicas": {} } } }
      })
      .to_string();
      Ok(serde_json::json!({ "znode": { "data": data } }))
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_no_update_leaves_while_degraded() {
    let transport = Arc::new(GatedTransport {
      events: Mutex::new(Vec::new()),
      probes: Mutex::new(0),
    });
    let cluster = Arc::new(ClusterMonitor::new(
      transport.clone(),
      Some("http://solr:8983/solr/admin".to_string()),
      5,
    ));
    let client = SolrClient::new(transport.clone(), "http://solr:8983/solr/biblio/update", 3, 1, cluster);

    client.request("[]").await.unwrap();
    let events = transport.events.lock().unwrap().clone();
    assert_eq!(events, ["probe", "probe", "post"]);
  }

  #[tokio::test]
  async fn test_commit_body() {
    let transport = FlakyTransport::failing(0);
    let client = client(transport.clone(), 3, 1);
    client.commit().await.unwrap();
    assert_eq!(transport.bodies.lock().unwrap()[0], r#"{"commit":{}}"#);
  }

  #[tokio::test]
  async fn test_delete_source_body() {
    let transport = FlakyTransport::failing(0);
    let client = client(transport.clone(), 3, 1);
    client.delete_source("src1").await.unwrap();
    assert_eq!(
      transport.bodies.lock().unwrap()[0],
      r#"{"delete":{"query":"id:src1.*"}}"#
    );
  }
}
