//! SolrCloud cluster-state gate.
//!
//! Update traffic holds while the cluster is degraded: a recovering shard
//! would drop or delay updates, so observers block until every shard and
//! replica is back to normal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SolrError;
use crate::transport::SolrTransport;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Shard states that need no intervention.
const NORMAL_SHARD_STATES: [&str; 3] = ["active", "inactive", "construction"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
  Ok,
  /// A shard or replica deviates from the normal states.
  Degraded,
  /// The probe itself failed.
  Error,
}

/// Periodic cluster-state probe with caching.
///
/// With no admin URL or a non-positive check interval the gate is disabled
/// and always reports [`ClusterState::Ok`].
pub struct ClusterMonitor {
  transport: Arc<dyn SolrTransport>,
  admin_url: Option<String>,
  interval: Duration,
  enabled: bool,
  cached: Mutex<Option<(Instant, ClusterState)>>,
}

impl ClusterMonitor {
  pub fn new(transport: Arc<dyn SolrTransport>, admin_url: Option<String>, check_interval_secs: i64) -> Self {
    let enabled = admin_url.is_some() && check_interval_secs > 0;
    Self {
      transport,
      admin_url,
      interval: Duration::from_secs(check_interval_secs.max(1) as u64),
      enabled,
      cached: Mutex::new(None),
    }
  }

  /// Disabled monitor that always reports `Ok`.
  pub fn disabled(transport: Arc<dyn SolrTransport>) -> Self {
    Self::new(transport, None, 0)
  }

  /// Current classification, cached for at least the check interval.
  pub async fn state(&self) -> ClusterState {
    if !self.enabled {
      return ClusterState::Ok;
    }
    let mut cached = self.cached.lock().await;
    if let Some((at, state)) = *cached
      && at.elapsed() < self.interval
    {
      return state;
    }
    let state = self.probe().await;
    *cached = Some((Instant::now(), state));
    state
  }

  /// Block until the cluster reports `Ok`. Degraded states retry on the
  /// check interval indefinitely; `max_tries` consecutive probe errors give
  /// up.
  pub async fn wait_until_ok(&self, max_tries: u32) -> Result<(), SolrError> {
    let mut consecutive_errors = 0u32;
    loop {
      match self.state().await {
        ClusterState::Ok => return Ok(()),
        ClusterState::Degraded => {
          consecutive_errors = 0;
          info!(wait_secs = self.interval.as_secs(), "Cluster degraded, waiting");
        }
        ClusterState::Error => {
          consecutive_errors += 1;
          warn!(
            consecutive_errors,
            max_tries, "Cluster state probe failed"
          );
          if consecutive_errors >= max_tries {
            return Err(SolrError::ClusterDown(format!(
              "cluster state probe failed {consecutive_errors} times"
            )));
          }
        }
      }
      tokio::time::sleep(self.interval).await;
    }
  }

  async fn probe(&self) -> ClusterState {
    let Some(admin_url) = &self.admin_url else {
      return ClusterState::Ok;
    };
    let url = format!("{admin_url}/zookeeper?wt=json&detail=true&path=%2Fclusterstate.json&view=graph");
    let response = match self.transport.get_json(&url, PROBE_TIMEOUT).await {
      Ok(response) => response,
      Err(e) => {
        warn!(err = %e, "Cluster state request failed");
        return ClusterState::Error;
      }
    };
    match classify(&response) {
      Some(state) => state,
      None => {
        warn!("Cluster state response missing znode data");
        ClusterState::Error
      }
    }
  }
}

/// Classify a ZooKeeper graph response. `None` when the payload is not the
/// expected shape.
fn classify(response: &serde_json::Value) -> Option<ClusterState> {
  let data = response.get("znode")?.get("data")?.as_str()?;
  let collections: serde_json::Value = serde_json::from_str(data).ok()?;
  let collections = collections.as_object()?;

  for (collection, value) in collections {
    let Some(shards) = value.get("shards").and_then(|s| s.as_object()) else {
      continue;
    };
    for (shard, shard_value) in shards {
      let shard_state = shard_value.get("state").and_then(|s| s.as_str()).unwrap_or("");
      if !NORMAL_SHARD_STATES.contains(&shard_state) {
        debug!(collection, shard, state = shard_state, "Shard in abnormal state");
        return Some(ClusterState::Degraded);
      }
      if let Some(replicas) = shard_value.get("replicas").and_then(|r| r.as_object()) {
        for (replica, replica_value) in replicas {
          let replica_state = replica_value.get("state").and_then(|s| s.as_str()).unwrap_or("");
          if replica_state != "active" {
            debug!(collection, shard, replica, state = replica_state, "Replica not active");
            return Some(ClusterState::Degraded);
          }
        }
      }
    }
  }
  Some(ClusterState::Ok)
}
