//! Where built documents go: the update buffer feeding the Solr worker pool
//! or a dump file.

use std::sync::Arc;

use bibdex_core::{SolrConfig, SolrDocument};
use bibdex_solr::{DumpWriter, SolrClient, SolrError, UpdateBuffer};
use tokio_util::sync::CancellationToken;

use crate::error::IndexError;
use crate::pool::{PoolHandler, WorkerPool};

/// One stream's update machinery. The single and merged streams each own a
/// sink, mirroring their separate fault domains.
pub struct UpdateSink {
  buffer: UpdateBuffer,
  dump: Option<DumpWriter>,
  pool: WorkerPool<String, Result<(), SolrError>>,
  client: Arc<SolrClient>,
  commits_enabled: bool,
  updated: bool,
}

impl UpdateSink {
  pub fn new(
    config: &SolrConfig,
    client: Arc<SolrClient>,
    dump_prefix: Option<&str>,
    commits_enabled: bool,
    cancel: CancellationToken,
  ) -> Result<Self, IndexError> {
    let dump = dump_prefix.map(DumpWriter::allocate).transpose()?;
    let pool_client = client.clone();
    let handler: PoolHandler<String, Result<(), SolrError>> = Arc::new(move |body: String| {
      let client = pool_client.clone();
      Box::pin(async move { client.request(&body).await })
    });
    let workers = if dump.is_some() { 0 } else { config.solr_update_workers };
    let pool = WorkerPool::new("solr", workers, 64, handler, None, cancel);

    Ok(Self {
      buffer: UpdateBuffer::new(config.max_update_records, config.max_update_size),
      dump,
      pool,
      client,
      commits_enabled: commits_enabled && dump_prefix.is_none(),
      updated: false,
    })
  }

  pub async fn push_document(&mut self, doc: &SolrDocument) -> Result<(), IndexError> {
    if let Some(body) = self.buffer.append(doc).map_err(IndexError::Solr)? {
      self.dispatch(body).await?;
    }
    self.pump()
  }

  pub async fn push_delete(&mut self, id: &str) -> Result<(), IndexError> {
    if let Some(body) = self.buffer.delete(id) {
      self.dispatch(body).await?;
    }
    self.pump()
  }

  async fn dispatch(&mut self, body: String) -> Result<(), IndexError> {
    self.updated = true;
    match &mut self.dump {
      Some(dump) => dump.append(&body)?,
      None => self.pool.add_request(body).await?,
    }
    Ok(())
  }

  /// Surface finished Solr results; an error here has exhausted its retries.
  fn pump(&mut self) -> Result<(), IndexError> {
    while let Some(result) = self.pool.try_result() {
      result.map_err(IndexError::Solr)?;
    }
    Ok(())
  }

  /// Flush the buffer and wait for every outstanding Solr request.
  pub async fn drain(&mut self) -> Result<(), IndexError> {
    let bodies = self.buffer.flush();
    for body in bodies {
      self.dispatch(body).await?;
    }
    while let Some(result) = self.pool.next_result().await {
      result.map_err(IndexError::Solr)?;
    }
    Ok(())
  }

  /// Interval commit: full drain barrier, then an explicit commit.
  pub async fn interval_commit(&mut self) -> Result<(), IndexError> {
    if !self.commits_enabled {
      return Ok(());
    }
    self.drain().await?;
    self.client.commit().await.map_err(IndexError::Solr)?;
    Ok(())
  }

  /// Drain and, when anything was updated, issue the final commit. Returns
  /// whether updates occurred.
  pub async fn finish(&mut self) -> Result<bool, IndexError> {
    self.drain().await?;
    if self.commits_enabled && self.updated {
      self.client.commit().await.map_err(IndexError::Solr)?;
    }
    Ok(self.updated)
  }

  pub fn updated(&self) -> bool {
    self.updated
  }

  pub async fn destroy(self) {
    self.pool.destroy().await;
  }
}
