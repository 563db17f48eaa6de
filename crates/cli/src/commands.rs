//! Command wiring: configuration, store loading, and coordinator setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bibdex_core::{Config, EnricherRegistry, FormatRegistry};
use bibdex_indexer::{Coordinator, DocumentBuilder, EnrichmentBridge, FieldMapper, RunOutcome, UpdateParams};
use bibdex_solr::{ClusterMonitor, HttpTransport, SolrClient, SolrTransport};
use bibdex_store::MemoryStore;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything `update` and the maintenance commands need.
pub struct App {
  pub coordinator: Coordinator,
}

impl App {
  /// Wire the pipeline from configuration and the record export files.
  ///
  /// The bundled binary runs against the in-memory store loaded from JSONL
  /// exports; deployments with a live document store embed the indexer crate
  /// and provide their own `RecordStore`.
  pub fn new(
    config_path: &Path,
    datasources_path: Option<&Path>,
    records_path: Option<&Path>,
    dedups_path: Option<&Path>,
    cancel: CancellationToken,
  ) -> Result<Self> {
    let config = Config::load(config_path, datasources_path)
      .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    let config = Arc::new(config);

    let store = MemoryStore::new();
    if let Some(path) = records_path {
      let count = load_records(&store, path)?;
      info!(count, path = %path.display(), "Loaded records");
    }
    if let Some(path) = dedups_path {
      let count = load_dedups(&store, path)?;
      info!(count, path = %path.display(), "Loaded dedup groups");
    }
    let store: Arc<dyn bibdex_store::RecordStore> = Arc::new(store);

    let transport: Arc<dyn SolrTransport> = Arc::new(HttpTransport::new(
      config.solr.username.clone(),
      config.solr.password.clone(),
    ));
    let cluster = Arc::new(ClusterMonitor::new(
      transport.clone(),
      config.solr.admin_url.clone(),
      config.solr.cluster_state_check_interval,
    ));
    let client = Arc::new(SolrClient::new(
      transport.clone(),
      config.solr.update_url.clone(),
      config.solr.max_update_tries,
      config.solr.update_retry_wait,
      cluster,
    ));

    let builder = DocumentBuilder::new(
      config.clone(),
      Arc::new(FormatRegistry::with_builtins()),
      None,
      Arc::new(FieldMapper::default()),
      Arc::new(EnrichmentBridge::new(EnricherRegistry::new(), config.enrichments.clone())),
      store.clone(),
    );

    let coordinator = Coordinator::new(config, store, builder, client, transport, cancel);
    Ok(Self { coordinator })
  }
}

fn load_records(store: &MemoryStore, path: &Path) -> Result<usize> {
  let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
  let mut count = 0;
  for line in contents.lines().filter(|l| !l.trim().is_empty()) {
    store.insert_record(serde_json::from_str(line).with_context(|| format!("record on line {}", count + 1))?);
    count += 1;
  }
  Ok(count)
}

fn load_dedups(store: &MemoryStore, path: &Path) -> Result<usize> {
  let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
  let mut count = 0;
  for line in contents.lines().filter(|l| !l.trim().is_empty()) {
    store.insert_dedup(serde_json::from_str(line).with_context(|| format!("dedup group on line {}", count + 1))?);
    count += 1;
  }
  Ok(count)
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_update(
  app: &App,
  from: Option<String>,
  source: Option<String>,
  single: Option<String>,
  no_commit: bool,
  delete: bool,
  compare: Option<String>,
  dump_prefix: Option<PathBuf>,
  date_per_server: bool,
) -> Result<RunOutcome> {
  let from = from
    .map(|v| parse_from(&v))
    .transpose()
    .context("invalid --from date")?;
  let params = UpdateParams {
    from,
    source,
    single,
    no_commit,
    delete,
    compare,
    dump_prefix: dump_prefix.map(|p| p.to_string_lossy().to_string()),
    date_per_server,
  };
  Ok(app.coordinator.update_records(params).await?)
}

pub async fn cmd_count_values(app: &App, source: Option<String>, field: String, mapped: bool) -> Result<RunOutcome> {
  let counts = app.coordinator.count_values(source.as_deref(), &field, mapped).await?;
  for (value, count) in &counts {
    println!("{count:>10}  {value}");
  }
  println!("{} distinct values", counts.len());
  Ok(RunOutcome::Completed { updated: false })
}

pub async fn cmd_check_index(app: &App) -> Result<RunOutcome> {
  Ok(app.coordinator.check_indexed_records().await?)
}

/// Accept full RFC 3339 timestamps or bare `YYYY-MM-DD` dates.
fn parse_from(value: &str) -> Result<DateTime<Utc>> {
  if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
    return Ok(ts.with_timezone(&Utc));
  }
  let date = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")?;
  Ok(
    date
      .and_hms_opt(0, 0, 0)
      .expect("midnight is always valid")
      .and_utc(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_from() {
    assert_eq!(
      parse_from("2024-03-01").unwrap(),
      chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 3, 1, 0, 0, 0).unwrap()
    );
    assert_eq!(
      parse_from("2024-03-01T12:30:00Z").unwrap(),
      chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 3, 1, 12, 30, 0).unwrap()
    );
    assert!(parse_from("not a date").is_err());
  }

  #[test]
  fn test_load_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.jsonl");
    std::fs::write(
      &path,
      concat!(
        r#"{"id":"a.1","source_id":"a","format":"json","payload":"{}","created":"2024-01-01T00:00:00Z","updated":"2024-01-02T00:00:00Z"}"#,
        "\n",
        r#"{"id":"a.2","source_id":"a","format":"json","payload":"{}","created":"2024-01-01T00:00:00Z","updated":"2024-01-02T00:00:00Z","deleted":true}"#,
        "\n",
      ),
    )
    .unwrap();

    let store = MemoryStore::new();
    assert_eq!(load_records(&store, &path).unwrap(), 2);
    assert_eq!(store.record_count(), 2);
  }
}
