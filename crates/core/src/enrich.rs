//! Pluggable pre-index enrichment hooks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::DataSourceSettings;
use crate::document::SolrDocument;
use crate::metadata::MetadataRecord;

/// A pre-index hook that may add or rewrite document fields.
pub trait Enricher: Send + Sync {
  fn name(&self) -> &str;
  fn enrich(&self, settings: &DataSourceSettings, record: &dyn MetadataRecord, doc: &mut SolrDocument);
}

type EnricherBuilder = Arc<dyn Fn() -> Arc<dyn Enricher> + Send + Sync>;

/// Name → builder registry with lazy, memoized instantiation.
///
/// Unqualified names resolve as-is; builders are injected at startup in place
/// of runtime class loading.
#[derive(Clone, Default)]
pub struct EnricherRegistry {
  builders: HashMap<String, EnricherBuilder>,
  instances: HashMap<String, Arc<dyn Enricher>>,
}

impl EnricherRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register<F>(&mut self, name: &str, builder: F)
  where
    F: Fn() -> Arc<dyn Enricher> + Send + Sync + 'static,
  {
    self.builders.insert(name.to_string(), Arc::new(builder));
  }

  /// Instantiate a named enricher, reusing a prior instance.
  pub fn get(&mut self, name: &str) -> Option<Arc<dyn Enricher>> {
    if let Some(instance) = self.instances.get(name) {
      return Some(instance.clone());
    }
    let builder = self.builders.get(name)?;
    let instance = builder();
    self.instances.insert(name.to_string(), instance.clone());
    Some(instance)
  }

  /// Resolve the enrichers for a source: global ones first, then per-source,
  /// duplicates removed while preserving order. Unknown names are logged and
  /// skipped.
  pub fn resolve(&mut self, global: &[String], per_source: &[String]) -> Vec<Arc<dyn Enricher>> {
    let mut seen = Vec::new();
    let mut enrichers = Vec::new();
    for name in global.iter().chain(per_source) {
      if seen.contains(name) {
        continue;
      }
      seen.push(name.clone());
      match self.get(name) {
        Some(enricher) => enrichers.push(enricher),
        None => warn!(enricher = %name, "Unknown enrichment, skipping"),
      }
    }
    enrichers
  }
}

impl std::fmt::Debug for EnricherRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let mut names: Vec<_> = self.builders.keys().collect();
    names.sort();
    f.debug_struct("EnricherRegistry").field("enrichers", &names).finish()
  }
}
