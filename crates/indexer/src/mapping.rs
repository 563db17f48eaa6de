//! Field value remapping and the enrichment bridge.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use bibdex_core::{DataSourceSettings, Enricher, EnricherRegistry, MetadataRecord, SolrDocument, SolrValue};

/// Raw value → mapped value for one field.
pub type MappingTable = HashMap<String, String>;

/// Value mapping tables, loaded by the host from its mapping files.
///
/// A source-specific table replaces the global table for that field; fields
/// without a table pass through untouched, as do values the table does not
/// know.
#[derive(Debug, Default)]
pub struct FieldMapper {
  global: HashMap<String, MappingTable>,
  per_source: HashMap<String, HashMap<String, MappingTable>>,
}

impl FieldMapper {
  pub fn new(global: HashMap<String, MappingTable>, per_source: HashMap<String, HashMap<String, MappingTable>>) -> Self {
    Self { global, per_source }
  }

  pub fn map_values(&self, source_id: &str, doc: &mut SolrDocument) {
    let source_tables = self.per_source.get(source_id);
    let fields: BTreeSet<&String> = self
      .global
      .keys()
      .chain(source_tables.into_iter().flat_map(|t| t.keys()))
      .collect();

    for field in fields {
      let table = source_tables
        .and_then(|t| t.get(field))
        .or_else(|| self.global.get(field));
      let Some(table) = table else { continue };
      let Some(value) = doc.get(field) else { continue };

      let mapped = match value {
        SolrValue::Str(s) => SolrValue::Str(table.get(s).cloned().unwrap_or_else(|| s.clone())),
        SolrValue::List(list) => SolrValue::List(
          list
            .iter()
            .map(|v| table.get(v).cloned().unwrap_or_else(|| v.clone()))
            .collect(),
        ),
      };
      doc.insert(field.clone(), mapped);
    }
  }
}

/// Applies the configured enrichers to a document: global ones first, then
/// per-source, duplicates removed. Instantiation is lazy inside the registry.
pub struct EnrichmentBridge {
  registry: Mutex<EnricherRegistry>,
  global: Vec<String>,
}

impl EnrichmentBridge {
  pub fn new(registry: EnricherRegistry, global: Vec<String>) -> Self {
    Self {
      registry: Mutex::new(registry),
      global,
    }
  }

  pub fn enrich(&self, settings: &DataSourceSettings, record: &dyn MetadataRecord, doc: &mut SolrDocument) {
    let enrichers = self
      .registry
      .lock()
      .unwrap()
      .resolve(&self.global, &settings.enrichments);
    for enricher in enrichers {
      enricher.enrich(settings, record, doc);
    }
  }
}
