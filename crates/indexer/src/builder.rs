//! Per-record transformation into an index-ready document.

use std::collections::HashMap;
use std::sync::Arc;

use bibdex_core::{
  ComponentParts, Config, DataSourceSettings, DedupGroup, FormatRegistry, InstitutionInBuilding, MetadataRecord,
  Record, SolrDocument, SolrValue, XsltTransformer, create_solr_id, normalize_key, unique_preserving_order,
};
use bibdex_store::{FindOptions, RecordFilter, RecordStore};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::mapping::{EnrichmentBridge, FieldMapper};

/// Fields never folded into a synthesized `allfields`.
const ALLFIELDS_EXCLUDED: [&str; 6] = ["ctrlnum", "fullrecord", "id", "record_format", "recordtype", "thumbnail"];

/// Result of building one record.
#[derive(Debug)]
pub enum BuildOutcome {
  Document {
    doc: SolrDocument,
    /// Component parts merged into this host.
    merged_parts: usize,
  },
  /// Hidden component part of a source that does not index merged parts.
  Skip,
}

/// Builds index documents from records: transformation, identity and
/// hierarchy linkage, building facets, work keys, and final cleanup.
///
/// Cheaply cloneable; every worker carries its own handle.
#[derive(Clone)]
pub struct DocumentBuilder {
  config: Arc<Config>,
  registry: Arc<FormatRegistry>,
  xslt: Option<Arc<dyn XsltTransformer>>,
  mapper: Arc<FieldMapper>,
  enrichments: Arc<EnrichmentBridge>,
  store: Arc<dyn RecordStore>,
}

impl DocumentBuilder {
  pub fn new(
    config: Arc<Config>,
    registry: Arc<FormatRegistry>,
    xslt: Option<Arc<dyn XsltTransformer>>,
    mapper: Arc<FieldMapper>,
    enrichments: Arc<EnrichmentBridge>,
    store: Arc<dyn RecordStore>,
  ) -> Self {
    Self {
      config,
      registry,
      xslt,
      mapper,
      enrichments,
      store,
    }
  }

  pub fn store(&self) -> &Arc<dyn RecordStore> {
    &self.store
  }

  /// Build the index document for a record, optionally inside its dedup
  /// group.
  pub async fn build_document(&self, record: &Record, dedup: Option<&DedupGroup>) -> Result<BuildOutcome, IndexError> {
    let default_settings = DataSourceSettings::default();
    let mut warnings: Vec<String> = Vec::new();
    let settings = match self.config.source_settings(&record.source_id) {
      Some(settings) => settings,
      None => {
        warn!(source = %record.source_id, "No settings for data source");
        warnings.push(format!("Settings missing for data source '{}'", record.source_id));
        &default_settings
      }
    };

    let mut metadata = self.parse_metadata(record, settings)?;

    let hidden = self.is_hidden_component_part(record, settings, metadata.as_ref());
    if hidden && !settings.index_merged_parts {
      debug!(id = %record.id, "Skipping hidden component part");
      return Ok(BuildOutcome::Skip);
    }

    let (merged_parts, record_date) = self.merge_component_parts(record, settings, metadata.as_mut()).await?;

    let mut doc = self.transform(record, settings, metadata.as_ref())?;

    // identity and linkage
    let solr_id = create_solr_id(&record.id, Some(settings));
    doc.insert("id", solr_id.clone());
    if let Some(dedup) = dedup {
      doc.insert(self.config.solr.fields.dedup_id.clone(), dedup.id.clone());
    }
    if record.is_component_part() {
      self
        .link_to_hosts(record, metadata.as_ref(), &mut doc, &mut warnings)
        .await?;
    } else {
      self.prefix_hierarchy_ids(record, settings, &mut doc);
    }
    if merged_parts > 0 {
      let fields = &self.config.solr.fields;
      doc.insert(fields.is_hierarchy_id.clone(), solr_id);
      doc.insert(fields.is_hierarchy_title.clone(), metadata.title());
    }

    // defaults and extras
    if !doc.contains("institution")
      && let Some(institution) = &settings.institution
    {
      doc.insert("institution", institution.clone());
    }
    for entry in &settings.extrafields {
      if let Some((field, value)) = entry.split_once(':') {
        doc.append(field, value);
      } else {
        warn!(source = %record.source_id, entry = %entry, "Malformed extrafields entry");
      }
    }

    // building pipeline
    if settings.add_institution_to_building_before_mapping {
      self.add_institution_to_building(record, settings, metadata.as_ref(), &mut doc);
    }
    self.mapper.map_values(&record.source_id, &mut doc);
    if !settings.add_institution_to_building_before_mapping {
      self.add_institution_to_building(record, settings, metadata.as_ref(), &mut doc);
    }

    self.expand_hierarchical_facets(&mut doc);

    doc.insert_if_absent("record_format", metadata.format());
    self.synthesize_allfields(&mut doc);

    doc.insert("first_indexed", iso_z(record.created));
    doc.insert("last_indexed", iso_z(record_date));
    doc.insert_if_absent("fullrecord", metadata.to_xml());

    if self.config.solr.format_in_allfields {
      for format_value in doc.values_of("format").to_vec() {
        doc.append("allfields", searchable_format(&format_value));
      }
    }

    if hidden {
      doc.insert("hidden_component_boolean", "true");
    }

    let work = metadata.work_identification_data();
    if !work.is_empty() {
      let keys = work_keys(&work);
      if !keys.is_empty() {
        doc.insert(self.config.solr.fields.work_keys.clone(), SolrValue::List(keys));
      }
    }

    warnings.extend(metadata.processing_warnings());
    if !warnings.is_empty()
      && let Some(field) = &self.config.solr.warnings_field
    {
      doc.insert(field.clone(), SolrValue::List(warnings));
    }

    doc.finalize(self.config.solr.unicode_normalization_form);

    Ok(BuildOutcome::Document { doc, merged_parts })
  }

  /// The untransformed field view of a record, for value counting.
  pub fn raw_document(&self, record: &Record) -> Result<SolrDocument, IndexError> {
    let default_settings = DataSourceSettings::default();
    let settings = self.config.source_settings(&record.source_id).unwrap_or(&default_settings);
    Ok(self.parse_metadata(record, settings)?.to_solr_array())
  }

  fn parse_metadata(
    &self,
    record: &Record,
    settings: &DataSourceSettings,
  ) -> Result<Box<dyn MetadataRecord>, IndexError> {
    let mut payload = record.payload.clone();
    let params = self.stylesheet_params(record, settings);
    if let Some(stylesheet) = &settings.pre_transformation {
      payload = self.stylesheet(stylesheet)?.transform(stylesheet, &payload, &params)?;
    }
    if let Some(stylesheet) = &settings.normalization {
      payload = self.stylesheet(stylesheet)?.transform(stylesheet, &payload, &params)?;
    }
    Ok(self.registry.create(&record.format, &payload)?)
  }

  fn stylesheet(&self, name: &str) -> Result<&Arc<dyn XsltTransformer>, IndexError> {
    self
      .xslt
      .as_ref()
      .ok_or_else(|| IndexError::Config(format!("stylesheet '{name}' configured but no XSLT engine provided")))
  }

  fn stylesheet_params(&self, record: &Record, settings: &DataSourceSettings) -> HashMap<String, String> {
    HashMap::from([
      ("source_id".to_string(), record.source_id.clone()),
      ("institution".to_string(), settings.institution.clone().unwrap_or_default()),
      ("format".to_string(), record.format.clone()),
      (
        "id_prefix".to_string(),
        settings.id_prefix.clone().unwrap_or_else(|| record.source_id.clone()),
      ),
    ])
  }

  /// Whether this source's policy folds component parts of `format` into
  /// their host.
  fn merges_parts(&self, policy: ComponentParts, format: &str) -> bool {
    let format = format.to_string();
    let solr = &self.config.solr;
    match policy {
      ComponentParts::MergeAll => true,
      ComponentParts::MergeNonEarticles => !solr.ejournal_formats.contains(&format),
      ComponentParts::AsIs => !solr.journal_formats.contains(&format) && !solr.ejournal_formats.contains(&format),
    }
  }

  fn is_hidden_component_part(
    &self,
    record: &Record,
    settings: &DataSourceSettings,
    metadata: &dyn MetadataRecord,
  ) -> bool {
    record.is_component_part() && self.merges_parts(settings.component_parts, &metadata.format())
  }

  /// Fold linked component parts into a host record. Returns the count and
  /// the record's change date, promoted to the newest part date.
  async fn merge_component_parts(
    &self,
    record: &Record,
    settings: &DataSourceSettings,
    metadata: &mut dyn MetadataRecord,
  ) -> Result<(usize, DateTime<Utc>), IndexError> {
    let mut record_date = record.updated;
    if record.is_component_part() || record.linking_ids.is_empty() {
      return Ok((0, record_date));
    }

    let source_in = if settings.component_part_source_id.is_empty() {
      vec![record.source_id.clone()]
    } else {
      settings.component_part_source_id.clone()
    };
    let filter = RecordFilter {
      host_record_in: record.linking_ids.clone(),
      source_in,
      deleted: Some(false),
      ..Default::default()
    };
    let mut stream = self.store.find_records(&filter, &FindOptions::default()).await?;
    let mut parts = Vec::new();
    while let Some(part) = stream.next().await {
      parts.push(part?);
    }

    if parts.is_empty() || !self.merges_parts(settings.component_parts, &metadata.format()) {
      return Ok((0, record_date));
    }

    debug!(id = %record.id, parts = parts.len(), "Merging component parts into host");
    if let Some(latest) = metadata.merge_component_parts(&parts)
      && latest > record_date
    {
      record_date = latest;
    }
    Ok((parts.len(), record_date))
  }

  fn transform(
    &self,
    record: &Record,
    settings: &DataSourceSettings,
    metadata: &dyn MetadataRecord,
  ) -> Result<SolrDocument, IndexError> {
    if let Some(stylesheet) = &settings.solr_transformation {
      let params = self.stylesheet_params(record, settings);
      let output = self
        .stylesheet(stylesheet)?
        .transform(stylesheet, &metadata.to_xml(), &params)?;
      let doc: SolrDocument = serde_json::from_str(&output)?;
      return Ok(doc);
    }
    let mut doc = metadata.to_solr_array();
    self.enrichments.enrich(settings, metadata, &mut doc);
    Ok(doc)
  }

  /// Resolve each host record and link the component part to it.
  async fn link_to_hosts(
    &self,
    record: &Record,
    metadata: &dyn MetadataRecord,
    doc: &mut SolrDocument,
    warnings: &mut Vec<String>,
  ) -> Result<(), IndexError> {
    let fields = self.config.solr.fields.clone();
    let mut host_found = false;
    for host_id in &record.host_record_ids {
      let filter = RecordFilter {
        linking_id: Some(host_id.clone()),
        source_in: vec![record.source_id.clone()],
        deleted: Some(false),
        ..Default::default()
      };
      let Some(host) = self.store.find_record(&filter).await? else {
        continue;
      };
      host_found = true;
      let host_settings = self.config.source_settings(&host.source_id);
      doc.append(&fields.hierarchy_parent_id, create_solr_id(&host.id, host_settings));
      match self.registry.create(&host.format, &host.payload) {
        Ok(host_metadata) => doc.append(&fields.hierarchy_parent_title, host_metadata.title()),
        Err(e) => warn!(host = %host.id, err = %e, "Could not parse host record for title"),
      }
    }
    if !host_found {
      warn!(id = %record.id, "Host record not found for component part");
      warnings.push("host record missing".to_string());
      doc.insert_if_absent(&fields.container_title, metadata.container_title());
    }
    doc.insert(fields.container_volume, metadata.volume());
    doc.insert(fields.container_issue, metadata.issue());
    doc.insert(fields.container_start_page, metadata.start_page());
    doc.insert(fields.container_reference, metadata.container_reference());
    Ok(())
  }

  /// Hierarchy id values from the native transform are local ids; qualify
  /// them with the source and run them through id creation.
  fn prefix_hierarchy_ids(&self, record: &Record, settings: &DataSourceSettings, doc: &mut SolrDocument) {
    let fields = &self.config.solr.fields;
    for field in [&fields.hierarchy_top_id, &fields.hierarchy_parent_id, &fields.is_hierarchy_id] {
      if !doc.contains(field) {
        continue;
      }
      let prefixed: Vec<String> = doc
        .values_of(field)
        .iter()
        .map(|value| create_solr_id(&format!("{}.{value}", record.source_id), Some(settings)))
        .collect();
      doc.insert(field.clone(), SolrValue::List(prefixed));
    }
  }

  fn add_institution_to_building(
    &self,
    record: &Record,
    settings: &DataSourceSettings,
    metadata: &dyn MetadataRecord,
    doc: &mut SolrDocument,
  ) {
    let prefix = match settings.institution_in_building {
      InstitutionInBuilding::Institution => settings.institution.clone().unwrap_or_default(),
      InstitutionInBuilding::Source => record.source_id.clone(),
      InstitutionInBuilding::Driver => metadata.format(),
      InstitutionInBuilding::InstitutionSource => format!(
        "{}/{}",
        settings.institution.clone().unwrap_or_default(),
        record.source_id
      ),
      InstitutionInBuilding::None => return,
    };
    if prefix.is_empty() {
      return;
    }
    for field in &self.config.solr.building_fields {
      let values = doc.values_of(field).to_vec();
      if !values.is_empty() {
        let prefixed: Vec<String> = values
          .into_iter()
          .map(|v| if v.is_empty() { prefix.clone() } else { format!("{prefix}/{v}") })
          .collect();
        doc.insert(field.clone(), SolrValue::List(prefixed));
      } else if field == "building" {
        doc.insert("building", SolrValue::List(vec![prefix.clone()]));
      }
    }
  }

  fn expand_hierarchical_facets(&self, doc: &mut SolrDocument) {
    for facet in &self.config.solr.hierarchical_facets {
      let values = doc.values_of(facet).to_vec();
      if values.is_empty() {
        continue;
      }
      let expanded: Vec<String> = values.iter().flat_map(|v| expand_hierarchical(v)).collect();
      doc.insert(facet.clone(), SolrValue::List(expanded));
    }
  }

  fn synthesize_allfields(&self, doc: &mut SolrDocument) {
    if doc.contains("allfields") {
      return;
    }
    let all: Vec<String> = doc
      .iter()
      .filter(|(field, _)| !ALLFIELDS_EXCLUDED.contains(&field.as_str()))
      .flat_map(|(_, value)| value.values().iter().cloned())
      .collect();
    doc.insert("allfields", SolrValue::List(unique_preserving_order(all, false)));
  }
}

fn iso_z(ts: DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Depth-prefixed expansion of a `a/b/c` facet path.
pub fn expand_hierarchical(value: &str) -> Vec<String> {
  let parts: Vec<&str> = value.split('/').collect();
  (0..parts.len())
    .map(|depth| format!("{depth}/{}/", parts[..=depth].join("/")))
    .collect()
}

/// A format value findable through `allfields`: key-normalized with digits
/// substituted so index analyzers keep the token whole.
pub fn searchable_format(format: &str) -> String {
  normalize_key(format)
    .chars()
    .flat_map(|c| match c.to_digit(10) {
      Some(d) => vec![(b'a' + d as u8) as char, 'x'],
      None => vec![c],
    })
    .collect()
}

/// Work keys: `UT <title>` for uniform titles, `AT <author> <title>` for the
/// non-uniform title × author cross product, in both scripts.
pub fn work_keys(data: &bibdex_core::WorkIdentificationData) -> Vec<String> {
  let mut keys = Vec::new();
  for (titles, authors) in [
    (&data.titles, &data.authors),
    (&data.titles_alt_script, &data.authors_alt_script),
  ] {
    for title in titles {
      let norm_title = normalize_key(&title.value);
      if norm_title.is_empty() {
        continue;
      }
      if title.uniform {
        keys.push(format!("UT {norm_title}"));
      } else {
        for author in authors {
          let norm_author = normalize_key(author);
          if !norm_author.is_empty() {
            keys.push(format!("AT {norm_author} {norm_title}"));
          }
        }
      }
    }
  }
  keys
}

#[cfg(test)]
mod tests {
  use bibdex_core::{EnricherRegistry, WorkTitle};
  use bibdex_store::MemoryStore;
  use chrono::TimeZone;

  use super::*;

  pub(crate) fn record(id: &str, source: &str, payload: serde_json::Value) -> Record {
    Record {
      id: id.to_string(),
      source_id: source.to_string(),
      format: "json".to_string(),
      payload: payload.to_string(),
      linking_ids: Vec::new(),
      host_record_ids: Vec::new(),
      deleted: false,
      created: Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
      updated: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
      dedup_id: None,
    }
  }

  pub(crate) fn builder_with(config: Config, store: MemoryStore) -> DocumentBuilder {
    DocumentBuilder::new(
      Arc::new(config),
      Arc::new(FormatRegistry::with_builtins()),
      None,
      Arc::new(FieldMapper::default()),
      Arc::new(EnrichmentBridge::new(EnricherRegistry::new(), Vec::new())),
      Arc::new(store),
    )
  }

  fn config_with_source(source: &str, settings: DataSourceSettings) -> Config {
    let mut config = Config::default();
    config.sources.insert(source.to_string(), settings);
    config
  }

  async fn build(builder: &DocumentBuilder, record: &Record) -> SolrDocument {
    match builder.build_document(record, None).await.unwrap() {
      BuildOutcome::Document { doc, .. } => doc,
      BuildOutcome::Skip => panic!("expected a document"),
    }
  }

  #[tokio::test]
  async fn test_simple_record() {
    let builder = builder_with(
      config_with_source("src1", DataSourceSettings::default()),
      MemoryStore::new(),
    );
    let record = record(
      "src1.001",
      "src1",
      serde_json::json!({"format": "Book", "fields": {"title": "Hello World", "format": "Book"}}),
    );
    let doc = build(&builder, &record).await;

    assert_eq!(doc.get_str("id"), Some("src1.001"));
    assert_eq!(doc.get_str("record_format"), Some("Book"));
    assert_eq!(doc.get_str("first_indexed"), Some("2024-01-15T08:00:00Z"));
    assert_eq!(doc.get_str("last_indexed"), Some("2024-03-01T12:30:00Z"));
    assert!(doc.values_of("allfields").contains(&"Hello World".to_string()));
    assert!(doc.get_str("fullrecord").is_some());
  }

  #[tokio::test]
  async fn test_allfields_excludes_control_fields() {
    let builder = builder_with(
      config_with_source("src1", DataSourceSettings::default()),
      MemoryStore::new(),
    );
    let record = record(
      "src1.001",
      "src1",
      serde_json::json!({"fields": {"title": "T", "ctrlnum": "123", "thumbnail": "http://x/t.png"}}),
    );
    let doc = build(&builder, &record).await;
    let allfields = doc.values_of("allfields");
    assert!(allfields.contains(&"T".to_string()));
    assert!(!allfields.contains(&"123".to_string()));
    assert!(!allfields.iter().any(|v| v.contains("t.png")));
  }

  #[tokio::test]
  async fn test_component_part_merge_promotes_date() {
    let store = MemoryStore::new();
    let mut part = record(
      "s.c1",
      "s",
      serde_json::json!({"fields": {"title": "Part One", "host_record_id": "h1"}}),
    );
    part.host_record_ids = vec!["h1".to_string()];
    part.updated = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    store.insert_record(part);

    let settings = DataSourceSettings {
      component_parts: ComponentParts::MergeAll,
      ..Default::default()
    };
    let builder = builder_with(config_with_source("s", settings), store);

    let mut host = record("s.h1", "s", serde_json::json!({"fields": {"title": "Host"}}));
    host.linking_ids = vec!["h1".to_string()];

    let outcome = builder.build_document(&host, None).await.unwrap();
    let BuildOutcome::Document { doc, merged_parts } = outcome else {
      panic!("expected a document")
    };
    assert_eq!(merged_parts, 1);
    assert_eq!(doc.get_str("last_indexed"), Some("2024-06-01T00:00:00Z"));
    // a host with merged parts is a hierarchy root
    assert_eq!(doc.values_of("is_hierarchy_id"), ["s.h1"]);
    assert_eq!(doc.values_of("is_hierarchy_title"), ["Host"]);
    assert_eq!(doc.values_of("contents"), ["Part One"]);
  }

  #[tokio::test]
  async fn test_journal_host_keeps_parts_separate() {
    let store = MemoryStore::new();
    let mut part = record("s.c1", "s", serde_json::json!({"fields": {"title": "Article"}}));
    part.host_record_ids = vec!["h1".to_string()];
    store.insert_record(part);

    let builder = builder_with(config_with_source("s", DataSourceSettings::default()), store);
    let mut host = record(
      "s.h1",
      "s",
      serde_json::json!({"format": "Journal", "fields": {"title": "The Journal", "format": "Journal"}}),
    );
    host.linking_ids = vec!["h1".to_string()];

    let BuildOutcome::Document { merged_parts, .. } = builder.build_document(&host, None).await.unwrap() else {
      panic!("expected a document")
    };
    assert_eq!(merged_parts, 0);
  }

  #[tokio::test]
  async fn test_hidden_component_part_skip_and_marker() {
    let store = MemoryStore::new();
    let settings = DataSourceSettings {
      component_parts: ComponentParts::MergeAll,
      index_merged_parts: false,
      ..Default::default()
    };
    let builder = builder_with(config_with_source("s", settings), store.clone());
    let mut part = record("s.c1", "s", serde_json::json!({"fields": {"title": "Part"}}));
    part.host_record_ids = vec!["h1".to_string()];

    assert!(matches!(
      builder.build_document(&part, None).await.unwrap(),
      BuildOutcome::Skip
    ));

    // with index_merged_parts the part is indexed, marked hidden
    let settings = DataSourceSettings {
      component_parts: ComponentParts::MergeAll,
      ..Default::default()
    };
    let builder = builder_with(config_with_source("s", settings), store);
    let BuildOutcome::Document { doc, .. } = builder.build_document(&part, None).await.unwrap() else {
      panic!("expected a document")
    };
    assert_eq!(doc.get_str("hidden_component_boolean"), Some("true"));
  }

  #[tokio::test]
  async fn test_component_part_links_to_host() {
    let store = MemoryStore::new();
    let mut host = record("s.h1", "s", serde_json::json!({"fields": {"title": "Host Title"}}));
    host.linking_ids = vec!["link1".to_string()];
    store.insert_record(host);

    let builder = builder_with(config_with_source("s", DataSourceSettings::default()), store);
    let mut part = record(
      "s.c1",
      "s",
      serde_json::json!({"fields": {"title": "Part", "volume": "12", "issue": "3", "start_page": "45", "container_reference": "Vol 12", "host_record_id": "link1"}}),
    );
    part.host_record_ids = vec!["link1".to_string()];

    let doc = build(&builder, &part).await;
    assert_eq!(doc.values_of("hierarchy_parent_id"), ["s.h1"]);
    assert_eq!(doc.values_of("hierarchy_parent_title"), ["Host Title"]);
    assert_eq!(doc.get_str("container_volume"), Some("12"));
    assert_eq!(doc.get_str("container_issue"), Some("3"));
    assert_eq!(doc.get_str("container_start_page"), Some("45"));
    assert_eq!(doc.get_str("container_reference"), Some("Vol 12"));
  }

  #[tokio::test]
  async fn test_component_part_without_host_warns() {
    let mut config = config_with_source("s", DataSourceSettings::default());
    config.solr.warnings_field = Some("warnings_str_mv".to_string());
    let builder = builder_with(config, MemoryStore::new());
    let mut part = record(
      "s.c1",
      "s",
      serde_json::json!({"fields": {"title": "Part", "container_title": "Some Journal", "host_record_id": "gone"}}),
    );
    part.host_record_ids = vec!["gone".to_string()];

    let doc = build(&builder, &part).await;
    assert!(!doc.contains("hierarchy_parent_id"));
    assert_eq!(doc.get_str("container_title"), Some("Some Journal"));
    assert!(
      doc
        .values_of("warnings_str_mv")
        .contains(&"host record missing".to_string())
    );
  }

  #[tokio::test]
  async fn test_hierarchy_ids_prefixed_for_non_component() {
    let builder = builder_with(
      config_with_source("s", DataSourceSettings::default()),
      MemoryStore::new(),
    );
    let record = record(
      "s.top",
      "s",
      serde_json::json!({"fields": {"title": "T", "hierarchy_top_id": "root", "hierarchy_parent_id": "mid"}}),
    );
    let doc = build(&builder, &record).await;
    assert_eq!(doc.values_of("hierarchy_top_id"), ["s.root"]);
    assert_eq!(doc.values_of("hierarchy_parent_id"), ["s.mid"]);
  }

  #[tokio::test]
  async fn test_institution_and_extrafields() {
    let settings = DataSourceSettings {
      institution: Some("TestLib".to_string()),
      extrafields: vec!["collection:special".to_string(), "collection:rare".to_string()],
      ..Default::default()
    };
    let builder = builder_with(config_with_source("s", settings), MemoryStore::new());
    let record = record("s.1", "s", serde_json::json!({"fields": {"title": "T"}}));
    let doc = build(&builder, &record).await;
    assert_eq!(doc.get_str("institution"), Some("TestLib"));
    assert_eq!(doc.values_of("collection"), ["special", "rare"]);
  }

  #[tokio::test]
  async fn test_building_prefix_modes() {
    for (mode, expected) in [
      (InstitutionInBuilding::Institution, "TestLib/main"),
      (InstitutionInBuilding::Source, "s/main"),
      (InstitutionInBuilding::InstitutionSource, "TestLib/s/main"),
    ] {
      let settings = DataSourceSettings {
        institution: Some("TestLib".to_string()),
        institution_in_building: mode,
        ..Default::default()
      };
      let builder = builder_with(config_with_source("s", settings), MemoryStore::new());
      let record = record("s.1", "s", serde_json::json!({"fields": {"title": "T", "building": "main"}}));
      let doc = build(&builder, &record).await;
      assert_eq!(doc.values_of("building"), [expected], "mode {mode:?}");
    }
  }

  #[tokio::test]
  async fn test_building_initialized_when_absent() {
    let settings = DataSourceSettings {
      institution: Some("TestLib".to_string()),
      institution_in_building: InstitutionInBuilding::Institution,
      ..Default::default()
    };
    let builder = builder_with(config_with_source("s", settings), MemoryStore::new());
    let record = record("s.1", "s", serde_json::json!({"fields": {"title": "T"}}));
    let doc = build(&builder, &record).await;
    assert_eq!(doc.values_of("building"), ["TestLib"]);
  }

  #[tokio::test]
  async fn test_hierarchical_facet_expansion() {
    let mut config = config_with_source("s", DataSourceSettings::default());
    config.solr.hierarchical_facets = vec!["building".to_string()];
    let builder = builder_with(config, MemoryStore::new());
    let record = record("s.1", "s", serde_json::json!({"fields": {"title": "T", "building": "a/b/c"}}));
    let doc = build(&builder, &record).await;
    assert_eq!(doc.values_of("building"), ["0/a/", "1/a/b/", "2/a/b/c/"]);
  }

  #[tokio::test]
  async fn test_work_keys() {
    let builder = builder_with(
      config_with_source("s", DataSourceSettings::default()),
      MemoryStore::new(),
    );
    let record = record(
      "s.1",
      "s",
      serde_json::json!({
        "fields": {"title": "The Kalevala"},
        "work": {
          "titles": [
            {"value": "Kalevala", "uniform": true},
            {"value": "The Kalevala", "uniform": false}
          ],
          "authors": ["Lönnrot, Elias"]
        }
      }),
    );
    let doc = build(&builder, &record).await;
    let keys = doc.values_of("work_keys_str_mv");
    assert!(keys.contains(&"UT kalevala".to_string()));
    assert!(keys.contains(&"AT lönnrotelias thekalevala".to_string()));
  }

  #[tokio::test]
  async fn test_dedup_id_field_set() {
    let builder = builder_with(
      config_with_source("s", DataSourceSettings::default()),
      MemoryStore::new(),
    );
    let record = record("s.1", "s", serde_json::json!({"fields": {"title": "T"}}));
    let group = DedupGroup {
      id: "D1".to_string(),
      record_ids: vec!["s.1".to_string()],
      deleted: false,
      updated: Utc::now(),
    };
    let doc = match builder.build_document(&record, Some(&group)).await.unwrap() {
      BuildOutcome::Document { doc, .. } => doc,
      BuildOutcome::Skip => panic!("expected a document"),
    };
    assert_eq!(doc.get_str("dedup_id_str_mv"), Some("D1"));
  }

  #[tokio::test]
  async fn test_format_in_allfields() {
    let mut config = config_with_source("s", DataSourceSettings::default());
    config.solr.format_in_allfields = true;
    let builder = builder_with(config, MemoryStore::new());
    let record = record(
      "s.1",
      "s",
      serde_json::json!({"format": "Book3D", "fields": {"title": "T", "format": "Book3D"}}),
    );
    let doc = build(&builder, &record).await;
    assert!(doc.values_of("allfields").contains(&"bookdxd".to_string()));
  }

  #[test]
  fn test_searchable_format() {
    assert_eq!(searchable_format("Book"), "book");
    assert_eq!(searchable_format("3D Object"), "dxdobject");
    assert_eq!(searchable_format("Map 1:50000"), "mapbxfxaxaxaxax");
  }

  #[test]
  fn test_expand_hierarchical() {
    assert_eq!(expand_hierarchical("a/b/c"), ["0/a/", "1/a/b/", "2/a/b/c/"]);
    assert_eq!(expand_hierarchical("solo"), ["0/solo/"]);
  }

  #[test]
  fn test_work_key_normalization_idempotent() {
    let data = bibdex_core::WorkIdentificationData {
      titles: vec![WorkTitle {
        value: "Sïmple Title!".into(),
        uniform: true,
      }],
      authors: vec!["Author".into()],
      ..Default::default()
    };
    let keys = work_keys(&data);
    assert_eq!(keys, ["UT sïmpletitle"]);
    // normalizing the key again changes nothing
    assert_eq!(normalize_key("sïmpletitle"), "sïmpletitle");
  }
}
