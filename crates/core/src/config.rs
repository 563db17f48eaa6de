//! Configuration for the indexing pipeline.
//!
//! Two TOML files drive a deployment: the main `bibdex.toml` (Solr section,
//! worker counts, merge field classes) and `datasources.toml` with one table
//! per data source. Both deserialize with serde defaults so a minimal file
//! stays minimal.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::normalize::NormalizationForm;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("TOML parse error: {0}")]
  Parse(#[from] toml::de::Error),
}

/// How component parts of a host record are treated at index time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComponentParts {
  /// Merge into the host unless the host is a journal.
  #[default]
  AsIs,
  /// Always merge into the host.
  MergeAll,
  /// Merge into the host unless the host is an electronic journal.
  MergeNonEarticles,
}

/// Which institution code is prepended to building facet values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionInBuilding {
  Institution,
  /// The record's metadata format tag.
  Driver,
  #[default]
  None,
  Source,
  #[serde(rename = "institution/source")]
  InstitutionSource,
}

/// Per-source settings, keyed by source id in `datasources.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceSettings {
  pub institution: Option<String>,
  pub component_parts: ComponentParts,
  /// Sources searched for component parts; defaults to the record's own source.
  pub component_part_source_id: Vec<String>,
  /// Whether hidden component parts are still indexed standalone.
  pub index_merged_parts: bool,
  pub pre_transformation: Option<String>,
  pub normalization: Option<String>,
  /// Stylesheet producing the whole Solr document; bypasses the native transform.
  pub solr_transformation: Option<String>,
  /// Prefix substituted for the source part of record ids; defaults to the source id.
  pub id_prefix: Option<String>,
  pub index_unprefixed_ids: bool,
  pub dedup: bool,
  /// `false` hides the source from indexing entirely.
  pub index: bool,
  pub institution_in_building: InstitutionInBuilding,
  pub add_institution_to_building_before_mapping: bool,
  /// `name:value` entries merged into every document.
  pub extrafields: Vec<String>,
  pub enrichments: Vec<String>,
}

impl Default for DataSourceSettings {
  fn default() -> Self {
    Self {
      institution: None,
      component_parts: ComponentParts::default(),
      component_part_source_id: Vec::new(),
      index_merged_parts: true,
      pre_transformation: None,
      normalization: None,
      solr_transformation: None,
      id_prefix: None,
      index_unprefixed_ids: false,
      dedup: false,
      index: true,
      institution_in_building: InstitutionInBuilding::default(),
      add_institution_to_building_before_mapping: false,
      extrafields: Vec::new(),
      enrichments: Vec::new(),
    }
  }
}

/// Solr field names that deployments override for schema differences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolrFieldNames {
  pub dedup_id: String,
  pub container_title: String,
  pub container_volume: String,
  pub container_issue: String,
  pub container_start_page: String,
  pub container_reference: String,
  pub hierarchy_top_id: String,
  pub hierarchy_top_title: String,
  pub hierarchy_parent_id: String,
  pub hierarchy_parent_title: String,
  pub is_hierarchy_id: String,
  pub is_hierarchy_title: String,
  pub work_keys: String,
}

impl Default for SolrFieldNames {
  fn default() -> Self {
    Self {
      dedup_id: "dedup_id_str_mv".into(),
      container_title: "container_title".into(),
      container_volume: "container_volume".into(),
      container_issue: "container_issue".into(),
      container_start_page: "container_start_page".into(),
      container_reference: "container_reference".into(),
      hierarchy_top_id: "hierarchy_top_id".into(),
      hierarchy_top_title: "hierarchy_top_title".into(),
      hierarchy_parent_id: "hierarchy_parent_id".into(),
      hierarchy_parent_title: "hierarchy_parent_title".into(),
      is_hierarchy_id: "is_hierarchy_id".into(),
      is_hierarchy_title: "is_hierarchy_title".into(),
      work_keys: "work_keys_str_mv".into(),
    }
  }
}

/// The `[solr]` section of the main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolrConfig {
  pub update_url: String,
  pub search_url: String,
  pub admin_url: Option<String>,
  pub username: Option<String>,
  pub password: Option<String>,

  /// Records between explicit commits.
  pub max_commit_interval: usize,
  /// Documents per update batch.
  pub max_update_records: usize,
  /// Update batch size limit in KiB.
  pub max_update_size: usize,
  pub max_update_tries: u32,
  /// Fixed wait between retries, seconds.
  pub update_retry_wait: u64,

  pub record_workers: usize,
  pub solr_update_workers: usize,
  /// Run the merged stream as a sibling task alongside the single stream.
  pub threaded_merged_record_update: bool,
  /// SolrCloud state probe cache, seconds; 0 disables the gate.
  pub cluster_state_check_interval: i64,
  /// Keep one checkpoint per update URL instead of a shared one.
  pub track_updates_per_update_url: bool,

  pub unicode_normalization_form: NormalizationForm,

  /// Fields whose values are unioned across merged children. An entry of the
  /// form `author=author2` redirects differing values into the alias field.
  pub merged_fields: Vec<String>,
  /// Fields where the highest-scoring child wins.
  pub single_fields: Vec<String>,
  /// Fields counted and caps-checked when scoring merge candidates.
  pub scored_fields: Vec<String>,
  pub building_fields: Vec<String>,
  pub hierarchical_facets: Vec<String>,
  /// Merged-record fields copied back onto each child.
  pub copy_from_merged_record: Vec<String>,
  pub journal_formats: Vec<String>,
  pub ejournal_formats: Vec<String>,
  /// Field receiving processing warnings; unset drops them.
  pub warnings_field: Option<String>,
  pub format_in_allfields: bool,
  /// Fields excluded from compare-mode diffs, in addition to the built-ins.
  pub ignore_in_comparison: Vec<String>,

  pub fields: SolrFieldNames,
}

impl Default for SolrConfig {
  fn default() -> Self {
    Self {
      update_url: "http://localhost:8983/solr/biblio/update".into(),
      search_url: "http://localhost:8983/solr/biblio/select".into(),
      admin_url: None,
      username: None,
      password: None,
      max_commit_interval: 50_000,
      max_update_records: 5_000,
      max_update_size: 1_024,
      max_update_tries: 15,
      update_retry_wait: 60,
      record_workers: 0,
      solr_update_workers: 0,
      threaded_merged_record_update: false,
      cluster_state_check_interval: 45,
      track_updates_per_update_url: false,
      unicode_normalization_form: NormalizationForm::default(),
      merged_fields: vec![
        "institution".into(),
        "collection".into(),
        "building".into(),
        "language".into(),
        "physical".into(),
        "publisher".into(),
        "publish_date".into(),
        "contents".into(),
        "url".into(),
        "ctrlnum".into(),
        "author2".into(),
        "author_additional".into(),
        "title_alt".into(),
        "title_old".into(),
        "title_new".into(),
        "dateSpan".into(),
        "series".into(),
        "series2".into(),
        "topic".into(),
        "genre".into(),
        "geographic".into(),
        "era".into(),
        "long_lat".into(),
      ],
      single_fields: vec![
        "title".into(),
        "title_short".into(),
        "title_full".into(),
        "title_sort".into(),
        "author".into(),
        "author_sort".into(),
        "format".into(),
        "publish_date_sort".into(),
        "callnumber_first".into(),
        "callnumber_raw".into(),
        "callnumber_sort".into(),
      ],
      scored_fields: vec![
        "author".into(),
        "author2".into(),
        "publisher".into(),
        "series".into(),
        "topic".into(),
        "contents".into(),
        "url".into(),
      ],
      building_fields: vec!["building".into()],
      hierarchical_facets: Vec::new(),
      copy_from_merged_record: Vec::new(),
      journal_formats: vec!["Journal".into(), "Serial".into(), "eJournal".into()],
      ejournal_formats: vec!["eJournal".into()],
      warnings_field: None,
      format_in_allfields: false,
      ignore_in_comparison: Vec::new(),
      fields: SolrFieldNames::default(),
    }
  }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub solr: SolrConfig,
  /// Enrichers applied to every source, ahead of per-source ones.
  pub enrichments: Vec<String>,
  #[serde(skip)]
  pub sources: HashMap<String, DataSourceSettings>,
}

/// Wrapper matching the `[sources.<id>]` layout of `datasources.toml`.
#[derive(Debug, Default, Deserialize)]
struct DataSourcesFile {
  #[serde(default)]
  sources: HashMap<String, DataSourceSettings>,
}

impl Config {
  /// Load the main config and, when present, the datasources file next to it.
  pub fn load(main: &Path, datasources: Option<&Path>) -> Result<Self, ConfigError> {
    let mut config: Config = toml::from_str(&std::fs::read_to_string(main)?)?;
    if let Some(path) = datasources {
      let file: DataSourcesFile = toml::from_str(&std::fs::read_to_string(path)?)?;
      config.sources = file.sources;
    }
    Ok(config)
  }

  /// Settings for a source; `None` for sources the config does not know.
  pub fn source_settings(&self, source_id: &str) -> Option<&DataSourceSettings> {
    self.sources.get(source_id)
  }

  /// Source ids with `index = false`, dropped silently from dedup groups.
  pub fn non_indexed_sources(&self) -> Vec<String> {
    let mut ids: Vec<String> = self
      .sources
      .iter()
      .filter(|(_, s)| !s.index)
      .map(|(id, _)| id.clone())
      .collect();
    ids.sort();
    ids
  }
}
