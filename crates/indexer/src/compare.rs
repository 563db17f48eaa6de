//! Compare mode: diff freshly built documents against the live index.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bibdex_core::SolrDocument;
use bibdex_solr::SolrTransport;
use tracing::warn;

use crate::error::IndexError;

const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Fields that never diff meaningfully: derived, analyzer-side, or
/// bookkeeping values.
fn always_ignored(field: &str) -> bool {
  matches!(
    field,
    "allfields" | "first_indexed" | "last_indexed" | "fullrecord" | "score" | "_version_"
  ) || field.ends_with("_unstemmed")
    || field.ends_with("Str")
    || field.ends_with("Str_mv")
    || field.starts_with("spelling")
}

/// Writes per-field `--- existing` / `+++ new` lines for each changed record.
pub struct CompareWriter {
  transport: Arc<dyn SolrTransport>,
  search_url: String,
  ignored: Vec<String>,
  output: Box<dyn Write + Send>,
}

impl CompareWriter {
  pub fn new(
    transport: Arc<dyn SolrTransport>,
    search_url: impl Into<String>,
    ignored: Vec<String>,
    destination: &str,
  ) -> Result<Self, IndexError> {
    let output: Box<dyn Write + Send> = if destination == "-" {
      Box::new(std::io::stdout())
    } else {
      Box::new(std::fs::File::create(destination)?)
    };
    Ok(Self {
      transport,
      search_url: search_url.into(),
      ignored,
      output,
    })
  }

  /// Fetch the indexed document and write the field differences.
  pub async fn compare(&mut self, doc: &SolrDocument) -> Result<(), IndexError> {
    let Some(id) = doc.get_str("id") else {
      warn!("Document without id in comparison");
      return Ok(());
    };
    let url = format!("{}?q=id:%22{}%22&wt=json", self.search_url, url_encode(id));
    let response = self.transport.get_json(&url, READ_TIMEOUT).await.map_err(IndexError::Solr)?;
    let existing: SolrDocument = response
      .get("response")
      .and_then(|r| r.get("docs"))
      .and_then(|d| d.get(0))
      .map(|d| serde_json::from_value(d.clone()))
      .transpose()?
      .unwrap_or_default();

    let diff = self.diff(&existing, doc);
    if !diff.is_empty() {
      writeln!(self.output, "Record {id}:")?;
      self.output.write_all(diff.as_bytes())?;
    }
    Ok(())
  }

  fn diff(&self, existing: &SolrDocument, new: &SolrDocument) -> String {
    let mut fields: Vec<&String> = existing.field_names().chain(new.field_names()).collect();
    fields.sort();
    fields.dedup();

    let mut out = String::new();
    for field in fields {
      if always_ignored(field) || self.ignored.iter().any(|i| i == field) {
        continue;
      }
      let old_values = existing.values_of(field);
      let new_values = new.values_of(field);
      if old_values != new_values {
        if !old_values.is_empty() {
          out.push_str(&format!("--- {field}: {}\n", old_values.join(", ")));
        }
        if !new_values.is_empty() {
          out.push_str(&format!("+++ {field}: {}\n", new_values.join(", ")));
        }
      }
    }
    out
  }
}

/// Minimal query-string escaping for ids and cursor marks.
pub fn url_encode(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for c in value.chars() {
    match c {
      '+' => out.push_str("%2B"),
      '/' => out.push_str("%2F"),
      '=' => out.push_str("%3D"),
      '&' => out.push_str("%26"),
      '#' => out.push_str("%23"),
      '%' => out.push_str("%25"),
      ' ' => out.push_str("%20"),
      _ => out.push(c),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_always_ignored() {
    assert!(always_ignored("allfields"));
    assert!(always_ignored("title_unstemmed"));
    assert!(always_ignored("spellingShingle"));
    assert!(always_ignored("titleStr"));
    assert!(always_ignored("_version_"));
    assert!(!always_ignored("title"));
  }

  #[test]
  fn test_url_encode() {
    assert_eq!(url_encode("AoE/cursor+mark="), "AoE%2Fcursor%2Bmark%3D");
    assert_eq!(url_encode("plain.id"), "plain.id");
  }
}
