//! Source selection parsing for `--source`.

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
  #[error("invalid exclusion regex '{pattern}': {message}")]
  BadRegex { pattern: String, message: String },
}

/// Parsed `--source` specification: comma-separated source ids, a `-` prefix
/// excludes, `-/regex/` excludes by pattern. With no includes, everything not
/// excluded matches.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
  includes: Vec<String>,
  excludes: Vec<String>,
  exclude_patterns: Vec<Regex>,
}

impl SourceFilter {
  pub fn parse(spec: &str) -> Result<Self, FilterError> {
    let mut filter = SourceFilter::default();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
      if let Some(exclusion) = part.strip_prefix('-') {
        if let Some(pattern) = exclusion.strip_prefix('/').and_then(|p| p.strip_suffix('/')) {
          let regex = Regex::new(pattern).map_err(|e| FilterError::BadRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
          })?;
          filter.exclude_patterns.push(regex);
        } else {
          filter.excludes.push(exclusion.to_string());
        }
      } else {
        filter.includes.push(part.to_string());
      }
    }
    Ok(filter)
  }

  pub fn matches(&self, source_id: &str) -> bool {
    if self.excludes.iter().any(|e| e == source_id) {
      return false;
    }
    if self.exclude_patterns.iter().any(|p| p.is_match(source_id)) {
      return false;
    }
    self.includes.is_empty() || self.includes.iter().any(|i| i == source_id)
  }

  /// Explicitly included source ids, exclusions notwithstanding.
  pub fn included(&self) -> &[String] {
    &self.includes
  }

  pub fn is_empty(&self) -> bool {
    self.includes.is_empty() && self.excludes.is_empty() && self.exclude_patterns.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_include_exclude_regex() {
    let filter = SourceFilter::parse("sA,-sB,-/^test_.*/").unwrap();
    assert!(filter.matches("sA"));
    assert!(!filter.matches("sB"));
    assert!(!filter.matches("test_acme"));
    // not in the include list
    assert!(!filter.matches("sC"));
  }

  #[test]
  fn test_exclusion_only() {
    let filter = SourceFilter::parse("-sB").unwrap();
    assert!(filter.matches("sA"));
    assert!(!filter.matches("sB"));
  }

  #[test]
  fn test_empty_matches_all() {
    let filter = SourceFilter::parse("").unwrap();
    assert!(filter.is_empty());
    assert!(filter.matches("anything"));
  }

  #[test]
  fn test_bad_regex() {
    assert!(SourceFilter::parse("-/(/").is_err());
  }
}
