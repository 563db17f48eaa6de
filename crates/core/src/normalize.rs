//! Unicode normalization and key folding.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Unicode normalization form applied to every indexed string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum NormalizationForm {
  None,
  Nfc,
  Nfd,
  #[default]
  Nfkc,
  Nfkd,
}

impl NormalizationForm {
  pub fn apply(&self, value: &str) -> String {
    match self {
      NormalizationForm::None => value.to_string(),
      NormalizationForm::Nfc => value.nfc().collect(),
      NormalizationForm::Nfd => value.nfd().collect(),
      NormalizationForm::Nfkc => value.nfkc().collect(),
      NormalizationForm::Nfkd => value.nfkd().collect(),
    }
  }
}

/// Fold a title or author into a work-key component: compatibility-normalized,
/// lowercased, alphanumerics only. Idempotent.
pub fn normalize_key(value: &str) -> String {
  value
    .nfkc()
    .flat_map(char::to_lowercase)
    .filter(|c| c.is_alphanumeric())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_forms() {
    // U+00E9 vs e + combining acute
    let composed = "caf\u{00e9}";
    let decomposed = "cafe\u{0301}";
    assert_eq!(NormalizationForm::Nfc.apply(decomposed), composed);
    assert_eq!(NormalizationForm::Nfd.apply(composed), decomposed);
    assert_eq!(NormalizationForm::None.apply(decomposed), decomposed);
  }

  #[test]
  fn test_normalize_key() {
    assert_eq!(normalize_key("The Great Gatsby!"), "thegreatgatsby");
    assert_eq!(normalize_key("Tolstoy, Leo (1828-1910)"), "tolstoyleo18281910");
    // idempotent
    let once = normalize_key("Über Äpfel & Birnen");
    assert_eq!(normalize_key(&once), once);
  }
}
