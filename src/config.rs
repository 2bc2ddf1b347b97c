//! UMI handling configuration.
//!
//! Supplied by the embedding application's own configuration layer; the
//! types here only carry the values and their defaults.

use serde::{Deserialize, Serialize};

/// Default delimiter separating the UMI token in read identifiers.
pub const DEFAULT_UMI_DELIMITER: char = ':';

/// Default maximum edit distance for fuzzy UMI matching.
pub const DEFAULT_MAX_EDIT_DISTANCE: usize = 1;

/// Configuration for UMI extraction, correction and clustering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UmiConfig {
    /// Whether UMI-aware collapsing is enabled. When disabled, position
    /// groups pass through the grouper untouched.
    pub enabled: bool,

    /// Delimiter whose last occurrence in a read identifier precedes the
    /// UMI token.
    pub delimiter: char,

    /// Maximum edit distance for fuzzy UMI matching, both against the
    /// defined set and between clusters. UMIs of unequal length never
    /// match, regardless of this value.
    pub max_edit_distance: usize,

    /// Optional reference set of known UMI sequences. When present,
    /// extracted UMIs are corrected to the set; if any read in the run
    /// fails to match, defined-UMI mode is abandoned for the whole run.
    pub defined_umis: Option<Vec<String>>,
}

impl Default for UmiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delimiter: DEFAULT_UMI_DELIMITER,
            max_edit_distance: DEFAULT_MAX_EDIT_DISTANCE,
            defined_umis: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UmiConfig::default();
        assert!(config.enabled);
        assert_eq!(config.delimiter, ':');
        assert_eq!(config.max_edit_distance, 1);
        assert!(config.defined_umis.is_none());
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: UmiConfig = serde_json::from_str(r#"{"max_edit_distance": 2}"#).unwrap();
        assert_eq!(config.max_edit_distance, 2);
        assert!(config.enabled);
    }
}
