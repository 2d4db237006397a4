//! Processor configuration types.
//!
//! These types are deserialized directly from Figment configuration (the `processor`
//! section of the application config).
//!
//! | Key | Default | Effect |
//! |-----|---------|--------|
//! | `id_strategy` | `required` | How entity ids are built when key values are missing |
//! | `max_top` | none | Upper bound applied to `$top` |
//! | `stable_paging` | `true` | Order by the result keys when paging without `$orderby` |
//! | `search_min_length` | `1` | Shortest accepted `$search` term |

use serde::{Deserialize, Serialize};

/// How an entity id is produced when key values are missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Missing key values are a client error.
    #[default]
    Required,
    /// Missing key values produce an entity without id.
    Nullable,
    /// Ids are generated from a timestamp and a random UUID.
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub id_strategy: IdStrategy,
    #[serde(default)]
    pub max_top: Option<u64>,
    #[serde(default = "default_true")]
    pub stable_paging: bool,
    #[serde(default = "default_search_min_length")]
    pub search_min_length: usize,
}

fn default_true() -> bool {
    true
}

fn default_search_min_length() -> usize {
    1
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            id_strategy: IdStrategy::default(),
            max_top: None,
            stable_paging: true,
            search_min_length: default_search_min_length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults_and_overrides() {
        let cfg: ProcessorConfig = serde_yaml::from_str("id_strategy: generated\nmax_top: 500\n").unwrap();
        assert_eq!(cfg.id_strategy, IdStrategy::Generated);
        assert_eq!(cfg.max_top, Some(500));
        assert!(cfg.stable_paging);
        assert_eq!(cfg.search_min_length, 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = serde_yaml::from_str::<ProcessorConfig>("page_size: 10\n").unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }
}
