//! Store configuration

use crate::tags::DEFAULT_TAG_HISTORY_LIMIT;
use crate::Result;
use serde::{Deserialize, Serialize};

/// How the store assigns a uid when the caller does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UidStrategy {
    /// Random UUID v4
    Random,
    /// blake3 digest of the record's JSON, so identical content yields the
    /// same uid (and re-storing it is an upsert)
    #[default]
    ContentHash,
}

impl UidStrategy {
    /// Produce a uid for `record`.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the record cannot be encoded.
    pub fn generate<T: Serialize>(&self, record: &T) -> Result<String> {
        Ok(match self {
            Self::Random => uuid::Uuid::new_v4().simple().to_string(),
            Self::ContentHash => {
                let bytes = serde_json::to_vec(record)?;
                blake3::hash(&bytes).to_hex()[..32].to_string()
            }
        })
    }
}

/// Store-wide settings.
///
/// Deserializes with defaults for any missing field:
///
/// ```rust
/// use mlmeta::config::{StoreConfig, UidStrategy};
///
/// let config = StoreConfig::from_json(r#"{"default_project": "vision"}"#).unwrap();
/// assert_eq!(config.default_project, "vision");
/// assert_eq!(config.default_tag, "latest");
/// assert_eq!(config.uid_strategy, UidStrategy::ContentHash);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Project used when a call passes `""`
    pub default_project: String,
    /// Tag assigned on store and resolved on read when a call passes `""`
    pub default_tag: String,
    /// Uid assignment for records stored without one
    pub uid_strategy: UidStrategy,
    /// Past assignments remembered per tag
    pub tag_history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_project: "default".to_string(),
            default_tag: "latest".to_string(),
            uid_strategy: UidStrategy::default(),
            tag_history_limit: DEFAULT_TAG_HISTORY_LIMIT,
        }
    }
}

impl StoreConfig {
    /// Parse a JSON document; absent fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// `project`, or the default project when blank.
    #[must_use]
    pub fn project<'a>(&'a self, project: &'a str) -> &'a str {
        if project.is_empty() {
            &self.default_project
        } else {
            project
        }
    }

    /// `tag`, or the default tag when blank.
    #[must_use]
    pub fn tag<'a>(&'a self, tag: &'a str) -> &'a str {
        if tag.is_empty() {
            &self.default_tag
        } else {
            tag
        }
    }
}
