//! Labels and label predicates

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Label mapping attached to an entity. Values are opaque strings.
pub type Labels = BTreeMap<String, String>;

/// A single label filter.
///
/// `key` tests presence, `key=value` tests equality. Sets of predicates are
/// combined with AND.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LabelPredicate {
    /// Label key is present with any value
    Exists(String),
    /// Label key is present with exactly this value
    Equals(String, String),
}

impl LabelPredicate {
    /// Presence predicate.
    #[must_use]
    pub fn exists(key: impl Into<String>) -> Self {
        Self::Exists(key.into())
    }

    /// Equality predicate.
    #[must_use]
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals(key.into(), value.into())
    }

    /// Parse `key` or `key=value`.
    ///
    /// Only the first `=` splits; the value may itself contain `=`. The key
    /// is trimmed, the value is taken verbatim.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` when the key is empty.
    pub fn parse(text: &str) -> Result<Self> {
        let (key, value) = match text.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value)),
            None => (text.trim(), None),
        };
        if key.is_empty() {
            return Err(Error::InvalidFilter(format!(
                "label predicate {text:?} has an empty key"
            )));
        }
        Ok(match value {
            Some(value) => Self::equals(key, value),
            None => Self::exists(key),
        })
    }

    /// Parse a comma-separated predicate list. Blank input yields no predicates.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` if any element is malformed.
    pub fn parse_list(text: &str) -> Result<Vec<Self>> {
        text.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Equality predicates for every pair of a label mapping.
    #[must_use]
    pub fn from_labels(labels: &Labels) -> Vec<Self> {
        labels
            .iter()
            .map(|(key, value)| Self::equals(key.as_str(), value.as_str()))
            .collect()
    }

    /// Key this predicate tests.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Exists(key) | Self::Equals(key, _) => key,
        }
    }

    /// Reject predicates that could never have been produced by `parse`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` for an empty key.
    pub fn validate(&self) -> Result<()> {
        if self.key().trim().is_empty() {
            return Err(Error::InvalidFilter(format!(
                "label predicate {self} has an empty key"
            )));
        }
        Ok(())
    }

    /// Whether `labels` satisfies this predicate.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        match self {
            Self::Exists(key) => labels.contains_key(key),
            Self::Equals(key, value) => labels.get(key) == Some(value),
        }
    }

    /// Whether `labels` satisfies every predicate.
    #[must_use]
    pub fn all_match(predicates: &[Self], labels: &Labels) -> bool {
        predicates.iter().all(|p| p.matches(labels))
    }
}

impl fmt::Display for LabelPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists(key) => write!(f, "{key}"),
            Self::Equals(key, value) => write!(f, "{key}={value}"),
        }
    }
}

impl std::str::FromStr for LabelPredicate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
