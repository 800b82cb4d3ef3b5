//! # Properties Module
//!
//! Every provider and every whiteboard runtime is described by a property map:
//! an opaque key → value dictionary delivered by whatever produced the service.
//! The whiteboard only interprets the handful of keys listed in [`keys`]; all
//! other entries are carried through untouched so selector filters can match on
//! them.
//!
//! Values are one of four shapes, mirroring what lifecycle feeds deliver:
//!
//! ```yaml
//! service.id: 42                 # long
//! whiteboard.resource: true      # boolean marker
//! whiteboard.name: hello         # string
//! objectClass: [a.Resource, b]   # list of strings
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known property keys interpreted by the whiteboard.
pub mod keys {
    /// Identity assigned by the producer of a service.
    pub const SERVICE_ID: &str = "service.id";
    /// Ordering between competing providers; higher wins, default 0.
    pub const SERVICE_RANKING: &str = "service.ranking";
    /// Type descriptor override.
    pub const OBJECT_CLASS: &str = "objectClass";
    /// Provider name, unique per kind.
    pub const NAME: &str = "whiteboard.name";
    /// Marks a service as a resource.
    pub const RESOURCE: &str = "whiteboard.resource";
    /// Marks a service as an extension.
    pub const EXTENSION: &str = "whiteboard.extension";
    /// Base path of an application. Its presence marks a service as an application.
    pub const APPLICATION_BASE: &str = "whiteboard.application.base";
    /// Content → application selector.
    pub const APPLICATION_SELECT: &str = "whiteboard.application.select";
    /// Application → content selector.
    pub const CONTENT_SELECT: &str = "whiteboard.content.select";
    /// Extensions a provider requires before it can be bound.
    pub const EXTENSION_SELECT: &str = "whiteboard.extension.select";
    /// Selects the whiteboard runtime a provider wants to be served by.
    pub const WHITEBOARD_TARGET: &str = "whiteboard.target";

    /// Runtime property: the configured whiteboard name.
    pub const RUNTIME_NAME: &str = "whiteboard.runtime.name";
    /// Runtime property: externally reachable base URIs.
    pub const RUNTIME_ENDPOINT: &str = "whiteboard.runtime.endpoint";

    /// Name of the default application.
    pub const DEFAULT_APPLICATION: &str = ".default";
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Long(i64),
    String(String),
    Strings(Vec<String>),
}

impl PropertyValue {
    /// The value as a single string, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Numeric view; strings holding an integer are accepted.
    #[must_use]
    pub fn as_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Long(n) => Some(*n),
            PropertyValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean markers may arrive as real booleans or as the string `"true"`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self {
            PropertyValue::Bool(b) => *b,
            PropertyValue::String(s) => s.trim().eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Every scalar carried by this value, rendered as text.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        match self {
            PropertyValue::Bool(b) => vec![b.to_string()],
            PropertyValue::Long(n) => vec![n.to_string()],
            PropertyValue::String(s) => vec![s.clone()],
            PropertyValue::Strings(v) => v.clone(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Long(n) => write!(f, "{n}"),
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Strings(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Long(value)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::Long(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::Strings(value)
    }
}

/// A property map. Ordered so logs and DTOs render deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<PropertyValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    /// Exact-key lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    /// Case-insensitive key lookup, as used by filter evaluation.
    #[must_use]
    pub fn get_ignore_case(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    #[must_use]
    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(PropertyValue::as_long)
    }

    #[must_use]
    pub fn is_true(&self, key: &str) -> bool {
        self.get(key).is_some_and(PropertyValue::is_true)
    }

    /// All string values for `key`, flattening lists. Empty if absent.
    #[must_use]
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(PropertyValue::String(s)) => vec![s.clone()],
            Some(PropertyValue::Strings(v)) => v.clone(),
            _ => Vec::new(),
        }
    }

    /// `service.ranking`, defaulting to 0.
    #[must_use]
    pub fn ranking(&self) -> i64 {
        self.get_long(keys::SERVICE_RANKING).unwrap_or(0)
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: &Properties) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, PropertyValue)> for Properties {
    fn from_iter<T: IntoIterator<Item = (K, PropertyValue)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_accept_bool_and_string() {
        let props = Properties::new()
            .with(keys::RESOURCE, true)
            .with(keys::EXTENSION, "TRUE");
        assert!(props.is_true(keys::RESOURCE));
        assert!(props.is_true(keys::EXTENSION));
        assert!(!props.is_true(keys::APPLICATION_BASE));
    }

    #[test]
    fn test_ranking_defaults_to_zero() {
        assert_eq!(Properties::new().ranking(), 0);
        let props = Properties::new().with(keys::SERVICE_RANKING, "7");
        assert_eq!(props.ranking(), 7);
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let props = Properties::new().with("ObjectClass", "x.Y");
        assert_eq!(
            props.get_ignore_case("objectclass"),
            Some(&PropertyValue::from("x.Y"))
        );
    }

    #[test]
    fn test_yaml_shapes_deserialize() {
        let yaml = "a: true\nb: 3\nc: text\nd: [x, y]\n";
        let props: Properties = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(props.get("a"), Some(&PropertyValue::Bool(true)));
        assert_eq!(props.get_long("b"), Some(3));
        assert_eq!(props.get_str("c"), Some("text"));
        assert_eq!(props.get_strings("d"), vec!["x".to_string(), "y".to_string()]);
    }
}
