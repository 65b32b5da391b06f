//! Object envelope shared by every stored kind

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// API group/version stamped on every stored object
pub const API_VERSION: &str = "canary.dev/v1alpha1";

/// Maximum length of a DNS-1123 label
pub const DNS_LABEL_MAX_LEN: usize = 63;

/// Identity and bookkeeping metadata of a stored object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,

    /// Assigned by the server on create
    #[serde(default)]
    pub uid: Uuid,

    /// Bumped on every write; used for compare-and-swap updates
    #[serde(default)]
    pub resource_version: i64,

    /// Bumped on every spec write
    #[serde(default)]
    pub generation: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// Reference from a dependent record back to the object that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
    #[serde(default)]
    pub controller: bool,
}

/// Namespaced name of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for ObjectKey {
    type Err = String;

    /// Parses `namespace/name`; a bare `name` lands in the `default` namespace
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => ("default", s),
        };

        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(format!("invalid object reference '{}'", s));
        }

        Ok(ObjectKey::new(namespace, name))
    }
}

/// Checks the DNS-1123 label rules: lowercase alphanumerics and '-',
/// at most 63 characters, starting and ending with an alphanumeric.
pub fn is_dns1123_label(value: &str) -> bool {
    if value.is_empty() || value.len() > DNS_LABEL_MAX_LEN {
        return false;
    }

    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    valid_chars && !value.starts_with('-') && !value.ends_with('-')
}
