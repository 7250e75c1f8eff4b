//! Namespace/name identity used as the unit of work.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a queue entry cannot be split into a key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("unexpected key format: {0:?}")]
    Format(String),
    #[error("key has an empty name: {0:?}")]
    EmptyName(String),
}

/// `(namespace, name)` pair addressing both a Service and its Ingress.
///
/// The wire form is `"<namespace>/<name>"`. A bare `"<name>"` is a
/// cluster-scoped key and parses with an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Queue representation of this key.
    pub fn encode(&self) -> String { self.to_string() }

    pub fn is_cluster_scoped(&self) -> bool { self.namespace.is_empty() }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ResourceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let (namespace, name) = match parts.as_slice() {
            [name] => ("", *name),
            [namespace, name] => (*namespace, *name),
            _ => return Err(KeyError::Format(s.to_string())),
        };
        if name.is_empty() {
            return Err(KeyError::EmptyName(s.to_string()));
        }
        Ok(Self::new(namespace, name))
    }
}
