//! Portico core types: resource keys, the Service/Ingress models the
//! reconciler reasons about, and the cache/store seams it talks through.

#![forbid(unsafe_code)]

mod key;
pub mod template;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use key::{KeyError, ResourceKey};

/// Annotation whose presence on a Service requests an Ingress. The value is ignored.
pub const TRIGGER_ANNOTATION: &str = "ingress/http";

// ---- source identity (used for owner references) ----
pub const SOURCE_API_VERSION: &str = "v1";
pub const SOURCE_KIND: &str = "Service";

/// Watched object (a Service), reduced to the fields the controller reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceResource {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub annotations: BTreeMap<String, String>,
}

impl SourceResource {
    pub fn key(&self) -> ResourceKey { ResourceKey::new(self.namespace.clone(), self.name.clone()) }

    /// True when the trigger annotation is present.
    pub fn wants_derived(&self) -> bool { self.annotations.contains_key(TRIGGER_ANNOTATION) }

    /// Controller owner reference pointing back at this Service.
    /// `None` until the object has been persisted and carries a uid.
    pub fn owner_ref(&self) -> Option<OwnerRef> {
        let uid = self.uid.clone()?;
        Some(OwnerRef {
            api_version: SOURCE_API_VERSION.to_string(),
            kind: SOURCE_KIND.to_string(),
            name: self.name.clone(),
            uid,
            controller: true,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: bool,
}

/// Fields of the canonical Ingress. Existence is what converges; these never vary per input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedSpec {
    pub name: String,
    pub host: String,
    pub path: String,
    pub backend_service: String,
    pub backend_port: u16,
}

/// Derived object (an Ingress) as seen in the cache or about to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedResource {
    pub namespace: String,
    pub spec: DerivedSpec,
    pub owners: Vec<OwnerRef>,
}

impl DerivedResource {
    pub fn name(&self) -> &str { &self.spec.name }

    pub fn key(&self) -> ResourceKey { ResourceKey::new(self.namespace.clone(), self.spec.name.clone()) }

    /// The owner reference flagged as managing controller, if any.
    pub fn controller_owner(&self) -> Option<&OwnerRef> {
        self.owners.iter().find(|o| o.controller)
    }

    /// True when the managing controller is a Service, i.e. the object is one of ours.
    pub fn owned_by_source_kind(&self) -> bool {
        self.controller_owner().map(|o| o.kind == SOURCE_KIND).unwrap_or(false)
    }
}

/// Change observed by a watcher, handed to the dispatcher over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    SourceAdded(SourceResource),
    SourceUpdated { old: SourceResource, new: SourceResource },
    DerivedDeleted(DerivedResource),
}

// ---- seams ----

/// Failure reading the local cache. Absence is `Ok(None)`, never an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Failure returned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
}

/// Synchronous reads against the eventually-consistent local mirror.
pub trait Cache: Send + Sync {
    fn get_source(&self, key: &ResourceKey) -> Result<Option<SourceResource>, CacheError>;
    fn get_derived(&self, key: &ResourceKey) -> Result<Option<DerivedResource>, CacheError>;
}

/// Mutations against the authoritative remote store.
#[async_trait]
pub trait DerivedStore: Send + Sync {
    async fn create_derived(&self, namespace: &str, derived: &DerivedResource) -> Result<(), StoreError>;
    async fn delete_derived(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(annotations: &[(&str, &str)], uid: Option<&str>) -> SourceResource {
        SourceResource {
            namespace: "ns".into(),
            name: "web".into(),
            uid: uid.map(|s| s.to_string()),
            annotations: annotations.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn trigger_value_is_ignored() {
        assert!(svc(&[(TRIGGER_ANNOTATION, "")], None).wants_derived());
        assert!(svc(&[(TRIGGER_ANNOTATION, "false")], None).wants_derived());
        assert!(!svc(&[("ingress/https", "true")], None).wants_derived());
    }

    #[test]
    fn owner_ref_requires_uid() {
        assert!(svc(&[], None).owner_ref().is_none());
        let o = svc(&[], Some("1234")).owner_ref().expect("owner");
        assert_eq!(o.kind, SOURCE_KIND);
        assert_eq!(o.name, "web");
        assert!(o.controller);
    }

    #[test]
    fn only_controller_owner_counts() {
        let mut d = template::derived_for(&svc(&[], Some("u1")));
        assert!(d.owned_by_source_kind());

        d.owners[0].controller = false;
        assert!(!d.owned_by_source_kind());

        d.owners = vec![OwnerRef {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            name: "web".into(),
            uid: "u2".into(),
            controller: true,
        }];
        assert!(!d.owned_by_source_kind());
    }

    #[test]
    fn derived_model_serializes_with_owner() {
        let d = template::derived_for(&svc(&[(TRIGGER_ANNOTATION, "")], Some("u1")));
        let v = serde_json::to_value(&d).expect("serialize");
        assert_eq!(v["namespace"], "ns");
        assert_eq!(v["spec"]["host"], "example.com");
        assert_eq!(v["spec"]["backend_port"], 80);
        assert_eq!(v["owners"][0]["kind"], "Service");
        let back: DerivedResource = serde_json::from_value(v).expect("deserialize");
        assert_eq!(back, d);
    }
}
