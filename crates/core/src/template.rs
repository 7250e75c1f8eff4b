//! The canonical Ingress, parameterized only by namespace and name.

use crate::{DerivedResource, DerivedSpec, ResourceKey, SourceResource};

pub const HOST: &str = "example.com";
pub const PATH: &str = "/";
pub const BACKEND_PORT: u16 = 80;

/// Spec routing every path under [`HOST`] to the Service of the same name.
pub fn canonical_spec(name: &str) -> DerivedSpec {
    DerivedSpec {
        name: name.to_string(),
        host: HOST.to_string(),
        path: PATH.to_string(),
        backend_service: name.to_string(),
        backend_port: BACKEND_PORT,
    }
}

/// Object to create for `key` when no source object is at hand (no owner reference).
pub fn derived_for_key(key: &ResourceKey) -> DerivedResource {
    DerivedResource { namespace: key.namespace.clone(), spec: canonical_spec(&key.name), owners: Vec::new() }
}

/// Object to create for `source`, owned by it.
pub fn derived_for(source: &SourceResource) -> DerivedResource {
    DerivedResource {
        namespace: source.namespace.clone(),
        spec: canonical_spec(&source.name),
        owners: source.owner_ref().into_iter().collect(),
    }
}
