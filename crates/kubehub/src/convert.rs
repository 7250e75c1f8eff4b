//! Mapping between k8s-openapi objects and the controller's models.

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use portico_core::{DerivedResource, DerivedSpec, OwnerRef, SourceResource};

pub const PATH_TYPE_PREFIX: &str = "Prefix";

/// `None` for objects without a name (never the case for objects from the API server).
pub fn source_from_service(svc: &Service) -> Option<SourceResource> {
    let meta = &svc.metadata;
    Some(SourceResource {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone()?,
        uid: meta.uid.clone(),
        annotations: meta.annotations.clone().unwrap_or_default(),
    })
}

/// Read an Ingress back. Only the first rule/path is looked at; fields the
/// canonical template does not use are ignored.
pub fn derived_from_ingress(ing: &Ingress) -> Option<DerivedResource> {
    let meta = &ing.metadata;
    let name = meta.name.clone()?;
    let rule = ing.spec.as_ref().and_then(|s| s.rules.as_ref()).and_then(|r| r.first());
    let path = rule.and_then(|r| r.http.as_ref()).and_then(|h| h.paths.first());
    let backend = path.and_then(|p| p.backend.service.as_ref());
    Some(DerivedResource {
        namespace: meta.namespace.clone().unwrap_or_default(),
        spec: DerivedSpec {
            name,
            host: rule.and_then(|r| r.host.clone()).unwrap_or_default(),
            path: path.and_then(|p| p.path.clone()).unwrap_or_default(),
            backend_service: backend.map(|b| b.name.clone()).unwrap_or_default(),
            backend_port: backend
                .and_then(|b| b.port.as_ref())
                .and_then(|p| p.number)
                .and_then(|n| u16::try_from(n).ok())
                .unwrap_or(0),
        },
        owners: meta.owner_references.iter().flatten().map(owner_from_k8s).collect(),
    })
}

pub fn ingress_from_derived(d: &DerivedResource) -> Ingress {
    let spec = &d.spec;
    Ingress {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(d.namespace.clone()),
            owner_references: (!d.owners.is_empty()).then(|| d.owners.iter().map(owner_to_k8s).collect()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(spec.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(spec.path.clone()),
                        path_type: PATH_TYPE_PREFIX.to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: spec.backend_service.clone(),
                                port: Some(ServiceBackendPort { number: Some(i32::from(spec.backend_port)), name: None }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn owner_from_k8s(o: &OwnerReference) -> OwnerRef {
    OwnerRef {
        api_version: o.api_version.clone(),
        kind: o.kind.clone(),
        name: o.name.clone(),
        uid: o.uid.clone(),
        controller: o.controller.unwrap_or(false),
    }
}

fn owner_to_k8s(o: &OwnerRef) -> OwnerReference {
    OwnerReference {
        api_version: o.api_version.clone(),
        kind: o.kind.clone(),
        name: o.name.clone(),
        uid: o.uid.clone(),
        controller: Some(o.controller),
        block_owner_deletion: Some(o.controller),
    }
}

/// Service fixture used by tests across the crate.
#[cfg(test)]
pub(crate) fn test_service(ns: &str, name: &str, annotations: &[(&str, &str)]) -> Service {
    let annotations: std::collections::BTreeMap<String, String> =
        annotations.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            uid: Some(format!("uid-{}", name)),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        ..Default::default()
    }
}
