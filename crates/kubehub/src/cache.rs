use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{ObjectRef, Store};
use portico_core::{Cache, CacheError, DerivedResource, ResourceKey, SourceResource};

use crate::convert::{derived_from_ingress, source_from_service};

/// [`Cache`] backed by the reflector stores the watchers keep up to date.
#[derive(Clone)]
pub struct ReflectorCache {
    services: Store<Service>,
    ingresses: Store<Ingress>,
}

impl ReflectorCache {
    pub fn new(services: Store<Service>, ingresses: Store<Ingress>) -> Self { Self { services, ingresses } }
}

fn object_ref<K>(key: &ResourceKey) -> ObjectRef<K>
where
    K: kube::Resource,
    K::DynamicType: Default,
{
    let r = ObjectRef::new(&key.name);
    if key.is_cluster_scoped() { r } else { r.within(&key.namespace) }
}

impl Cache for ReflectorCache {
    fn get_source(&self, key: &ResourceKey) -> Result<Option<SourceResource>, CacheError> {
        Ok(self.services.get(&object_ref(key)).and_then(|svc| source_from_service(&svc)))
    }

    fn get_derived(&self, key: &ResourceKey) -> Result<Option<DerivedResource>, CacheError> {
        Ok(self.ingresses.get(&object_ref(key)).and_then(|ing| derived_from_ingress(&ing)))
    }
}
