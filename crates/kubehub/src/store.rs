use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use portico_core::{DerivedResource, DerivedStore, StoreError};
use tracing::debug;

use crate::convert::ingress_from_derived;

/// [`DerivedStore`] writing Ingresses through the API server.
#[derive(Clone)]
pub struct KubeIngressStore {
    client: Client,
}

impl KubeIngressStore {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, namespace: &str) -> Api<Ingress> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

/// Map a kube error onto the store's taxonomy. 409 and 404 get their own
/// variants so the reconciler can treat them as already converged.
pub fn map_kube_error(err: kube::Error, what: &str) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => StoreError::AlreadyExists(what.to_string()),
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(what.to_string()),
        kube::Error::Api(ae) => StoreError::Api { code: ae.code, message: ae.message },
        other => StoreError::Transport(other.to_string()),
    }
}

#[async_trait]
impl DerivedStore for KubeIngressStore {
    async fn create_derived(&self, namespace: &str, derived: &DerivedResource) -> Result<(), StoreError> {
        let what = format!("{}/{}", namespace, derived.name());
        let ing = ingress_from_derived(derived);
        self.api(namespace)
            .create(&PostParams::default(), &ing)
            .await
            .map_err(|e| map_kube_error(e, &what))?;
        debug!(ingress = %what, "created");
        Ok(())
    }

    async fn delete_derived(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let what = format!("{}/{}", namespace, name);
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, &what))?;
        debug!(ingress = %what, "deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_err(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("code {}", code),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn conflict_and_missing_get_dedicated_variants() {
        assert_eq!(map_kube_error(api_err(409), "ns/web"), StoreError::AlreadyExists("ns/web".into()));
        assert_eq!(map_kube_error(api_err(404), "ns/web"), StoreError::NotFound("ns/web".into()));
        assert_eq!(
            map_kube_error(api_err(500), "ns/web"),
            StoreError::Api { code: 500, message: "code 500".into() }
        );
    }

    #[test]
    fn non_api_errors_are_transport() {
        let err = kube::Error::LinesCodecMaxLineLengthExceeded;
        assert!(matches!(map_kube_error(err, "ns/web"), StoreError::Transport(_)));
    }
}
