//! Portico kubehub: the Kubernetes side of the controller.
//!
//! Reflector-backed [`ReflectorCache`], the [`KubeIngressStore`] that writes
//! Ingresses, and the [`Watchers`] that feed notifications to the dispatcher.

#![forbid(unsafe_code)]

pub mod cache;
pub mod convert;
pub mod store;
pub mod watch;

use anyhow::{Context, Result};
use kube::Client;

pub use cache::ReflectorCache;
pub use store::KubeIngressStore;
pub use watch::{IngressTracker, ServiceTracker, Tracker, Watchers};

/// Client from the ambient kubeconfig or in-cluster service account.
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client (kubeconfig or in-cluster)")
}
