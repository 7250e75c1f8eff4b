//! One reconcile pass: compare the Service's wish with the Ingress that exists, act on the difference.

use std::fmt;
use std::sync::Arc;

use portico_core::{template, Cache, CacheError, DerivedStore, KeyError, ResourceKey, StoreError};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No Service behind the key; nothing to converge.
    SourceGone,
    Created,
    Deleted,
    /// Already converged, or a concurrent actor got there first.
    Unchanged,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::SourceGone => "source_gone",
            Outcome::Created => "created",
            Outcome::Deleted => "deleted",
            Outcome::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("invalid key {raw:?}: {source}")]
    InvalidKey { raw: String, source: KeyError },
    #[error("cache lookup for {key} failed: {source}")]
    Cache { key: ResourceKey, source: CacheError },
    #[error("creating ingress {key} failed: {source}")]
    Create { key: ResourceKey, source: StoreError },
    #[error("deleting ingress {key} failed: {source}")]
    Delete { key: ResourceKey, source: StoreError },
    #[error("reconcile of {raw:?} panicked: {message}")]
    Panicked { raw: String, message: String },
}

impl ReconcileError {
    /// Malformed keys can never succeed; everything else may on a later attempt.
    pub fn is_retryable(&self) -> bool { !matches!(self, ReconcileError::InvalidKey { .. }) }
}

pub struct Reconciler {
    cache: Arc<dyn Cache>,
    store: Arc<dyn DerivedStore>,
}

impl Reconciler {
    pub fn new(cache: Arc<dyn Cache>, store: Arc<dyn DerivedStore>) -> Self { Self { cache, store } }

    /// Reconcile a queue entry in its `"<namespace>/<name>"` form.
    pub async fn reconcile(&self, raw: &str) -> Result<Outcome, ReconcileError> {
        let key: ResourceKey = raw
            .parse()
            .map_err(|source| ReconcileError::InvalidKey { raw: raw.to_string(), source })?;
        self.reconcile_key(&key).await
    }

    pub async fn reconcile_key(&self, key: &ResourceKey) -> Result<Outcome, ReconcileError> {
        let cache_err = |source| ReconcileError::Cache { key: key.clone(), source };

        let Some(source) = self.cache.get_source(key).map_err(cache_err)? else {
            debug!(%key, "service not in cache; skipping");
            return Ok(Outcome::SourceGone);
        };
        let desired = source.wants_derived();
        let exists = self.cache.get_derived(key).map_err(cache_err)?.is_some();

        match (desired, exists) {
            (true, false) => {
                let derived = template::derived_for(&source);
                match self.store.create_derived(&key.namespace, &derived).await {
                    Ok(()) => {
                        info!(%key, host = %derived.spec.host, "ingress created");
                        Ok(Outcome::Created)
                    }
                    Err(StoreError::AlreadyExists(_)) => {
                        debug!(%key, "ingress already exists");
                        Ok(Outcome::Unchanged)
                    }
                    Err(source) => Err(ReconcileError::Create { key: key.clone(), source }),
                }
            }
            (false, true) => match self.store.delete_derived(&key.namespace, &key.name).await {
                Ok(()) => {
                    info!(%key, "ingress deleted");
                    Ok(Outcome::Deleted)
                }
                Err(StoreError::NotFound(_)) => {
                    debug!(%key, "ingress already gone");
                    Ok(Outcome::Unchanged)
                }
                Err(source) => Err(ReconcileError::Delete { key: key.clone(), source }),
            },
            _ => Ok(Outcome::Unchanged),
        }
    }
}
