#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use portico_controller::ControllerConfig;
use portico_core::{
    Cache, CacheError, DerivedResource, DerivedStore, ResourceKey, SourceResource, StoreError, TRIGGER_ANNOTATION,
};
use tokio::sync::Notify;

/// In-memory cluster: the store writes straight through to what the cache reads.
#[derive(Default)]
pub struct FakeCluster {
    pub services: Mutex<HashMap<ResourceKey, SourceResource>>,
    pub ingresses: Mutex<HashMap<ResourceKey, DerivedResource>>,
    pub calls: Mutex<Vec<String>>,
    pub source_reads: AtomicUsize,
    /// Store calls fail with a 500 while this is non-zero.
    pub failures_left: AtomicUsize,
    /// Source reads panic while this is non-zero.
    pub panics_left: AtomicUsize,
    /// When set, create waits for a notification before completing.
    pub create_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn put_service(&self, svc: SourceResource) { self.services.lock().insert(svc.key(), svc); }

    pub fn calls(&self) -> Vec<String> { self.calls.lock().clone() }

    pub fn count(&self, prefix: &str) -> usize { self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count() }

    pub fn has_ingress(&self, key: &ResourceKey) -> bool { self.ingresses.lock().contains_key(key) }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Api { code: 500, message: "injected".into() });
        }
        Ok(())
    }
}

impl Cache for FakeCluster {
    fn get_source(&self, key: &ResourceKey) -> Result<Option<SourceResource>, CacheError> {
        self.source_reads.fetch_add(1, Ordering::SeqCst);
        if self.panics_left.load(Ordering::SeqCst) > 0 {
            self.panics_left.fetch_sub(1, Ordering::SeqCst);
            panic!("injected cache panic");
        }
        Ok(self.services.lock().get(key).cloned())
    }

    fn get_derived(&self, key: &ResourceKey) -> Result<Option<DerivedResource>, CacheError> {
        Ok(self.ingresses.lock().get(key).cloned())
    }
}

#[async_trait]
impl DerivedStore for FakeCluster {
    async fn create_derived(&self, namespace: &str, derived: &DerivedResource) -> Result<(), StoreError> {
        let gate = self.create_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.calls.lock().push(format!("create {}/{}", namespace, derived.name()));
        self.maybe_fail()?;
        let mut ingresses = self.ingresses.lock();
        if ingresses.contains_key(&derived.key()) {
            return Err(StoreError::AlreadyExists(derived.name().to_string()));
        }
        ingresses.insert(derived.key(), derived.clone());
        Ok(())
    }

    async fn delete_derived(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.calls.lock().push(format!("delete {}/{}", namespace, name));
        self.maybe_fail()?;
        match self.ingresses.lock().remove(&ResourceKey::new(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }
}

pub fn service(ns: &str, name: &str, annotated: bool) -> SourceResource {
    let mut annotations = BTreeMap::new();
    annotations.insert("team".to_string(), "web".to_string());
    if annotated {
        annotations.insert(TRIGGER_ANNOTATION.to_string(), "true".to_string());
    }
    SourceResource { namespace: ns.into(), name: name.into(), uid: Some(format!("uid-{}", name)), annotations }
}

pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        qps: 10_000.0,
        burst: 10_000,
        ..ControllerConfig::default()
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
