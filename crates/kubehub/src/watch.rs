//! List+watch for Services and Ingresses.
//!
//! Each watch feeds a reflector store (the read cache) and a tracker that
//! turns raw watch events into [`Notification`]s for the dispatcher.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use metrics::counter;
use portico_core::{DerivedResource, Notification, ResourceKey, SourceResource};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ReflectorCache;
use crate::convert::{derived_from_ingress, source_from_service};

/// Remembers the last Service seen per key so updates carry both versions.
#[derive(Debug, Default)]
pub struct ServiceTracker {
    last: HashMap<ResourceKey, SourceResource>,
}

/// Turns watch events for one resource kind into notifications.
pub trait Tracker<K> {
    fn observe(&mut self, event: Event<K>) -> Vec<Notification>;
}

impl Tracker<Service> for ServiceTracker {
    fn observe(&mut self, event: Event<Service>) -> Vec<Notification> {
        match event {
            Event::Applied(svc) => source_from_service(&svc).map(|s| self.applied(s)).into_iter().collect(),
            Event::Deleted(svc) => {
                // deletions are not reconciled; the Ingress goes with its owner
                if let Some(s) = source_from_service(&svc) {
                    self.last.remove(&s.key());
                }
                Vec::new()
            }
            Event::Restarted(list) => {
                self.last.clear();
                list.iter()
                    .filter_map(source_from_service)
                    .map(|s| {
                        self.last.insert(s.key(), s.clone());
                        Notification::SourceAdded(s)
                    })
                    .collect()
            }
        }
    }
}

impl ServiceTracker {
    fn applied(&mut self, new: SourceResource) -> Notification {
        match self.last.insert(new.key(), new.clone()) {
            Some(old) => Notification::SourceUpdated { old, new },
            None => Notification::SourceAdded(new),
        }
    }
}

/// Tracks known Ingresses so a relist can surface deletions the watch missed.
#[derive(Debug, Default)]
pub struct IngressTracker {
    known: HashMap<ResourceKey, DerivedResource>,
}

impl Tracker<Ingress> for IngressTracker {
    fn observe(&mut self, event: Event<Ingress>) -> Vec<Notification> {
        match event {
            Event::Applied(ing) => {
                if let Some(d) = derived_from_ingress(&ing) {
                    self.known.insert(d.key(), d);
                }
                Vec::new()
            }
            Event::Deleted(ing) => match derived_from_ingress(&ing) {
                Some(d) => {
                    self.known.remove(&d.key());
                    vec![Notification::DerivedDeleted(d)]
                }
                None => Vec::new(),
            },
            Event::Restarted(list) => {
                let fresh: HashMap<_, _> =
                    list.iter().filter_map(derived_from_ingress).map(|d| (d.key(), d)).collect();
                let vanished = self
                    .known
                    .drain()
                    .filter(|(k, _)| !fresh.contains_key(k))
                    .map(|(_, d)| Notification::DerivedDeleted(d))
                    .collect();
                self.known = fresh;
                vanished
            }
        }
    }
}

/// Running watch tasks plus the stores they fill.
pub struct Watchers {
    services: Store<Service>,
    ingresses: Store<Ingress>,
    tasks: Vec<JoinHandle<()>>,
}

impl Watchers {
    /// Start both watches, scoped to `namespace` or cluster-wide.
    pub fn start(client: Client, namespace: Option<&str>, tx: mpsc::Sender<Notification>) -> Self {
        let (svc_api, ing_api): (Api<Service>, Api<Ingress>) = match namespace {
            Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client, ns)),
            None => (Api::all(client.clone()), Api::all(client)),
        };
        let (services, svc_writer) = reflector::store();
        let (ingresses, ing_writer) = reflector::store();

        let svc_stream = reflector::reflector(svc_writer, watcher::watcher(svc_api, watcher::Config::default()).default_backoff());
        let ing_stream = reflector::reflector(ing_writer, watcher::watcher(ing_api, watcher::Config::default()).default_backoff());

        let tasks = vec![
            tokio::spawn(pump("services", svc_stream, ServiceTracker::default(), tx.clone())),
            tokio::spawn(pump("ingresses", ing_stream, IngressTracker::default(), tx)),
        ];
        info!(ns = ?namespace, "watchers started");
        Self { services, ingresses, tasks }
    }

    /// Resolve once both stores hold a complete initial list.
    pub async fn wait_synced(&self) -> Result<()> {
        self.services.wait_until_ready().await.map_err(|e| anyhow!("service store: {}", e))?;
        self.ingresses.wait_until_ready().await.map_err(|e| anyhow!("ingress store: {}", e))?;
        info!(services = self.services.state().len(), ingresses = self.ingresses.state().len(), "caches synced");
        Ok(())
    }

    pub fn cache(&self) -> ReflectorCache { ReflectorCache::new(self.services.clone(), self.ingresses.clone()) }

    pub fn abort(self) {
        for t in self.tasks {
            t.abort();
        }
    }
}

async fn pump<K, S, T>(resource: &'static str, stream: S, mut tracker: T, tx: mpsc::Sender<Notification>)
where
    S: futures::Stream<Item = Result<Event<K>, watcher::Error>>,
    T: Tracker<K>,
{
    futures::pin_mut!(stream);
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                counter!("portico_watch_events_total", 1, "resource" => resource);
                for n in tracker.observe(event) {
                    if tx.send(n).await.is_err() {
                        debug!(resource, "notification channel closed; watch stopping");
                        return;
                    }
                }
            }
            Err(e) => {
                // backoff is applied by the stream; keep going
                counter!("portico_watch_errors_total", 1, "resource" => resource);
                warn!(resource, error = %e, "watch error");
            }
        }
    }
    warn!(resource, "watch stream ended");
}
