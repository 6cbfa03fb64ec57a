//! Object cache (spec §4.4).
//!
//! A locally indexed, watch-populated mirror of one object kind, with a
//! periodic resync that re-enqueues every known key so reconciliation
//! self-heals from any drift a missed watch event might have caused.
//! Built on `kube-runtime`'s own watcher/reflector (the watch/cache
//! *transport* is an external collaborator per spec §1; this type is the
//! local indexed store and resync loop built on top of it).

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::workqueue::WorkQueue;

/// Identity of a watched object: name plus namespace for namespaced
/// kinds (`None` for cluster-scoped kinds).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for ObjKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

pub fn key_of<K: ResourceExt>(obj: &K) -> ObjKey {
    ObjKey {
        namespace: obj.namespace(),
        name: obj.name_any(),
    }
}

pub struct ObjectCache<K: Resource<DynamicType = ()> + 'static> {
    store: reflector::Store<K>,
}

impl<K> ObjectCache<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + ResourceExt + 'static,
{
    /// Wrap an already-populated reflector store. Lets tests seed a cache
    /// via `reflector::store()` + `Writer::apply_watcher_event` without
    /// running a real watch.
    pub fn from_store(store: reflector::Store<K>) -> Self {
        Self { store }
    }

    pub fn get(&self, key: &ObjKey) -> Option<Arc<K>> {
        self.store
            .state()
            .into_iter()
            .find(|o| key_of(o.as_ref()) == *key)
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    /// Start the watch + resync loop. Every change enqueues the
    /// object's key into `queue`; every `resync_period`, every key
    /// currently in the store is re-enqueued.
    pub fn start(api: Api<K>, queue: Arc<WorkQueue<ObjKey>>, resync_period: Duration) -> (Self, tokio::task::JoinHandle<()>) {
        let (reader, writer) = reflector::store::<K>();
        let stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .reflect(writer)
            .touched_objects();

        let watch_queue = Arc::clone(&queue);
        let resync_reader = reader.clone();
        let resync_queue = Arc::clone(&queue);

        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            let mut resync = tokio::time::interval(resync_period);
            resync.tick().await; // first tick fires immediately; skip it

            loop {
                tokio::select! {
                    next = stream.try_next() => {
                        match next {
                            Ok(Some(obj)) => watch_queue.add(key_of(&obj)).await,
                            Ok(None) => break,
                            Err(e) => warn!("watch stream error: {e}"),
                        }
                    }
                    _ = resync.tick() => {
                        for obj in resync_reader.state() {
                            resync_queue.add(key_of(obj.as_ref())).await;
                        }
                    }
                }
            }
        });

        (Self { store: reader }, handle)
    }
}
