use std::{
    any::Any,
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
};

use jenkins_sync_core::{
    helpers::pretty_type_name,
    resources::{key::ResourceKey, version::is_newer},
};
use kube::Resource;
use log::debug;
use thiserror::Error;
use tokio::time::Instant;

use crate::{error::ApiError, heartbeat::HeartbeatSource, remote::RemoteApi};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("A cache for '{}' is already registered!", .0)]
    AlreadyRegistered(String),
    #[error("No cache is registered for '{}'!", .0)]
    NotRegistered(String),
}

struct Mirror<K> {
    objects: HashMap<ResourceKey, Arc<K>>,
    /// uid -> resource version of deleted objects
    tombstones: HashMap<String, String>,
    /// keys held before the last `clear`, diffed against the next list
    retired: HashSet<ResourceKey>,
}

impl<K> Default for Mirror<K> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            tombstones: HashMap::new(),
            retired: HashSet::new(),
        }
    }
}

/// Local mirror of one resource kind plus the remote client writes go through.
///
/// The mirror is written only by the watch source of its kind and read by
/// everyone else.
pub struct Cache<K> {
    kind: &'static str,
    remote: Arc<dyn RemoteApi<K>>,
    mirror: RwLock<Mirror<K>>,
    synced: AtomicBool,
    last_event: Mutex<Option<Instant>>,
}

impl<K> Cache<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn new(remote: Arc<dyn RemoteApi<K>>) -> Arc<Self> {
        Arc::new(Self {
            kind: pretty_type_name::<K>(),
            remote,
            mirror: RwLock::new(Mirror::default()),
            synced: AtomicBool::new(false),
            last_event: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn remote(&self) -> &Arc<dyn RemoteApi<K>> {
        &self.remote
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Arc<K>> {
        self.read().objects.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().objects.len()
    }

    /// Snapshot of every mirrored object, in no particular order.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.read().objects.values().cloned().collect()
    }

    pub async fn update(&self, object: &K) -> Result<K, ApiError> {
        self.remote.update(object).await
    }

    pub async fn update_status(&self, object: &K) -> Result<K, ApiError> {
        self.remote.update_status(object).await
    }

    /// Deletes the remote object. The mirror follows once the watch reports it.
    pub async fn delete(&self, key: &ResourceKey) -> Result<(), ApiError> {
        self.remote.delete(key).await
    }

    /// Swaps the mirror content for a fresh list. Returns the listed keys
    /// followed by the keys that vanished since the previous mirror, including
    /// the ones dropped by the last `clear`.
    pub fn replace(&self, objects: Vec<K>) -> Vec<ResourceKey> {
        let mut listed = HashMap::with_capacity(objects.len());

        for object in objects {
            match ResourceKey::from_resource(&object) {
                Some(key) => {
                    listed.insert(key, Arc::new(object));
                }
                None => debug!("Skipping a nameless {} from the list", self.kind),
            }
        }

        let mut guard = self.write();
        let mirror = &mut *guard;
        let previous: HashSet<ResourceKey> = mirror
            .objects
            .keys()
            .cloned()
            .chain(mirror.retired.drain())
            .collect();

        let mut keys: Vec<ResourceKey> = listed.keys().cloned().collect();
        keys.extend(previous.into_iter().filter(|key| !listed.contains_key(key)));

        mirror.objects = listed;
        mirror.tombstones.clear();

        keys
    }

    /// Stores an added or modified object unless it's older than what the
    /// mirror already holds for its uid. Returns the key to enqueue.
    pub fn apply(&self, object: K) -> Option<ResourceKey> {
        let key = ResourceKey::from_resource(&object)?;
        let meta = object.meta();
        let version = meta.resource_version.as_deref().unwrap_or_default();
        let mut mirror = self.write();

        if let Some(uid) = meta.uid.as_deref() {
            if let Some(deleted_at) = mirror.tombstones.get(uid) {
                if !is_newer(version, deleted_at) {
                    debug!("Dropping stale {} event for deleted '{key}'", self.kind);
                    return None;
                }
            }
        }

        if let Some(current) = mirror.objects.get(&key) {
            let current = current.meta();

            if current.uid == meta.uid
                && !is_newer(version, current.resource_version.as_deref().unwrap_or_default())
            {
                debug!(
                    "Dropping stale {} event for '{key}' at resource version {version}",
                    self.kind
                );
                return None;
            }
        }

        mirror.objects.insert(key.clone(), Arc::new(object));

        Some(key)
    }

    /// Removes a deleted object and remembers its uid, so late events for it
    /// can't bring it back. Returns the key to enqueue.
    pub fn apply_delete(&self, object: K) -> Option<ResourceKey> {
        let key = ResourceKey::from_resource(&object)?;
        let meta = object.meta();
        let version = meta.resource_version.clone().unwrap_or_default();
        let mut mirror = self.write();

        if let Some(uid) = meta.uid.clone() {
            mirror.tombstones.insert(uid, version.clone());
        }

        if let Some(current) = mirror.objects.get(&key) {
            let current = current.meta();
            let replaced = current.uid != meta.uid;
            let outdated = current.uid == meta.uid
                && !is_newer(&version, current.resource_version.as_deref().unwrap_or_default())
                && current.resource_version.as_deref() != Some(version.as_str());

            if replaced || outdated {
                debug!("Dropping stale {} deletion for '{key}'", self.kind);
                return None;
            }
        }

        mirror.objects.remove(&key);

        Some(key)
    }

    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub fn touch(&self) {
        *self.last_event.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    /// Empties the mirror and drops the synced flag. The dropped keys are
    /// remembered until the next `replace`, so deletions missed in between
    /// still get enqueued.
    pub fn clear(&self) {
        let mut mirror = self.write();
        let dropped: Vec<ResourceKey> = mirror.objects.drain().map(|(key, _)| key).collect();

        mirror.retired.extend(dropped);
        mirror.tombstones.clear();
        drop(mirror);

        self.synced.store(false, Ordering::SeqCst);
        *self.last_event.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Mirror<K>> {
        self.mirror.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Mirror<K>> {
        self.mirror.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K> HeartbeatSource for Cache<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.kind
    }

    fn last_event(&self) -> Option<Instant> {
        *self.last_event.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Kind-erased view of a cache used by the manager.
pub trait CacheHandle: Send + Sync {
    fn has_synced(&self) -> bool;
    fn clear(&self);
}

impl<K> CacheHandle for Cache<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn has_synced(&self) -> bool {
        Cache::has_synced(self)
    }

    fn clear(&self) {
        Cache::clear(self)
    }
}

struct RegistryEntry {
    handle: Arc<dyn CacheHandle>,
    /// only kinds the server keeps updating on a known cadence
    heartbeat: Option<Arc<dyn HeartbeatSource>>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Binds every resource kind to exactly one cache.
#[derive(Default)]
pub struct ClientRegistry {
    entries: RwLock<BTreeMap<&'static str, RegistryEntry>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<K>(&self, cache: Arc<Cache<K>>) -> Result<(), RegistryError>
    where
        K: Resource + Send + Sync + 'static,
    {
        self.insert(cache, false)
    }

    /// Registers a kind whose objects are updated periodically upstream, so a
    /// silent watch on it means the connection is dead.
    pub fn register_with_heartbeat<K>(&self, cache: Arc<Cache<K>>) -> Result<(), RegistryError>
    where
        K: Resource + Send + Sync + 'static,
    {
        self.insert(cache, true)
    }

    fn insert<K>(&self, cache: Arc<Cache<K>>, heartbeat: bool) -> Result<(), RegistryError>
    where
        K: Resource + Send + Sync + 'static,
    {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let kind = cache.kind();

        if entries.contains_key(kind) {
            return Err(RegistryError::AlreadyRegistered(kind.to_owned()));
        }

        entries.insert(
            kind,
            RegistryEntry {
                handle: cache.clone(),
                heartbeat: heartbeat.then(|| cache.clone() as Arc<dyn HeartbeatSource>),
                typed: cache,
            },
        );

        Ok(())
    }

    pub fn get<K>(&self) -> Option<Arc<Cache<K>>>
    where
        K: Resource + Send + Sync + 'static,
    {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(pretty_type_name::<K>())?;

        entry.typed.clone().downcast::<Cache<K>>().ok()
    }

    pub fn require<K>(&self) -> Result<Arc<Cache<K>>, RegistryError>
    where
        K: Resource + Send + Sync + 'static,
    {
        self.get::<K>()
            .ok_or_else(|| RegistryError::NotRegistered(pretty_type_name::<K>().to_owned()))
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    pub fn all_registered_synced(&self) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .all(|entry| entry.handle.has_synced())
    }

    /// Drops every mirror along with its synced flag.
    pub fn clear_all(&self) {
        for entry in self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
        {
            entry.handle.clear();
        }
    }

    pub fn heartbeat_sources(&self) -> Vec<Arc<dyn HeartbeatSource>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter_map(|entry| entry.heartbeat.clone())
            .collect()
    }
}

#[cfg(test)]
impl<K> Cache<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
