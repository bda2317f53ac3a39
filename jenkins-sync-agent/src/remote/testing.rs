//! In-memory stand-ins for the control plane, driving watch streams through channels.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use jenkins_sync_core::resources::{crd::v1alpha1::jenkins::Jenkins, key::ResourceKey};
use kube::Resource;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{error::ApiError, gate::JenkinsApi};

use super::{ObjectPage, RemoteApi, WatchEvent, WatchStream};

struct FakeState<K> {
    objects: BTreeMap<ResourceKey, K>,
    revision: u64,
    watchers: Vec<UnboundedSender<WatchEvent<K>>>,
    list_delay: Duration,
    list_calls: usize,
    watch_calls: usize,
    writes: usize,
}

pub struct FakeRemote<K> {
    state: Mutex<FakeState<K>>,
}

impl<K> FakeRemote<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Self::with_objects(Vec::new())
    }

    /// Objects are stored as given, the revision counter starts past their
    /// highest numeric resource version.
    pub fn with_objects(objects: Vec<K>) -> Arc<Self> {
        let remote = Arc::new(Self {
            state: Mutex::new(FakeState {
                objects: BTreeMap::new(),
                revision: 1,
                watchers: Vec::new(),
                list_delay: Duration::ZERO,
                list_calls: 0,
                watch_calls: 0,
                writes: 0,
            }),
        });

        for object in objects {
            remote.insert(object);
        }

        remote
    }

    pub fn insert(&self, object: K) {
        let mut state = self.state.lock().unwrap();
        let revision = object
            .meta()
            .resource_version
            .as_deref()
            .and_then(|rv| rv.parse::<u64>().ok())
            .unwrap_or(0);

        state.revision = state.revision.max(revision);
        state
            .objects
            .insert(ResourceKey::from_resource(&object).unwrap(), object);
    }

    pub fn get(&self, key: &ResourceKey) -> Option<K> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    /// Pushes an event to every open watch, without touching the stored objects.
    pub fn emit(&self, make_event: impl Fn() -> WatchEvent<K>) {
        let mut state = self.state.lock().unwrap();

        state.watchers.retain(|tx| tx.send(make_event()).is_ok());
    }

    /// Ends every open watch stream.
    pub fn close_watches(&self) {
        self.state.lock().unwrap().watchers.clear();
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.state.lock().unwrap().list_delay = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn watch_calls(&self) -> usize {
        self.state.lock().unwrap().watch_calls
    }

    pub fn open_watches(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.watchers.retain(|tx| !tx.is_closed());
        state.watchers.len()
    }

    /// Number of successful update and delete calls.
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    /// Deletes the object and tells every open watch about it.
    pub fn remove(&self, key: &ResourceKey) -> Option<K> {
        let mut state = self.state.lock().unwrap();
        let mut object = state.objects.remove(key)?;

        state.revision += 1;
        state.writes += 1;
        object.meta_mut().resource_version = Some(state.revision.to_string());
        state
            .watchers
            .retain(|tx| tx.send(WatchEvent::Deleted(object.clone())).is_ok());

        Some(object)
    }

    fn store(&self, mut object: K) -> Result<K, ApiError> {
        let mut state = self.state.lock().unwrap();
        let key = ResourceKey::from_resource(&object)
            .ok_or_else(|| ApiError::Invalid("object has no name".to_owned()))?;

        match state.objects.get(&key) {
            None => return Err(ApiError::NotFound(key.to_string())),
            Some(existing) if existing.meta().resource_version != object.meta().resource_version => {
                return Err(ApiError::Conflict(format!("{key} was modified")))
            }
            _ => (),
        }

        state.revision += 1;
        state.writes += 1;
        let revision = state.revision;
        let meta = object.meta_mut();
        meta.resource_version = Some(revision.to_string());
        meta.uid.get_or_insert_with(|| format!("uid-{revision}"));

        state.objects.insert(key, object.clone());
        state
            .watchers
            .retain(|tx| tx.send(WatchEvent::Modified(object.clone())).is_ok());

        Ok(object)
    }
}

#[async_trait]
impl<K> RemoteApi<K> for FakeRemote<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn list(&self, namespace: Option<&str>) -> Result<ObjectPage<K>, ApiError> {
        let delay = self.state.lock().unwrap().list_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;

        Ok(ObjectPage {
            items: state
                .objects
                .iter()
                .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
                .map(|(_, object)| object.clone())
                .collect(),
            resource_version: state.revision.to_string(),
        })
    }

    async fn watch(
        &self,
        _namespace: Option<&str>,
        _resource_version: &str,
    ) -> Result<WatchStream<K>, ApiError> {
        let (tx, rx) = unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state.watch_calls += 1;
        state.watchers.push(tx);

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn update(&self, object: &K) -> Result<K, ApiError> {
        self.store(object.clone())
    }

    async fn update_status(&self, object: &K) -> Result<K, ApiError> {
        self.store(object.clone())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), ApiError> {
        self.remove(key)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(key.to_string()))
    }
}

/// Holds a single `Jenkins` resource.
pub struct FakeJenkins {
    jenkins: Mutex<Option<Jenkins>>,
    updates: Mutex<usize>,
}

impl FakeJenkins {
    pub fn new(jenkins: Option<Jenkins>) -> Arc<Self> {
        Arc::new(Self {
            jenkins: Mutex::new(jenkins),
            updates: Mutex::new(0),
        })
    }

    pub fn current(&self) -> Option<Jenkins> {
        self.jenkins.lock().unwrap().clone()
    }

    pub fn updates(&self) -> usize {
        *self.updates.lock().unwrap()
    }
}

#[async_trait]
impl JenkinsApi for FakeJenkins {
    async fn get(&self, name: &str) -> Result<Option<Jenkins>, ApiError> {
        Ok(self
            .jenkins
            .lock()
            .unwrap()
            .as_ref()
            .filter(|jenkins| jenkins.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn update(&self, jenkins: &Jenkins) -> Result<Jenkins, ApiError> {
        let mut current = self.jenkins.lock().unwrap();
        let stored = current
            .as_ref()
            .ok_or_else(|| ApiError::NotFound("jenkins".to_owned()))?;

        if stored.metadata.resource_version != jenkins.metadata.resource_version {
            return Err(ApiError::Conflict("jenkins was modified".to_owned()));
        }

        let mut updated = jenkins.clone();
        let revision = updated
            .metadata
            .resource_version
            .as_deref()
            .and_then(|rv| rv.parse::<u64>().ok())
            .unwrap_or(0);
        updated.metadata.resource_version = Some((revision + 1).to_string());

        *current = Some(updated.clone());
        *self.updates.lock().unwrap() += 1;

        Ok(updated)
    }
}
