use std::{fmt::Debug, marker::PhantomData};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use jenkins_sync_core::{kubernetes::GetApi, resources::key::ResourceKey};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{DeleteParams, ListParams, PostParams, WatchParams},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::ApiError;

#[cfg(test)]
pub mod testing;

// the apiserver refuses anything above 295
const WATCH_TIMEOUT_SECS: u32 = 290;

/// One page of listed objects, with the version to start watching from.
#[derive(Debug, Clone)]
pub struct ObjectPage<K> {
    pub items: Vec<K>,
    pub resource_version: String,
}

#[derive(Debug)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// carries the resource version the stream progressed to
    Bookmark(String),
    Error(ApiError),
}

pub type WatchStream<K> = BoxStream<'static, WatchEvent<K>>;

/// Everything the engine needs from the control-plane API for a single kind.
///
/// `namespace` scopes `list` and `watch`, `None` meaning every namespace.
#[async_trait]
pub trait RemoteApi<K>: Send + Sync {
    async fn list(&self, namespace: Option<&str>) -> Result<ObjectPage<K>, ApiError>;
    async fn watch(
        &self,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream<K>, ApiError>;
    /// Replaces the object, failing with `ApiError::Conflict` when its
    /// resource version is no longer current.
    async fn update(&self, object: &K) -> Result<K, ApiError>;
    async fn update_status(&self, object: &K) -> Result<K, ApiError>;
    async fn delete(&self, key: &ResourceKey) -> Result<(), ApiError>;
}

pub struct KubeRemote<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeRemote<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeRemote<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    fn api(&self, namespace: Option<&str>) -> kube::Api<K> {
        self.client.scoped_api(namespace)
    }

    fn object_api(&self, object: &K) -> kube::Api<K> {
        self.api(object.meta().namespace.as_deref())
    }
}

fn require_name<K: Resource>(object: &K) -> Result<&str, ApiError> {
    object
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| ApiError::Invalid("object has no name".to_owned()))
}

#[async_trait]
impl<K> RemoteApi<K> for KubeRemote<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn list(&self, namespace: Option<&str>) -> Result<ObjectPage<K>, ApiError> {
        let list = self.api(namespace).list(&ListParams::default()).await?;

        Ok(ObjectPage {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    async fn watch(
        &self,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream<K>, ApiError> {
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = self.api(namespace).watch(&params, resource_version).await?;

        Ok(stream
            .map(|event| match event {
                Ok(kube::api::WatchEvent::Added(object)) => WatchEvent::Added(object),
                Ok(kube::api::WatchEvent::Modified(object)) => WatchEvent::Modified(object),
                Ok(kube::api::WatchEvent::Deleted(object)) => WatchEvent::Deleted(object),
                Ok(kube::api::WatchEvent::Bookmark(bookmark)) => {
                    WatchEvent::Bookmark(bookmark.metadata.resource_version)
                }
                Ok(kube::api::WatchEvent::Error(response)) => {
                    WatchEvent::Error(kube::Error::Api(response).into())
                }
                Err(error) => WatchEvent::Error(error.into()),
            })
            .boxed())
    }

    async fn update(&self, object: &K) -> Result<K, ApiError> {
        let name = require_name(object)?;

        Ok(self
            .object_api(object)
            .replace(name, &PostParams::default(), object)
            .await?)
    }

    async fn update_status(&self, object: &K) -> Result<K, ApiError> {
        let name = require_name(object)?;
        let data = serde_json::to_vec(object).map_err(|err| ApiError::Invalid(err.to_string()))?;

        Ok(self
            .object_api(object)
            .replace_status(name, &PostParams::default(), data)
            .await?)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), ApiError> {
        self.api(key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::default())
            .await?;

        Ok(())
    }
}
