use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use thiserror::Error;

/// Credential material derived from a `Secret`, stored as is. Translating it
/// into host credential types happens behind `CredentialStore`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub id: String,
    pub namespace: String,
    pub name: String,
    pub secret_type: Option<String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Credential {
    pub fn id_for(namespace: &str, name: &str) -> String {
        format!("{namespace}-{name}")
    }

    /// `None` for secrets without a name or namespace.
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let name = secret.metadata.name.as_deref().filter(|n| !n.is_empty())?;
        let namespace = secret
            .metadata
            .namespace
            .as_deref()
            .filter(|n| !n.is_empty())?;

        let mut data: BTreeMap<String, Vec<u8>> = secret
            .data
            .iter()
            .flatten()
            .map(|(key, value)| (key.clone(), value.0.clone()))
            .collect();
        data.extend(
            secret
                .string_data
                .iter()
                .flatten()
                .map(|(key, value)| (key.clone(), value.clone().into_bytes())),
        );

        Some(Self {
            id: Self::id_for(namespace, name),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            secret_type: secret.type_.clone(),
            data,
        })
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Couldn't store credential '{}'! Reason: {}", .0, .1)]
    Store(String, String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn upsert(&self, credential: Credential) -> Result<(), CredentialError>;
    /// `Ok(false)` when there was nothing to delete.
    async fn delete(&self, id: &str) -> Result<bool, CredentialError>;
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<BTreeMap<String, Credential>>,
    upserts: AtomicUsize,
}

impl InMemoryCredentialStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[cfg(test)]
impl InMemoryCredentialStore {
    pub fn get(&self, id: &str) -> Option<Credential> {
        self.credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn upsert(&self, credential: Credential) -> Result<(), CredentialError> {
        let mut credentials = self.credentials.lock().unwrap_or_else(|e| e.into_inner());

        // `a-b/c` and `a/b-c` share an id
        if let Some(existing) = credentials.get(&credential.id) {
            if (&existing.namespace, &existing.name) != (&credential.namespace, &credential.name) {
                return Err(CredentialError::Store(
                    credential.id,
                    format!(
                        "id is taken by secret '{}' in '{}' namespace",
                        existing.name, existing.namespace
                    ),
                ));
            }
        }

        credentials.insert(credential.id.clone(), credential);
        self.upserts.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, CredentialError> {
        Ok(self
            .credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some())
    }
}
