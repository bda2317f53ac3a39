use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use log::{debug, info, warn};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    credentials::{Credential, CredentialStore},
    error::ApiError,
    heartbeat::HeartbeatSource,
    remote::{RemoteApi, WatchEvent, WatchStream},
    watch::scope_name,
};

/// Watchers started next to the controllers that don't feed a work queue.
pub trait LegacyWatcher: Send + Sync {
    fn name(&self) -> &str;
    fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()>;
    fn heartbeat(self: Arc<Self>) -> Arc<dyn HeartbeatSource>;
}

#[derive(Default)]
struct WatcherState {
    /// uid -> last synced resource version
    tracked: HashMap<String, String>,
    watches: HashMap<Option<String>, JoinHandle<()>>,
}

/// Mirrors `Secret` objects into the credential store, one watch per namespace.
pub struct SecretWatcher {
    remote: Arc<dyn RemoteApi<Secret>>,
    credentials: Arc<dyn CredentialStore>,
    scopes: Vec<Option<String>>,
    alive_check: Duration,
    state: tokio::sync::Mutex<WatcherState>,
    last_event: Mutex<Option<Instant>>,
}

impl SecretWatcher {
    pub fn new(
        remote: Arc<dyn RemoteApi<Secret>>,
        credentials: Arc<dyn CredentialStore>,
        scopes: Vec<Option<String>>,
        alive_check: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            remote,
            credentials,
            scopes,
            alive_check,
            state: Default::default(),
            last_event: Mutex::new(None),
        })
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Starting Secret watcher for {} scope(s)...", self.scopes.len());

        loop {
            for scope in &self.scopes {
                if let Err(error) = self.ensure_watch(scope, &cancel).await {
                    warn!(
                        "Couldn't watch secrets in {}! Reason: {error}",
                        scope_name(scope)
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.alive_check) => (),
            }
        }

        let watches: Vec<_> = self.state.lock().await.watches.drain().collect();
        for (scope, watch) in watches {
            if let Err(err) = watch.await {
                warn!("Secret watch in {} crashed! {err:?}", scope_name(&scope));
            }
        }

        info!("Secret watcher stopped");
    }

    /// Lists and starts a watch for `scope` unless a live one exists already.
    async fn ensure_watch(
        self: &Arc<Self>,
        scope: &Option<String>,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;

        if let Some(watch) = state.watches.get(scope) {
            if !watch.is_finished() {
                return Ok(());
            }

            info!("Secret watch in {} ended, restarting...", scope_name(scope));
        }

        let page = self.remote.list(scope.as_deref()).await?;
        if !page.items.is_empty() {
            self.touch();
        }

        for secret in &page.items {
            self.upsert_if_changed(&mut state, secret).await;
        }

        let events = self
            .remote
            .watch(scope.as_deref(), &page.resource_version)
            .await?;
        let watch = tokio::spawn(self.clone().watch(scope.clone(), events, cancel.clone()));
        state.watches.insert(scope.clone(), watch);

        Ok(())
    }

    async fn watch(
        self: Arc<Self>,
        scope: Option<String>,
        mut events: WatchStream<Secret>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => event,
            };

            let Some(event) = event else {
                debug!("Secret watch in {} ended", scope_name(&scope));
                break;
            };

            let mut state = self.state.lock().await;
            match event {
                WatchEvent::Added(secret) => {
                    self.touch();
                    self.upsert(&mut state, &secret).await;
                }
                WatchEvent::Modified(secret) => {
                    self.touch();
                    self.upsert_if_changed(&mut state, &secret).await;
                }
                WatchEvent::Deleted(secret) => {
                    self.touch();
                    self.remove(&mut state, &secret).await;
                }
                WatchEvent::Bookmark(_) => (),
                WatchEvent::Error(error) => {
                    warn!("Secret watch in {} failed! Reason: {error}", scope_name(&scope))
                }
            }
        }
    }

    async fn upsert_if_changed(&self, state: &mut WatcherState, secret: &Secret) {
        let (Some(uid), Some(version)) = (secret.uid(), secret.resource_version()) else {
            return;
        };

        if state.tracked.get(&uid) != Some(&version) {
            self.upsert(state, secret).await;
        }
    }

    async fn upsert(&self, state: &mut WatcherState, secret: &Secret) {
        let Some(credential) = Credential::from_secret(secret) else {
            return;
        };

        let id = credential.id.clone();
        match self.credentials.upsert(credential).await {
            Ok(()) => {
                debug!("Synced credential '{id}'");
                if let (Some(uid), Some(version)) = (secret.uid(), secret.resource_version()) {
                    state.tracked.insert(uid, version);
                }
            }
            Err(error) => warn!("{error}"),
        }
    }

    async fn remove(&self, state: &mut WatcherState, secret: &Secret) {
        if let Some(uid) = secret.uid() {
            state.tracked.remove(&uid);
        }

        let Some(credential) = Credential::from_secret(secret) else {
            return;
        };

        match self.credentials.delete(&credential.id).await {
            Ok(true) => info!("Deleted credential '{}'", credential.id),
            Ok(false) => (),
            Err(error) => warn!("{error}"),
        }
    }

    fn touch(&self) {
        *self.last_event.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }
}

impl HeartbeatSource for SecretWatcher {
    fn name(&self) -> &str {
        "Secret"
    }

    fn last_event(&self) -> Option<Instant> {
        *self.last_event.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LegacyWatcher for SecretWatcher {
    fn name(&self) -> &str {
        "Secret"
    }

    fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    fn heartbeat(self: Arc<Self>) -> Arc<dyn HeartbeatSource> {
        self
    }
}

#[cfg(test)]
impl SecretWatcher {
    pub async fn tracked(&self) -> usize {
        self.state.lock().await.tracked.len()
    }
}
