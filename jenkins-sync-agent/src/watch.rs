use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use jenkins_sync_core::resources::key::ResourceKey;
use kube::Resource;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::Cache,
    error::ApiError,
    queue::{rate_limiter::backoff_delay, WorkQueue},
    remote::WatchEvent,
};

#[async_trait]
pub trait ResourceWatch: Send + Sync {
    fn kind(&self) -> &str;
    /// Lists, then watches until the stream ends, fails or `cancel` fires.
    async fn list_and_watch(&self, cancel: &CancellationToken) -> Result<(), ApiError>;
}

/// Feeds one cache from the API server and enqueues the keys that changed.
pub struct WatchSource<K> {
    cache: Arc<Cache<K>>,
    queue: Arc<WorkQueue>,
    scopes: Vec<Option<String>>,
}

impl<K> WatchSource<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn new(cache: Arc<Cache<K>>, queue: Arc<WorkQueue>, scopes: Vec<Option<String>>) -> Self {
        Self {
            cache,
            queue,
            scopes,
        }
    }

    fn enqueue(&self, key: Option<ResourceKey>) {
        if let Some(key) = key {
            self.cache.touch();
            self.queue.add(key);
        }
    }
}

#[async_trait]
impl<K> ResourceWatch for WatchSource<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        self.cache.kind()
    }

    async fn list_and_watch(&self, cancel: &CancellationToken) -> Result<(), ApiError> {
        let kind = self.cache.kind();
        let mut listed = Vec::new();
        let mut versions = Vec::with_capacity(self.scopes.len());

        for scope in &self.scopes {
            let page = self.cache.remote().list(scope.as_deref()).await?;

            listed.extend(page.items);
            versions.push(page.resource_version);
        }

        let listed_any = !listed.is_empty();
        let keys = self.cache.replace(listed);
        info!("Listed {} {kind} objects", self.cache.len());

        for key in keys {
            self.queue.add(key);
        }

        self.cache.mark_synced();
        if listed_any {
            self.cache.touch();
        }

        let mut streams = Vec::with_capacity(self.scopes.len());
        for (index, (scope, version)) in self.scopes.iter().zip(&versions).enumerate() {
            let events = self.cache.remote().watch(scope.as_deref(), version).await?;

            // a trailing `None` tells which scope ended
            streams.push(
                events
                    .map(move |event| (index, Some(event)))
                    .chain(stream::once(async move { (index, None) }))
                    .boxed(),
            );
        }

        let mut events = stream::select_all(streams);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = events.next() => next,
            };

            let Some((index, event)) = next else {
                return Ok(());
            };

            match event {
                Some(WatchEvent::Added(object)) | Some(WatchEvent::Modified(object)) => {
                    self.enqueue(self.cache.apply(object))
                }
                Some(WatchEvent::Deleted(object)) => self.enqueue(self.cache.apply_delete(object)),
                Some(WatchEvent::Bookmark(_)) => (),
                Some(WatchEvent::Error(error)) => return Err(error),
                None => {
                    info!("{kind} watch in {} ended", scope_name(&self.scopes[index]));
                    return Ok(());
                }
            }
        }
    }
}

pub fn scope_name(scope: &Option<String>) -> String {
    match scope {
        Some(namespace) => format!("'{namespace}' namespace"),
        None => "all namespaces".to_owned(),
    }
}

/// Keeps a watch alive, re-listing after every disconnect. Consecutive
/// failures back off exponentially, a clean disconnect resets the backoff.
pub async fn supervise(
    watch: Arc<dyn ResourceWatch>,
    cancel: CancellationToken,
    backoff_base: Duration,
    backoff_cap: Duration,
) {
    let mut failures = 0u32;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = watch.list_and_watch(&cancel) => result,
        };

        match result {
            Ok(()) => failures = 0,
            Err(error) => {
                warn!("{} watch failed! Reason: {error}", watch.kind());
                failures = failures.saturating_add(1);
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        let delay = backoff_delay(backoff_base, backoff_cap, failures);
        debug!("Restarting {} watch in {delay:?}...", watch.kind());

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => (),
        }
    }

    info!("{} watch stopped", watch.kind());
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use jenkins_sync_core::resources::key::ResourceKey;
    use k8s_openapi::api::core::v1::Secret;
    use kube::core::ObjectMeta;
    use tokio_util::sync::CancellationToken;

    use crate::{
        cache::Cache,
        heartbeat::HeartbeatSource,
        queue::{rate_limiter::ExponentialBackoff, WorkQueue},
        remote::{testing::FakeRemote, WatchEvent},
    };

    use super::{supervise, ResourceWatch, WatchSource};

    fn secret(name: &str, uid: &str, version: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("team-a".to_owned()),
                uid: Some(uid.to_owned()),
                resource_version: Some(version.to_owned()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    struct Fixture {
        remote: Arc<FakeRemote<Secret>>,
        cache: Arc<Cache<Secret>>,
        queue: Arc<WorkQueue>,
        cancel: CancellationToken,
    }

    fn start(objects: Vec<Secret>) -> Fixture {
        let remote = FakeRemote::with_objects(objects);
        let cache = Cache::<Secret>::new(remote.clone());
        let queue = WorkQueue::new(
            "Secret",
            ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1)),
        );
        let cancel = CancellationToken::new();
        let source: Arc<dyn ResourceWatch> =
            Arc::new(WatchSource::new(cache.clone(), queue.clone(), vec![None]));

        tokio::spawn(supervise(
            source,
            cancel.clone(),
            Duration::from_secs(1),
            Duration::from_secs(30),
        ));

        Fixture {
            remote,
            cache,
            queue,
            cancel,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    async fn drain(queue: &WorkQueue) -> Vec<ResourceKey> {
        let mut keys = Vec::new();
        while !queue.is_empty() {
            if let Some(key) = queue.get().await {
                queue.done(&key);
                keys.push(key);
            }
        }
        keys
    }

    #[tokio::test(start_paused = true)]
    async fn initial_list_fills_the_cache_and_queue() {
        let fixture = start(vec![secret("a", "uid-a", "3"), secret("b", "uid-b", "4")]);
        settle().await;

        assert!(fixture.cache.has_synced());
        assert_eq!(fixture.cache.len(), 2);
        assert_eq!(drain(&fixture.queue).await.len(), 2);
        assert!(fixture.cache.last_event().is_some());

        fixture.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_list_syncs_without_a_heartbeat() {
        let fixture = start(Vec::new());
        settle().await;

        assert!(fixture.cache.has_synced());
        assert!(fixture.queue.is_empty());
        assert!(fixture.cache.last_event().is_none());

        fixture.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stale_event_is_neither_cached_nor_enqueued() {
        let fixture = start(Vec::new());
        settle().await;

        fixture
            .remote
            .emit(|| WatchEvent::Added(secret("token", "uid-1", "10")));
        settle().await;
        assert_eq!(drain(&fixture.queue).await.len(), 1);
        let heard_at = fixture.cache.last_event();

        tokio::time::sleep(Duration::from_secs(5)).await;
        fixture
            .remote
            .emit(|| WatchEvent::Modified(secret("token", "uid-1", "9")));
        settle().await;

        assert!(fixture.queue.is_empty());
        assert_eq!(fixture.cache.last_event(), heard_at);
        assert_eq!(
            fixture
                .cache
                .get(&ResourceKey::new("team-a", "token"))
                .and_then(|s| s.metadata.resource_version.clone())
                .as_deref(),
            Some("10")
        );

        fixture.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn bookmarks_are_ignored() {
        let fixture = start(Vec::new());
        settle().await;

        fixture.remote.emit(|| WatchEvent::Bookmark("42".to_owned()));
        settle().await;

        assert!(fixture.queue.is_empty());
        assert!(fixture.cache.last_event().is_none());

        fixture.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn ended_stream_is_relisted() {
        let fixture = start(vec![secret("a", "uid-a", "3")]);
        settle().await;
        drain(&fixture.queue).await;
        assert_eq!(fixture.remote.list_calls(), 1);

        fixture.remote.close_watches();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(fixture.remote.list_calls(), 2);
        assert_eq!(fixture.remote.open_watches(), 1);
        assert_eq!(drain(&fixture.queue).await, vec![ResourceKey::new("team-a", "a")]);

        fixture.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_is_enqueued() {
        let fixture = start(vec![secret("a", "uid-a", "3")]);
        settle().await;
        drain(&fixture.queue).await;

        fixture
            .remote
            .emit(|| WatchEvent::Deleted(secret("a", "uid-a", "5")));
        settle().await;

        assert!(fixture.cache.is_empty());
        assert_eq!(drain(&fixture.queue).await, vec![ResourceKey::new("team-a", "a")]);

        fixture.cancel.cancel();
    }
}
