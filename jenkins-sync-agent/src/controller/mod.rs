use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use jenkins_sync_core::resources::key::ResourceKey;
use kube::Resource;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{Cache, CacheHandle, RegistryError},
    config::SyncConfig,
    poll::{poll_until, PollOutcome},
    queue::{rate_limiter::ExponentialBackoff, WorkQueue},
    watch::{ResourceWatch, WatchSource},
};

use self::reconciler::{
    context::SyncContext, error::ReconcilerError,
    jenkinsbinding::JenkinsBindingControllerFactory, pipeline::PipelineControllerFactory,
    pipelineconfig::PipelineConfigControllerFactory,
};

pub mod reconciler;

/// What to do with a key after a successful reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// nothing to do until the object changes
    AwaitChange,
    RequeueAfter(Duration),
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &ResourceKey) -> Result<Action, ReconcilerError>;
}

/// Builds a fresh controller every time the manager starts.
pub trait ControllerFactory: Send + Sync {
    fn kind(&self) -> &'static str;
    fn create(&self, context: &Arc<SyncContext>) -> Result<Controller, RegistryError>;
}

pub fn default_factories() -> Vec<Arc<dyn ControllerFactory>> {
    vec![
        Arc::new(JenkinsBindingControllerFactory),
        Arc::new(PipelineConfigControllerFactory),
        Arc::new(PipelineControllerFactory),
    ]
}

/// Binds a watch source, a work queue and a reconciler for one resource kind.
pub struct Controller {
    kind: &'static str,
    queue: Arc<WorkQueue>,
    cache: Arc<dyn CacheHandle>,
    watch: Arc<dyn ResourceWatch>,
    reconciler: Arc<dyn Reconciler>,
    workers: usize,
    max_retries: u32,
    sync_interval: Duration,
    sync_timeout: Duration,
}

impl Controller {
    pub fn new<K>(
        cache: Arc<Cache<K>>,
        reconciler: Arc<dyn Reconciler>,
        config: &SyncConfig,
    ) -> Self
    where
        K: Resource + Send + Sync + 'static,
    {
        let kind = cache.kind();
        let queue = WorkQueue::new(
            kind,
            ExponentialBackoff::new(config.backoff_base, config.backoff_cap),
        );
        let watch = Arc::new(WatchSource::new(
            cache.clone(),
            queue.clone(),
            config.scopes(),
        ));

        Self {
            kind,
            queue,
            cache,
            watch,
            reconciler,
            workers: config.workers.max(1),
            max_retries: config.max_retries,
            sync_interval: config.sync_interval,
            sync_timeout: config.sync_timeout,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn watch(&self) -> Arc<dyn ResourceWatch> {
        self.watch.clone()
    }

    /// Waits for the cache, then processes keys with the configured number of
    /// workers until `cancel` fires or the queue shuts down.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let cache = self.cache.clone();
        let ready = poll_until(self.sync_interval, self.sync_timeout, &cancel, || {
            let cache = cache.clone();
            async move { cache.has_synced() }
        })
        .await;

        if ready != PollOutcome::Ready {
            warn!("{} cache isn't ready ({ready:?}), not starting workers", self.kind);
            return;
        }

        info!("Starting {} {} controller workers...", self.workers, self.kind);

        let workers: Vec<_> = (0..self.workers)
            .map(|_| tokio::spawn(self.clone().work(cancel.clone())))
            .collect();

        for worker in workers {
            if let Err(err) = worker.await {
                error!("{} controller worker crashed! {err:?}", self.kind);
            }
        }

        info!("{} controller stopped", self.kind);
    }

    async fn work(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let key = tokio::select! {
                _ = cancel.cancelled() => break,
                key = self.queue.get() => key,
            };

            let Some(key) = key else {
                break;
            };

            let result = self.reconciler.reconcile(&key).await;
            self.handle_result(key, result);
        }
    }

    fn handle_result(&self, key: ResourceKey, result: Result<Action, ReconcilerError>) {
        match result {
            Ok(action) => {
                info!(
                    "Reconciled {} '{}' in '{}' namespace. Next action: {:?}",
                    self.kind.to_lowercase(),
                    key.name,
                    key.namespace_or_default(),
                    action
                );

                match action {
                    Action::AwaitChange => self.queue.forget(&key),
                    Action::RequeueAfter(delay) => {
                        self.queue.forget(&key);
                        self.queue.add_after(key.clone(), delay);
                    }
                }
            }
            Err(err) if err.class().is_retryable() => {
                warn!(
                    "{} reconciliation failed for '{}' (namespace {}): {}",
                    self.kind,
                    key.name,
                    key.namespace_or_default(),
                    err
                );

                return self.requeue_rate_limited(key);
            }
            Err(err) => {
                error!(
                    "{} reconciliation failed for '{}' (namespace {}), giving up: {}",
                    self.kind,
                    key.name,
                    key.namespace_or_default(),
                    err
                );

                self.queue.forget(&key);
            }
        }

        self.queue.done(&key);
    }

    fn requeue_rate_limited(&self, key: ResourceKey) {
        if self.queue.num_requeues(&key) >= self.max_retries {
            error!(
                "Dropping {} '{key}' after {} retries!",
                self.kind, self.max_retries
            );
            self.queue.forget(&key);
        } else {
            debug!("Requeueing {} '{key}'", self.kind);
            self.queue.add_rate_limited(key.clone());
        }

        self.queue.done(&key);
    }
}
