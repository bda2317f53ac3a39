use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    controller::{reconciler::context::SyncContext, Controller, ControllerFactory},
    gate::BootstrapGate,
    heartbeat::{HeartbeatSource, Monitored},
    poll::{poll_until, PollOutcome},
    secret::LegacyWatcher,
    watch::supervise,
};

pub const MANAGER_UP_GAUGE: &str = "jenkins_sync_manager_up";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Starting,
    WaitingForPrerequisites,
    WaitingForCacheSync,
    Running,
    Restarting,
}

impl Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerState::Idle => f.write_str("idle"),
            ManagerState::Starting => f.write_str("starting"),
            ManagerState::WaitingForPrerequisites => f.write_str("waiting for prerequisites"),
            ManagerState::WaitingForCacheSync => f.write_str("waiting for cache sync"),
            ManagerState::Running => f.write_str("running"),
            ManagerState::Restarting => f.write_str("restarting"),
        }
    }
}

enum RunOutcome {
    Stopped,
    Restart,
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    context: Arc<SyncContext>,
    gate: BootstrapGate,
    factories: Vec<Arc<dyn ControllerFactory>>,
    legacy: Vec<Arc<dyn LegacyWatcher>>,
    state: Mutex<ManagerState>,
    status: Mutex<Option<String>>,
    started: AtomicBool,
    run: tokio::sync::Mutex<Option<RunHandle>>,
}

/// Owns the lifecycle of every controller and watch.
#[derive(Clone)]
pub struct ControllerManager {
    inner: Arc<Inner>,
}

impl ControllerManager {
    pub fn new(
        context: Arc<SyncContext>,
        gate: BootstrapGate,
        factories: Vec<Arc<dyn ControllerFactory>>,
        legacy: Vec<Arc<dyn LegacyWatcher>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                gate,
                factories,
                legacy,
                state: Mutex::new(ManagerState::Idle),
                status: Mutex::new(None),
                started: AtomicBool::new(false),
                run: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Spawns the run loop unless one is active already.
    pub async fn start(&self) {
        let mut run = self.inner.run.lock().await;
        self.spawn_run(&mut run);
    }

    /// Stops every controller and watch. Returns once all of them are joined.
    pub async fn shutdown(&self, reason: Option<&str>) {
        if let Some(reason) = reason {
            info!("Shutting down controller manager: {reason}");
        }

        let mut run = self.inner.run.lock().await;
        self.stop_run(&mut run).await;
        self.set_state(ManagerState::Idle);
    }

    /// Stops and starts again without letting a concurrent `start` or
    /// `shutdown` in between.
    pub async fn restart(&self) {
        info!("Restarting controller manager...");

        let mut run = self.inner.run.lock().await;
        self.set_state(ManagerState::Restarting);
        self.stop_run(&mut run).await;
        self.spawn_run(&mut run);
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Why the manager isn't running, `None` when it is.
    pub fn manager_status(&self) -> Option<String> {
        self.inner
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_run(&self, run: &mut Option<RunHandle>) {
        if let Some(handle) = run.as_ref() {
            if !handle.task.is_finished() {
                debug!("Controller manager is already started");
                return;
            }
        }

        info!("Starting controller manager...");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.clone().run(cancel.clone()));

        *run = Some(RunHandle { cancel, task });
    }

    async fn stop_run(&self, run: &mut Option<RunHandle>) {
        if let Some(handle) = run.take() {
            handle.cancel.cancel();

            if let Err(err) = handle.task.await {
                error!("Controller manager crashed! {err:?}");
            }
        }

        self.set_started(false);
    }

    fn set_state(&self, state: ManagerState) {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) = state;

        match self.manager_status() {
            Some(status) if !self.is_started() => {
                info!("Controller manager is {state}, last status: {status}")
            }
            _ => debug!("Controller manager is {state}"),
        }
    }

    fn set_status(&self, status: Option<String>) {
        *self.inner.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    fn set_started(&self, started: bool) {
        self.inner.started.store(started, Ordering::SeqCst);
        metrics::gauge!(
            MANAGER_UP_GAUGE,
            if started { 1.0 } else { 0.0 },
            "jenkins" => self.inner.context.config.jenkins_service.clone()
        );
    }

    async fn run(self, cancel: CancellationToken) {
        loop {
            match self.run_once(&cancel).await {
                RunOutcome::Stopped => break,
                RunOutcome::Restart => self.set_state(ManagerState::Restarting),
            }
        }
    }

    async fn run_once(&self, cancel: &CancellationToken) -> RunOutcome {
        let context = &self.inner.context;
        let config = &context.config;

        self.set_state(ManagerState::Starting);

        let controllers = match self
            .inner
            .factories
            .iter()
            .map(|factory| {
                info!("Creating {} controller...", factory.kind());
                factory.create(context).map(Arc::new)
            })
            .collect::<Result<Vec<Arc<Controller>>, _>>()
        {
            Ok(controllers) => controllers,
            Err(err) => {
                error!("Couldn't create controllers! Reason: {err}");
                self.set_status(Some(err.to_string()));
                self.set_state(ManagerState::Idle);
                return RunOutcome::Stopped;
            }
        };

        self.set_state(ManagerState::WaitingForPrerequisites);

        let manager = self;
        let gate = poll_until(config.gate_interval, config.gate_timeout, cancel, || async move {
            manager.check_gate().await
        })
        .await;

        match gate {
            PollOutcome::Ready => (),
            PollOutcome::Cancelled => return RunOutcome::Stopped,
            PollOutcome::TimedOut => {
                warn!("Prerequisites weren't met in time, giving up!");
                self.set_state(ManagerState::Idle);
                return RunOutcome::Stopped;
            }
        }

        let workers = cancel.child_token();
        let mut tasks = Vec::new();

        for controller in &controllers {
            tasks.push(tokio::spawn(supervise(
                controller.watch(),
                workers.clone(),
                config.backoff_base,
                config.backoff_cap,
            )));
        }

        for watcher in &self.inner.legacy {
            debug!("Spawning {} watcher...", watcher.name());
            tasks.push(watcher.clone().spawn(workers.clone()));
        }

        self.set_state(ManagerState::WaitingForCacheSync);

        let registry = &context.registry;
        let synced = poll_until(config.sync_interval, config.sync_timeout, cancel, || async move {
            registry.all_registered_synced()
        })
        .await;

        match synced {
            PollOutcome::Ready => (),
            PollOutcome::Cancelled => {
                self.teardown(&workers, &controllers, tasks).await;
                return RunOutcome::Stopped;
            }
            PollOutcome::TimedOut => {
                warn!("Caches didn't sync in time, restarting...");
                self.teardown(&workers, &controllers, tasks).await;
                return RunOutcome::Restart;
            }
        }

        for controller in &controllers {
            tasks.push(tokio::spawn(controller.clone().run(workers.clone())));
        }

        self.set_status(None);
        self.set_started(true);
        self.set_state(ManagerState::Running);
        info!(
            "Controller manager is running ({})",
            context.registry.kinds().join(", ")
        );

        cancel.cancelled().await;
        self.teardown(&workers, &controllers, tasks).await;

        RunOutcome::Stopped
    }

    async fn check_gate(&self) -> bool {
        match self.inner.gate.check().await {
            Ok(domain) => {
                info!("Prerequisites met, using '{}' annotation domain", domain.domain());
                self.inner.context.set_annotation_domain(domain);
                true
            }
            Err(err) => {
                warn!("Prerequisites not met: {err}");
                self.set_status(Some(err.to_string()));
                false
            }
        }
    }

    async fn teardown(
        &self,
        workers: &CancellationToken,
        controllers: &[Arc<Controller>],
        tasks: Vec<JoinHandle<()>>,
    ) {
        workers.cancel();

        for controller in controllers {
            controller.queue().shutdown();
        }

        for task in tasks {
            if let Err(err) = task.await {
                error!("Controller task crashed! {err:?}");
            }
        }

        self.inner.context.registry.clear_all();
        self.set_started(false);
    }
}

#[async_trait]
impl Monitored for ControllerManager {
    fn is_running(&self) -> bool {
        self.is_started()
    }

    fn heartbeat_sources(&self) -> Vec<Arc<dyn HeartbeatSource>> {
        let mut sources = self.inner.context.registry.heartbeat_sources();
        sources.extend(
            self.inner
                .legacy
                .iter()
                .map(|watcher| watcher.clone().heartbeat()),
        );

        sources
    }

    async fn restart(&self) {
        ControllerManager::restart(self).await
    }
}
