use std::{process::exit, sync::Arc};

use jenkins_sync_core::{
    kubernetes::operations::create_client,
    resources::crd::v1alpha1::{
        apply_v1alpha1_crds, jenkinsbinding::JenkinsBinding, pipeline::Pipeline,
        pipelineconfig::PipelineConfig,
    },
};
use k8s_openapi::api::core::v1::Secret;
use kube::{api::PatchParams, Client, Resource};
use log::{error, info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{Cache, ClientRegistry},
    config::SyncConfig,
    controller::{default_factories, reconciler::context::SyncContext},
    credentials::InMemoryCredentialStore,
    gate::{BootstrapGate, KubeJenkinsApi},
    heartbeat::HeartbeatMonitor,
    jobs::InMemoryJobModel,
    manager::ControllerManager,
    remote::{KubeRemote, RemoteApi},
    secret::{LegacyWatcher, SecretWatcher},
};

mod cache;
mod config;
mod controller;
mod credentials;
mod error;
mod gate;
mod heartbeat;
mod jobs;
mod manager;
mod poll;
mod queue;
mod remote;
mod secret;
mod watch;

const FIELD_MANAGER: &str = "jenkins-sync";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    configure_logger();

    let config = get_config();
    configure_metrics(&config);

    let client = create_client(&config.kubeconfig, &config.kube_context).await?;

    if config.apply_crds {
        apply_v1alpha1_crds(&client, &PatchParams::apply(FIELD_MANAGER).force()).await?;
    }

    // no heartbeat, nothing updates these kinds on a schedule
    let registry = ClientRegistry::new();
    registry.register(cache_for::<PipelineConfig>(&client))?;
    registry.register(cache_for::<Pipeline>(&client))?;
    registry.register(cache_for::<JenkinsBinding>(&client))?;

    // the host's job persistence isn't part of this process
    let jobs = InMemoryJobModel::ready();
    let credentials = InMemoryCredentialStore::new();

    let secrets: Arc<dyn LegacyWatcher> = SecretWatcher::new(
        Arc::new(KubeRemote::<Secret>::new(client.clone())),
        credentials,
        config.scopes(),
        config.watcher_alive_check,
    );
    let gate = BootstrapGate::new(
        config.enabled,
        config.jenkins_service.clone(),
        config.fingerprint.clone(),
        Arc::new(KubeJenkinsApi::new(client)),
        jobs.clone(),
    );
    let monitor = HeartbeatMonitor::new(
        config.heartbeat_period,
        config.heartbeat_staleness,
        config.heartbeat_threshold,
    );

    let context = SyncContext::new(config, registry, jobs);
    let manager = ControllerManager::new(context, gate, default_factories(), vec![secrets]);

    manager.start().await;

    let cancel = CancellationToken::new();
    let heartbeat = tokio::spawn(monitor.run(Arc::new(manager.clone()), cancel.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(err) => error!("Couldn't listen for the shutdown signal! {err:?}"),
    }

    cancel.cancel();
    heartbeat.await?;
    manager.shutdown(Some("process is exiting")).await;

    Ok(())
}

fn cache_for<K>(client: &Client) -> Arc<Cache<K>>
where
    K: Resource + Send + Sync + 'static,
    KubeRemote<K>: RemoteApi<K>,
{
    Cache::new(Arc::new(KubeRemote::<K>::new(client.clone())))
}

fn get_config() -> SyncConfig {
    match SyncConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!("Couldn't read the configuration! {error:?}");
            exit(7)
        }
    }
}

fn configure_metrics(config: &SyncConfig) {
    let Some(addr) = config.metrics_addr else {
        return;
    };

    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!("Exporting metrics on {addr}"),
        Err(err) => warn!("Couldn't install the metrics exporter! {err}"),
    }
}

fn configure_logger() {
    env_logger::builder()
        .default_format()
        .format_module_path(false)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init()
}
