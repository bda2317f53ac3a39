use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jenkins_sync_core::{
    helpers::RequireMetadata,
    resources::{
        crd::v1alpha1::{
            jenkinsbinding::JenkinsBinding,
            pipeline::{Pipeline, PipelinePhase},
            pipelineconfig::{PipelineConfig, PipelineConfigPhase, PipelineConfigStatus},
        },
        key::ResourceKey,
        version::is_newer,
    },
};
use kube::{Resource, ResourceExt};
use log::{debug, info};

use crate::{
    cache::{Cache, RegistryError},
    controller::{Action, Controller, ControllerFactory, Reconciler},
    error::ApiError,
    jobs::JobDefinition,
};

use super::{context::SyncContext, error::ReconcilerError, job_binding};

/// Materialises `PipelineConfig` objects bound to our Jenkins as jobs.
pub struct PipelineConfigReconciler {
    context: Arc<SyncContext>,
    configs: Arc<Cache<PipelineConfig>>,
    pipelines: Arc<Cache<Pipeline>>,
    bindings: Arc<Cache<JenkinsBinding>>,
}

impl PipelineConfigReconciler {
    pub fn new(context: Arc<SyncContext>) -> Result<Self, RegistryError> {
        Ok(Self {
            configs: context.registry.require()?,
            pipelines: context.registry.require()?,
            bindings: context.registry.require()?,
            context,
        })
    }

    fn is_owned(&self, namespace: &str, binding: &str) -> Result<bool, ReconcilerError> {
        if !self.bindings.has_synced() {
            return Err(ReconcilerError::CacheNotSynced(self.bindings.kind()));
        }

        let binding_key = ResourceKey::new(namespace, binding);

        Ok(self
            .bindings
            .get(&binding_key)
            .map(|binding| binding.is_bound_to(&self.context.config.jenkins_service))
            .unwrap_or(false))
    }

    async fn sync_job(
        &self,
        key: &ResourceKey,
        config: &PipelineConfig,
    ) -> Result<(), ReconcilerError> {
        let namespace = config.require_namespace_or(ReconcilerError::MissingObjectMetadata)?;
        let uid = config.require_uid_or(ReconcilerError::MissingObjectMetadata)?;
        let version = config
            .meta()
            .resource_version
            .as_deref()
            .ok_or(ReconcilerError::MissingObjectMetadata)?;

        let jobs = &self.context.jobs;
        let binding = job_binding(key, uid, version);
        let definition = JobDefinition::from(&config.spec);

        jobs.ensure_folder(namespace).await?;

        let Some(current) = jobs.binding(key).await else {
            info!("Creating job '{key}'...");
            return Ok(jobs.create_job(key, definition, binding).await?);
        };

        if current.uid != uid {
            info!("Replacing job '{key}', its config was recreated...");
            return Ok(jobs.update_job(key, definition, binding).await?);
        }

        if current.resource_version != version && !is_newer(version, &current.resource_version) {
            debug!(
                "Job '{key}' is already at version {}, skipping {version}",
                current.resource_version
            );
            return Ok(());
        }

        if jobs.definition(key).await.as_ref() != Some(&definition) {
            info!("Updating job '{key}'...");
            jobs.update_job(key, definition, binding).await?;
        } else if current.resource_version != version {
            jobs.set_binding(key, binding).await?;
        }

        Ok(())
    }

    async fn sync_status(&self, config: &PipelineConfig) -> Result<(), ReconcilerError> {
        let phase = match config.is_disabled() {
            true => PipelineConfigPhase::Disabled,
            false => PipelineConfigPhase::Ready,
        };

        if config.phase() == Some(&phase) {
            return Ok(());
        }

        let mut config = config.clone();
        config.status = Some(PipelineConfigStatus {
            message: Some(phase.to_string()),
            phase,
            last_updated: Some(Utc::now()),
        });

        self.configs.update_status(&config).await?;

        Ok(())
    }

    /// Pending pipelines of a deleted config can never be scheduled.
    async fn delete_orphaned_pipelines(&self, key: &ResourceKey) -> Result<(), ReconcilerError> {
        if !self.pipelines.has_synced() {
            return Err(ReconcilerError::CacheNotSynced(self.pipelines.kind()));
        }

        let namespace = key.namespace_or_default();
        let orphans = self.pipelines.list().into_iter().filter(|pipeline| {
            pipeline.namespace().as_deref() == Some(namespace)
                && pipeline.spec.pipeline_config.name == key.name
                && pipeline.phase() == PipelinePhase::Pending
        });

        for pipeline in orphans {
            if !self.is_owned(namespace, &pipeline.spec.jenkins_binding.name)? {
                continue;
            }

            let Some(pipeline_key) = ResourceKey::from_resource(&*pipeline) else {
                continue;
            };

            match self.pipelines.delete(&pipeline_key).await {
                Ok(()) => info!("Deleted Pipeline '{pipeline_key}', its config is gone"),
                // already gone
                Err(ApiError::NotFound(_)) => (),
                Err(error) => return Err(error.into()),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Reconciler for PipelineConfigReconciler {
    async fn reconcile(&self, key: &ResourceKey) -> Result<Action, ReconcilerError> {
        let Some(config) = self.configs.get(key) else {
            if self.context.jobs.delete_job(key).await? {
                info!("Deleted job '{key}', its config is gone");
            }
            self.delete_orphaned_pipelines(key).await?;

            return Ok(Action::AwaitChange);
        };

        let namespace = config.require_namespace_or(ReconcilerError::MissingObjectMetadata)?;
        if !self.is_owned(namespace, &config.spec.jenkins_binding.name)? {
            debug!("PipelineConfig '{key}' isn't bound to this Jenkins, skipping");
            return Ok(Action::AwaitChange);
        }

        self.sync_job(key, &config).await?;
        self.sync_status(&config).await?;

        Ok(Action::AwaitChange)
    }
}

pub struct PipelineConfigControllerFactory;

impl ControllerFactory for PipelineConfigControllerFactory {
    fn kind(&self) -> &'static str {
        "PipelineConfig"
    }

    fn create(&self, context: &Arc<SyncContext>) -> Result<Controller, RegistryError> {
        let reconciler = PipelineConfigReconciler::new(context.clone())?;
        let cache = reconciler.configs.clone();

        Ok(Controller::new(cache, Arc::new(reconciler), &context.config))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jenkins_sync_core::resources::{
        crd::v1alpha1::{
            jenkinsbinding::{JenkinsBinding, JenkinsBindingSpec},
            pipeline::{Pipeline, PipelinePhase, PipelineSpec, PipelineStatus},
            pipelineconfig::{
                JenkinsPipelineStrategy, PipelineConfig, PipelineConfigPhase, PipelineConfigSpec,
                PipelineConfigStatus, PipelineStrategy,
            },
            LocalObjectReference,
        },
        key::ResourceKey,
    };
    use kube::core::ObjectMeta;

    use crate::{
        cache::{Cache, ClientRegistry},
        config::SyncConfig,
        controller::{Action, Reconciler},
        jobs::{InMemoryJobModel, JobBinding, JobDefinition, JobModel},
        remote::testing::FakeRemote,
    };

    use super::{PipelineConfigReconciler, SyncContext};

    fn meta(name: &str, uid: &str, version: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some("team-a".to_owned()),
            uid: Some(uid.to_owned()),
            resource_version: Some(version.to_owned()),
            ..Default::default()
        }
    }

    fn config(jenkinsfile: &str) -> PipelineConfig {
        PipelineConfig {
            metadata: meta("build", "uid-build", "3"),
            spec: PipelineConfigSpec {
                jenkins_binding: LocalObjectReference {
                    name: "binding".to_owned(),
                },
                strategy: PipelineStrategy {
                    jenkins: JenkinsPipelineStrategy {
                        jenkinsfile: Some(jenkinsfile.to_owned()),
                        jenkinsfile_path: None,
                    },
                },
                ..Default::default()
            },
            status: None,
        }
    }

    fn binding(jenkins: &str) -> JenkinsBinding {
        JenkinsBinding {
            metadata: meta("binding", "uid-binding", "2"),
            spec: JenkinsBindingSpec {
                jenkins: LocalObjectReference {
                    name: jenkins.to_owned(),
                },
                account: None,
            },
            status: None,
        }
    }

    fn pipeline(name: &str, config: &str, phase: PipelinePhase) -> Pipeline {
        Pipeline {
            metadata: meta(name, &format!("uid-{name}"), "5"),
            spec: PipelineSpec {
                pipeline_config: LocalObjectReference {
                    name: config.to_owned(),
                },
                jenkins_binding: LocalObjectReference {
                    name: "binding".to_owned(),
                },
                ..Default::default()
            },
            status: Some(PipelineStatus {
                phase,
                ..Default::default()
            }),
        }
    }

    struct Fixture {
        remote: Arc<FakeRemote<PipelineConfig>>,
        pipelines: Arc<FakeRemote<Pipeline>>,
        configs: Arc<Cache<PipelineConfig>>,
        jobs: Arc<InMemoryJobModel>,
        reconciler: PipelineConfigReconciler,
    }

    fn fixture(config: PipelineConfig, binding: JenkinsBinding) -> Fixture {
        fixture_with_pipelines(config, binding, Vec::new())
    }

    fn fixture_with_pipelines(
        config: PipelineConfig,
        binding: JenkinsBinding,
        runs: Vec<Pipeline>,
    ) -> Fixture {
        let remote = FakeRemote::with_objects(vec![config.clone()]);
        let configs = Cache::<PipelineConfig>::new(remote.clone());
        let pipelines = FakeRemote::with_objects(runs.clone());
        let pipeline_cache = Cache::<Pipeline>::new(pipelines.clone());
        let bindings = Cache::<JenkinsBinding>::new(FakeRemote::with_objects(vec![binding.clone()]));
        configs.apply(config);
        pipeline_cache.replace(runs);
        bindings.apply(binding);

        let registry = ClientRegistry::new();
        registry.register(configs.clone()).unwrap();
        pipeline_cache.mark_synced();
        registry.register(pipeline_cache).unwrap();
        bindings.mark_synced();
        registry.register(bindings).unwrap();

        let jobs = InMemoryJobModel::ready();
        let context = SyncContext::new(
            SyncConfig {
                jenkins_service: "jenkins".to_owned(),
                ..Default::default()
            },
            registry,
            jobs.clone(),
        );

        Fixture {
            remote,
            pipelines,
            configs,
            jobs,
            reconciler: PipelineConfigReconciler::new(context).unwrap(),
        }
    }

    fn with_version(mut config: PipelineConfig, version: &str) -> PipelineConfig {
        config.metadata.resource_version = Some(version.to_owned());
        config
    }

    fn key() -> ResourceKey {
        ResourceKey::new("team-a", "build")
    }

    /// Feeds the stored object back into the cache, like the watch would.
    fn observe(fixture: &Fixture) {
        fixture.configs.apply(fixture.remote.get(&key()).unwrap());
    }

    #[tokio::test]
    async fn owned_config_becomes_a_ready_job() {
        let fixture = fixture(config("node {}"), binding("jenkins"));

        let action = fixture.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(action, Action::AwaitChange);
        assert!(fixture.jobs.find_job(&key()).await);
        assert_eq!(fixture.jobs.folders(), vec!["team-a".to_owned()]);
        assert_eq!(
            fixture.remote.get(&key()).unwrap().phase(),
            Some(&PipelineConfigPhase::Ready)
        );
    }

    #[tokio::test]
    async fn unchanged_config_is_reconciled_without_side_effects() {
        let fixture = fixture(config("node {}"), binding("jenkins"));

        fixture.reconciler.reconcile(&key()).await.unwrap();
        observe(&fixture);
        let job_writes = fixture.jobs.writes();
        let remote_writes = fixture.remote.writes();

        fixture.reconciler.reconcile(&key()).await.unwrap();
        fixture.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(fixture.jobs.writes(), job_writes);
        assert_eq!(fixture.remote.writes(), remote_writes);
    }

    #[tokio::test]
    async fn config_bound_elsewhere_is_skipped() {
        let fixture = fixture(config("node {}"), binding("other-jenkins"));

        fixture.reconciler.reconcile(&key()).await.unwrap();

        assert!(!fixture.jobs.find_job(&key()).await);
        assert_eq!(fixture.remote.writes(), 0);
    }

    #[tokio::test]
    async fn changed_definition_updates_the_job() {
        let fixture = fixture(config("node {}"), binding("jenkins"));
        fixture.reconciler.reconcile(&key()).await.unwrap();
        observe(&fixture);

        let mut changed = fixture.remote.get(&key()).unwrap();
        changed.spec.strategy.jenkins.jenkinsfile = Some("node { sh 'make' }".to_owned());
        fixture.configs.apply(with_version(changed, "100"));

        fixture.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(
            fixture
                .jobs
                .definition(&key())
                .await
                .and_then(|definition| definition.jenkinsfile),
            Some("node { sh 'make' }".to_owned())
        );
        assert_eq!(
            fixture.jobs.binding(&key()).await.unwrap().resource_version,
            "100"
        );
    }

    fn existing_binding(uid: &str, version: &str) -> JobBinding {
        JobBinding {
            namespace: "team-a".to_owned(),
            name: "build".to_owned(),
            uid: uid.to_owned(),
            resource_version: version.to_owned(),
        }
    }

    #[tokio::test]
    async fn job_bound_to_a_newer_version_is_left_alone() {
        let fixture = fixture(config("node {}"), binding("jenkins"));
        fixture.jobs.ensure_folder("team-a").await.unwrap();
        fixture
            .jobs
            .create_job(
                &key(),
                JobDefinition::default(),
                existing_binding("uid-build", "100"),
            )
            .await
            .unwrap();
        let job_writes = fixture.jobs.writes();

        let mut stale = with_version(config("node { sh 'old' }"), "50");
        stale.status = Some(PipelineConfigStatus {
            phase: PipelineConfigPhase::Ready,
            ..Default::default()
        });
        fixture.configs.replace(vec![stale]);
        let action = fixture.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(action, Action::AwaitChange);
        assert_eq!(fixture.jobs.writes(), job_writes);
        assert_eq!(
            fixture.jobs.definition(&key()).await,
            Some(JobDefinition::default())
        );
        assert_eq!(
            fixture.jobs.binding(&key()).await,
            Some(existing_binding("uid-build", "100"))
        );
    }

    #[tokio::test]
    async fn recreated_config_replaces_the_job() {
        let fixture = fixture(config("node {}"), binding("jenkins"));
        fixture
            .jobs
            .create_job(
                &key(),
                JobDefinition::default(),
                existing_binding("uid-old", "100"),
            )
            .await
            .unwrap();

        fixture.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(
            fixture.jobs.binding(&key()).await,
            Some(existing_binding("uid-build", "3"))
        );
        assert_eq!(
            fixture
                .jobs
                .definition(&key())
                .await
                .and_then(|definition| definition.jenkinsfile),
            Some("node {}".to_owned())
        );
    }

    #[tokio::test]
    async fn removed_config_deletes_the_job() {
        let fixture = fixture(config("node {}"), binding("jenkins"));
        fixture.reconciler.reconcile(&key()).await.unwrap();

        let current = fixture.configs.get(&key()).unwrap();
        fixture
            .configs
            .apply_delete(with_version((*current).clone(), "50"));
        fixture.reconciler.reconcile(&key()).await.unwrap();

        assert!(!fixture.jobs.find_job(&key()).await);
    }

    #[tokio::test]
    async fn pending_pipelines_of_a_removed_config_are_deleted() {
        let fixture = fixture_with_pipelines(
            config("node {}"),
            binding("jenkins"),
            vec![
                pipeline("build-1", "build", PipelinePhase::Complete),
                pipeline("build-2", "build", PipelinePhase::Pending),
                pipeline("deploy-1", "deploy", PipelinePhase::Pending),
            ],
        );
        fixture.reconciler.reconcile(&key()).await.unwrap();

        let current = fixture.configs.get(&key()).unwrap();
        fixture
            .configs
            .apply_delete(with_version((*current).clone(), "50"));
        let action = fixture.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(action, Action::AwaitChange);
        assert!(fixture
            .pipelines
            .get(&ResourceKey::new("team-a", "build-2"))
            .is_none());
        assert!(fixture
            .pipelines
            .get(&ResourceKey::new("team-a", "build-1"))
            .is_some());
        assert!(fixture
            .pipelines
            .get(&ResourceKey::new("team-a", "deploy-1"))
            .is_some());
        assert_eq!(fixture.pipelines.writes(), 1);
    }
}
