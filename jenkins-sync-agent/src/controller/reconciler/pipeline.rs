use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use jenkins_sync_core::{
    helpers::RequireMetadata,
    resources::{
        crd::v1alpha1::{
            jenkinsbinding::JenkinsBinding,
            pipeline::{Pipeline, PipelineJenkinsStatus, PipelinePhase, PipelineStatus},
        },
        key::ResourceKey,
    },
};
use kube::ResourceExt;
use log::{debug, info, warn};

use crate::{
    cache::{Cache, RegistryError},
    controller::{Action, Controller, ControllerFactory, Reconciler},
    jobs::JobModelError,
};

use super::{context::SyncContext, error::ReconcilerError};

const MISSING_JOB_REQUEUE_SECS: u64 = 10;

/// Queues a build for every new `Pipeline` bound to our Jenkins.
pub struct PipelineReconciler {
    context: Arc<SyncContext>,
    pipelines: Arc<Cache<Pipeline>>,
    bindings: Arc<Cache<JenkinsBinding>>,
}

impl PipelineReconciler {
    pub fn new(context: Arc<SyncContext>) -> Result<Self, RegistryError> {
        Ok(Self {
            pipelines: context.registry.require()?,
            bindings: context.registry.require()?,
            context,
        })
    }

    fn is_owned(&self, pipeline: &Pipeline, namespace: &str) -> Result<bool, ReconcilerError> {
        if !self.bindings.has_synced() {
            return Err(ReconcilerError::CacheNotSynced(self.bindings.kind()));
        }

        let binding_key = ResourceKey::new(namespace, &pipeline.spec.jenkins_binding.name);

        Ok(self
            .bindings
            .get(&binding_key)
            .map(|binding| binding.is_bound_to(&self.context.config.jenkins_service))
            .unwrap_or(false))
    }

    async fn mark_queued(&self, pipeline: &Pipeline, build: u64) -> Result<(), ReconcilerError> {
        let annotation = self.context.annotation_domain().pipeline_build();
        let build = build.to_string();
        let mut pipeline = pipeline.clone();

        if pipeline.annotations().get(&annotation) != Some(&build) {
            pipeline.annotations_mut().insert(annotation, build.clone());
            pipeline = self.pipelines.update(&pipeline).await?;
        }

        pipeline.status = Some(PipelineStatus {
            phase: PipelinePhase::Queued,
            jenkins: Some(PipelineJenkinsStatus {
                build: Some(build),
                status: None,
            }),
            started_at: Some(Utc::now()),
            message: Some(PipelinePhase::Queued.to_string()),
        });
        self.pipelines.update_status(&pipeline).await?;

        Ok(())
    }

    async fn mark_cancelled(&self, pipeline: &Pipeline, reason: String) -> Result<(), ReconcilerError> {
        let mut pipeline = pipeline.clone();
        pipeline.status = Some(PipelineStatus {
            phase: PipelinePhase::Cancelled,
            message: Some(reason),
            ..pipeline.status.take().unwrap_or_default()
        });
        self.pipelines.update_status(&pipeline).await?;

        Ok(())
    }
}

#[async_trait]
impl Reconciler for PipelineReconciler {
    async fn reconcile(&self, key: &ResourceKey) -> Result<Action, ReconcilerError> {
        let Some(pipeline) = self.pipelines.get(key) else {
            return Ok(Action::AwaitChange);
        };

        if pipeline.phase() != PipelinePhase::Pending {
            return Ok(Action::AwaitChange);
        }

        let namespace = pipeline.require_namespace_or(ReconcilerError::MissingObjectMetadata)?;
        if !self.is_owned(&pipeline, namespace)? {
            debug!("Pipeline '{key}' isn't bound to this Jenkins, skipping");
            return Ok(Action::AwaitChange);
        }

        let uid = pipeline.require_uid_or(ReconcilerError::MissingObjectMetadata)?;
        let job = ResourceKey::new(namespace, &pipeline.spec.pipeline_config.name);

        if !self.context.jobs.find_job(&job).await {
            debug!("Job '{job}' doesn't exist yet, Pipeline '{key}' has to wait");
            return Ok(Action::RequeueAfter(Duration::from_secs(
                MISSING_JOB_REQUEUE_SECS,
            )));
        }

        match self.context.jobs.trigger_build(&job, uid).await {
            Ok(trigger) => {
                if trigger.created {
                    info!("Queued build #{} of job '{job}' for Pipeline '{key}'", trigger.number);
                }

                self.mark_queued(&pipeline, trigger.number).await?;
            }
            Err(error @ JobModelError::JobDisabled(_)) => {
                warn!("Pipeline '{key}' won't run: {error}");
                self.mark_cancelled(&pipeline, error.to_string()).await?;
            }
            Err(error) => return Err(error.into()),
        }

        Ok(Action::AwaitChange)
    }
}

pub struct PipelineControllerFactory;

impl ControllerFactory for PipelineControllerFactory {
    fn kind(&self) -> &'static str {
        "Pipeline"
    }

    fn create(&self, context: &Arc<SyncContext>) -> Result<Controller, RegistryError> {
        let reconciler = PipelineReconciler::new(context.clone())?;
        let cache = reconciler.pipelines.clone();

        Ok(Controller::new(cache, Arc::new(reconciler), &context.config))
    }
}
