use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use jenkins_sync_core::resources::{
    crd::v1alpha1::pipelineconfig::PipelineConfigSpec, key::ResourceKey,
};
use thiserror::Error;

/// Identity of the resource a job was materialised from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobBinding {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub resource_version: String,
}

/// What the job model needs to know to render a job. The rendering itself
/// happens on the other side of `JobModel`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobDefinition {
    pub jenkinsfile: Option<String>,
    pub jenkinsfile_path: Option<String>,
    pub git_uri: Option<String>,
    pub git_ref: Option<String>,
    pub credentials: Option<String>,
    pub parameters: Vec<(String, String)>,
    pub disabled: bool,
}

impl From<&PipelineConfigSpec> for JobDefinition {
    fn from(spec: &PipelineConfigSpec) -> Self {
        let git = spec.source.as_ref().and_then(|source| source.git.as_ref());

        Self {
            jenkinsfile: spec.strategy.jenkins.jenkinsfile.clone(),
            jenkinsfile_path: spec.strategy.jenkins.jenkinsfile_path.clone(),
            git_uri: git.map(|git| git.uri.clone()),
            git_ref: git.and_then(|git| git.ref_.clone()),
            credentials: spec
                .source
                .as_ref()
                .and_then(|source| source.secret.as_ref())
                .map(|secret| secret.name.clone()),
            parameters: spec
                .parameters
                .iter()
                .map(|parameter| (parameter.name.clone(), parameter.value.clone()))
                .collect(),
            disabled: spec.disabled.unwrap_or(false),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildTrigger {
    pub number: u64,
    /// `false` when the pipeline already had a build
    pub created: bool,
}

#[derive(Debug, Error)]
pub enum JobModelError {
    #[error("Jenkins is not ready!")]
    NotReady,
    #[error("Job '{}' doesn't exist!", .0)]
    JobNotFound(ResourceKey),
    #[error("Job '{}' already exists!", .0)]
    JobExists(ResourceKey),
    #[error("Job '{}' is disabled!", .0)]
    JobDisabled(ResourceKey),
}

/// Local job model, keyed like the resources: folder = namespace, job = name.
#[async_trait]
pub trait JobModel: Send + Sync {
    async fn is_ready(&self) -> bool;
    async fn ensure_folder(&self, folder: &str) -> Result<(), JobModelError>;
    async fn find_job(&self, key: &ResourceKey) -> bool;
    async fn create_job(
        &self,
        key: &ResourceKey,
        definition: JobDefinition,
        binding: JobBinding,
    ) -> Result<(), JobModelError>;
    async fn update_job(
        &self,
        key: &ResourceKey,
        definition: JobDefinition,
        binding: JobBinding,
    ) -> Result<(), JobModelError>;
    /// `Ok(false)` when there was nothing to delete.
    async fn delete_job(&self, key: &ResourceKey) -> Result<bool, JobModelError>;
    async fn definition(&self, key: &ResourceKey) -> Option<JobDefinition>;
    async fn binding(&self, key: &ResourceKey) -> Option<JobBinding>;
    async fn set_binding(&self, key: &ResourceKey, binding: JobBinding)
        -> Result<(), JobModelError>;
    /// Queues a build of the job for a pipeline. Idempotent per pipeline uid.
    async fn trigger_build(
        &self,
        key: &ResourceKey,
        pipeline_uid: &str,
    ) -> Result<BuildTrigger, JobModelError>;
}

struct Job {
    definition: JobDefinition,
    binding: JobBinding,
    next_build: u64,
}

#[derive(Default)]
struct Jobs {
    folders: BTreeSet<String>,
    jobs: BTreeMap<ResourceKey, Job>,
    builds: HashMap<String, u64>,
}

/// Job model kept in memory, standing in for the host's persistence.
#[derive(Default)]
pub struct InMemoryJobModel {
    ready: AtomicBool,
    jobs: Mutex<Jobs>,
    writes: AtomicUsize,
}

impl InMemoryJobModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ready() -> Arc<Self> {
        let model = Self::new();
        model.set_ready(true);

        model
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn written(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn check_ready(&self) -> Result<(), JobModelError> {
        match self.ready.load(Ordering::SeqCst) {
            true => Ok(()),
            false => Err(JobModelError::NotReady),
        }
    }
}

#[cfg(test)]
impl InMemoryJobModel {
    /// Number of job and build mutations, bindings excluded.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<ResourceKey> {
        self.lock().jobs.keys().cloned().collect()
    }

    pub fn folders(&self) -> Vec<String> {
        self.lock().folders.iter().cloned().collect()
    }
}

#[async_trait]
impl JobModel for InMemoryJobModel {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn ensure_folder(&self, folder: &str) -> Result<(), JobModelError> {
        self.check_ready()?;

        if self.lock().folders.insert(folder.to_owned()) {
            self.written();
        }

        Ok(())
    }

    async fn find_job(&self, key: &ResourceKey) -> bool {
        self.lock().jobs.contains_key(key)
    }

    async fn create_job(
        &self,
        key: &ResourceKey,
        definition: JobDefinition,
        binding: JobBinding,
    ) -> Result<(), JobModelError> {
        self.check_ready()?;
        let mut jobs = self.lock();

        if jobs.jobs.contains_key(key) {
            return Err(JobModelError::JobExists(key.clone()));
        }

        jobs.jobs.insert(
            key.clone(),
            Job {
                definition,
                binding,
                next_build: 1,
            },
        );
        self.written();

        Ok(())
    }

    async fn update_job(
        &self,
        key: &ResourceKey,
        definition: JobDefinition,
        binding: JobBinding,
    ) -> Result<(), JobModelError> {
        self.check_ready()?;
        let mut jobs = self.lock();
        let job = jobs
            .jobs
            .get_mut(key)
            .ok_or_else(|| JobModelError::JobNotFound(key.clone()))?;

        job.definition = definition;
        job.binding = binding;
        self.written();

        Ok(())
    }

    async fn delete_job(&self, key: &ResourceKey) -> Result<bool, JobModelError> {
        self.check_ready()?;
        let deleted = self.lock().jobs.remove(key).is_some();

        if deleted {
            self.written();
        }

        Ok(deleted)
    }

    async fn definition(&self, key: &ResourceKey) -> Option<JobDefinition> {
        self.lock().jobs.get(key).map(|job| job.definition.clone())
    }

    async fn binding(&self, key: &ResourceKey) -> Option<JobBinding> {
        self.lock().jobs.get(key).map(|job| job.binding.clone())
    }

    async fn set_binding(
        &self,
        key: &ResourceKey,
        binding: JobBinding,
    ) -> Result<(), JobModelError> {
        self.lock()
            .jobs
            .get_mut(key)
            .ok_or_else(|| JobModelError::JobNotFound(key.clone()))?
            .binding = binding;

        Ok(())
    }

    async fn trigger_build(
        &self,
        key: &ResourceKey,
        pipeline_uid: &str,
    ) -> Result<BuildTrigger, JobModelError> {
        self.check_ready()?;
        let mut jobs = self.lock();

        if let Some(number) = jobs.builds.get(pipeline_uid) {
            return Ok(BuildTrigger {
                number: *number,
                created: false,
            });
        }

        let job = jobs
            .jobs
            .get_mut(key)
            .ok_or_else(|| JobModelError::JobNotFound(key.clone()))?;

        if job.definition.disabled {
            return Err(JobModelError::JobDisabled(key.clone()));
        }

        let number = job.next_build;
        job.next_build += 1;
        jobs.builds.insert(pipeline_uid.to_owned(), number);
        self.written();

        Ok(BuildTrigger {
            number,
            created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use jenkins_sync_core::resources::key::ResourceKey;

    use super::{InMemoryJobModel, JobBinding, JobDefinition, JobModel, JobModelError};

    fn binding(version: &str) -> JobBinding {
        JobBinding {
            namespace: "team-a".to_owned(),
            name: "build".to_owned(),
            uid: "uid-1".to_owned(),
            resource_version: version.to_owned(),
        }
    }

    #[tokio::test]
    async fn builds_are_triggered_once_per_pipeline() {
        let model = InMemoryJobModel::ready();
        let key = ResourceKey::new("team-a", "build");

        model
            .create_job(&key, JobDefinition::default(), binding("1"))
            .await
            .unwrap();

        let first = model.trigger_build(&key, "pipeline-1").await.unwrap();
        let again = model.trigger_build(&key, "pipeline-1").await.unwrap();
        let second = model.trigger_build(&key, "pipeline-2").await.unwrap();

        assert_eq!((first.number, first.created), (1, true));
        assert_eq!((again.number, again.created), (1, false));
        assert_eq!(second.number, 2);
    }

    #[tokio::test]
    async fn writes_require_a_ready_model() {
        let model = InMemoryJobModel::new();
        let key = ResourceKey::new("team-a", "build");

        let result = model
            .create_job(&key, JobDefinition::default(), binding("1"))
            .await;

        assert!(matches!(result, Err(JobModelError::NotReady)));
        assert!(!model.find_job(&key).await);
    }

    #[tokio::test]
    async fn deleting_a_missing_job_is_not_an_error() {
        let model = InMemoryJobModel::ready();

        assert!(!model
            .delete_job(&ResourceKey::new("team-a", "build"))
            .await
            .unwrap());
        assert_eq!(model.writes(), 0);
    }
}
