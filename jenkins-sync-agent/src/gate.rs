use std::sync::Arc;

use async_trait::async_trait;
use jenkins_sync_core::resources::{annotations::AnnotationDomain, crd::v1alpha1::jenkins::Jenkins};
use kube::{api::PostParams, Api, Client, ResourceExt};
use log::info;
use thiserror::Error;

use crate::{error::ApiError, jobs::JobModel};

#[async_trait]
pub trait JenkinsApi: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Jenkins>, ApiError>;
    async fn update(&self, jenkins: &Jenkins) -> Result<Jenkins, ApiError>;
}

pub struct KubeJenkinsApi {
    api: Api<Jenkins>,
}

impl KubeJenkinsApi {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl JenkinsApi for KubeJenkinsApi {
    async fn get(&self, name: &str) -> Result<Option<Jenkins>, ApiError> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn update(&self, jenkins: &Jenkins) -> Result<Jenkins, ApiError> {
        Ok(self
            .api
            .replace(&jenkins.name_any(), &PostParams::default(), jenkins)
            .await?)
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Jenkins sync is disabled!")]
    Disabled,
    #[error("Jenkins is not ready yet!")]
    HostNotReady,
    #[error("Jenkins service name is not configured!")]
    MissingServiceName,
    #[error("Jenkins service '{}' doesn't exist!", .0)]
    JenkinsNotFound(String),
    #[error("Jenkins service '{}' is already claimed by another instance (fingerprint '{}')!", .0, .1)]
    FingerprintMismatch(String, String),
    #[error("Couldn't access the Jenkins service resource! Reason: {}", .0)]
    Api(ApiError),
}

/// Prerequisites that must hold before any watch is started.
pub struct BootstrapGate {
    enabled: bool,
    jenkins_service: String,
    fingerprint: String,
    jenkins: Arc<dyn JenkinsApi>,
    jobs: Arc<dyn JobModel>,
}

impl BootstrapGate {
    pub fn new(
        enabled: bool,
        jenkins_service: impl Into<String>,
        fingerprint: impl Into<String>,
        jenkins: Arc<dyn JenkinsApi>,
        jobs: Arc<dyn JobModel>,
    ) -> Self {
        Self {
            enabled,
            jenkins_service: jenkins_service.into(),
            fingerprint: fingerprint.into(),
            jenkins,
            jobs,
        }
    }

    /// Checks every prerequisite and claims the Jenkins service for this
    /// instance when nobody did yet. Returns the annotation domain configured
    /// on the Jenkins service.
    pub async fn check(&self) -> Result<AnnotationDomain, GateError> {
        if !self.enabled {
            return Err(GateError::Disabled);
        }

        if !self.jobs.is_ready().await {
            return Err(GateError::HostNotReady);
        }

        if self.jenkins_service.is_empty() {
            return Err(GateError::MissingServiceName);
        }

        let jenkins = self
            .jenkins
            .get(&self.jenkins_service)
            .await
            .map_err(GateError::Api)?
            .ok_or_else(|| GateError::JenkinsNotFound(self.jenkins_service.clone()))?;

        let domain = AnnotationDomain::from_annotations(jenkins.metadata.annotations.as_ref());
        let identity_key = domain.jenkins_identity();

        match jenkins.annotations().get(&identity_key) {
            Some(fingerprint) if *fingerprint == self.fingerprint => Ok(domain),
            Some(fingerprint) => Err(GateError::FingerprintMismatch(
                self.jenkins_service.clone(),
                fingerprint.to_owned(),
            )),
            None => {
                info!(
                    "Claiming Jenkins service '{}' with fingerprint '{}'...",
                    self.jenkins_service, self.fingerprint
                );

                let mut claimed = jenkins.clone();
                claimed
                    .annotations_mut()
                    .insert(identity_key, self.fingerprint.clone());
                self.jenkins
                    .update(&claimed)
                    .await
                    .map_err(GateError::Api)?;

                Ok(domain)
            }
        }
    }
}
