use std::fmt::Display;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::{LocalObjectReference, PipelineParameter};

#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "devops.alauda.io",
    version = "v1alpha1",
    kind = "PipelineConfig",
    namespaced,
    status = "PipelineConfigStatus",
    derive = "Default"
)]
pub struct PipelineConfigSpec {
    /// binding that decides which Jenkins instance owns this config
    pub jenkins_binding: LocalObjectReference,
    /// Serial or Parallel
    pub run_policy: Option<String>,
    /// where the pipeline definition comes from
    pub strategy: PipelineStrategy,
    /// source repository of the pipeline
    pub source: Option<PipelineSource>,
    #[serde(default)]
    pub parameters: Vec<PipelineParameter>,
    /// when set, the job is created but builds won't be triggered
    pub disabled: Option<bool>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStrategy {
    pub jenkins: JenkinsPipelineStrategy,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsPipelineStrategy {
    /// inline pipeline script
    pub jenkinsfile: Option<String>,
    /// path of the Jenkinsfile inside the source repository
    pub jenkinsfile_path: Option<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSource {
    pub git: Option<GitSource>,
    /// secret holding repository credentials
    pub secret: Option<LocalObjectReference>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub uri: String,
    #[serde(rename = "ref")]
    pub ref_: Option<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfigStatus {
    pub phase: PipelineConfigPhase,
    pub message: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum PipelineConfigPhase {
    #[default]
    Creating,
    Ready,
    Error,
    Disabled,
}

impl Display for PipelineConfigPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineConfigPhase::Creating => f.write_str("waiting for the job to be created"),
            PipelineConfigPhase::Ready => f.write_str("job is in sync"),
            PipelineConfigPhase::Error => f.write_str("job couldn't be synced"),
            PipelineConfigPhase::Disabled => f.write_str("job is disabled"),
        }
    }
}

impl PipelineConfig {
    pub fn phase(&self) -> Option<&PipelineConfigPhase> {
        self.status.as_ref().map(|status| &status.phase)
    }

    pub fn is_disabled(&self) -> bool {
        self.spec.disabled.unwrap_or(false)
    }
}
