use std::fmt::Display;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::{LocalObjectReference, PipelineParameter};

/// A single run of a `PipelineConfig`.
#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "devops.alauda.io",
    version = "v1alpha1",
    kind = "Pipeline",
    namespaced,
    status = "PipelineStatus",
    derive = "Default"
)]
pub struct PipelineSpec {
    /// config this run was created from
    pub pipeline_config: LocalObjectReference,
    pub jenkins_binding: LocalObjectReference,
    /// who asked for this run
    pub cause: Option<PipelineCause>,
    #[serde(default)]
    pub parameters: Vec<PipelineParameter>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCause {
    #[serde(rename = "type")]
    pub type_: String,
    pub message: Option<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub phase: PipelinePhase,
    pub jenkins: Option<PipelineJenkinsStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJenkinsStatus {
    /// build number assigned by the job
    pub build: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum PipelinePhase {
    #[default]
    Pending,
    Queued,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl PipelinePhase {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PipelinePhase::Complete | PipelinePhase::Failed | PipelinePhase::Cancelled
        )
    }
}

impl Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelinePhase::Pending => f.write_str("pipeline is waiting to be scheduled"),
            PipelinePhase::Queued => f.write_str("pipeline is queued in Jenkins"),
            PipelinePhase::Running => f.write_str("pipeline is running"),
            PipelinePhase::Complete => f.write_str("pipeline completed"),
            PipelinePhase::Failed => f.write_str("pipeline failed"),
            PipelinePhase::Cancelled => f.write_str("pipeline was cancelled"),
        }
    }
}

impl Pipeline {
    pub fn phase(&self) -> PipelinePhase {
        self.status
            .as_ref()
            .map(|status| status.phase.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::{Pipeline, PipelinePhase};

    #[test]
    fn pipeline_manifest_deserializes() {
        let manifest = r#"
apiVersion: devops.alauda.io/v1alpha1
kind: Pipeline
metadata:
  name: build-1
  namespace: team-a
spec:
  pipelineConfig:
    name: build
  jenkinsBinding:
    name: jenkins
  cause:
    type: manual
status:
  phase: Queued
"#;
        let pipeline: Pipeline = serde_yaml::from_str(manifest).unwrap();

        assert_eq!(pipeline.spec.pipeline_config.name, "build");
        assert_eq!(pipeline.phase(), PipelinePhase::Queued);
        assert!(!pipeline.phase().is_final());
    }
}
