use kube::{api::PatchParams, Client, CustomResourceExt};
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;

use crate::kubernetes::operations::apply_crd;

use self::{
    jenkins::Jenkins, jenkinsbinding::JenkinsBinding, pipeline::Pipeline,
    pipelineconfig::PipelineConfig,
};

pub mod jenkins;
pub mod jenkinsbinding;
pub mod pipeline;
pub mod pipelineconfig;

/// Reference to an object living in the same namespace.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub description: String,
}

pub async fn apply_v1alpha1_crds(
    client: &Client,
    apply_params: &PatchParams,
) -> anyhow::Result<()> {
    apply_crd(client, &Jenkins::crd(), apply_params).await?;
    apply_crd(client, &JenkinsBinding::crd(), apply_params).await?;
    apply_crd(client, &PipelineConfig::crd(), apply_params).await?;
    apply_crd(client, &Pipeline::crd(), apply_params).await?;

    Ok(())
}
