use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// A Jenkins instance registered in the control plane. The sync claims one of
/// those (by name) through the identity annotation.
#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "devops.alauda.io",
    version = "v1alpha1",
    kind = "Jenkins",
    status = "JenkinsStatus",
    derive = "Default"
)]
pub struct JenkinsSpec {
    /// address the Jenkins instance is reachable at
    pub http: Option<JenkinsHttp>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsHttp {
    pub host: String,
    pub access_url: Option<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsStatus {
    pub phase: Option<String>,
    pub message: Option<String>,
}
