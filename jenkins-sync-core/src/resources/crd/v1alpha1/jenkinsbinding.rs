use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::LocalObjectReference;

#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "devops.alauda.io",
    version = "v1alpha1",
    kind = "JenkinsBinding",
    namespaced,
    status = "JenkinsBindingStatus",
    derive = "Default"
)]
pub struct JenkinsBindingSpec {
    /// Jenkins instance this namespace is bound to
    pub jenkins: LocalObjectReference,
    /// credentials used when talking to that instance
    pub account: Option<JenkinsBindingAccount>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsBindingAccount {
    pub secret: Option<SecretReference>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    pub namespace: Option<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsBindingStatus {
    pub phase: Option<String>,
    pub message: Option<String>,
}

impl JenkinsBinding {
    pub fn is_bound_to(&self, jenkins_service: &str) -> bool {
        self.spec.jenkins.name == jenkins_service
    }
}
