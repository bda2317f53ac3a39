use jenkins_sync_core::resources::key::ResourceKey;

use crate::jobs::JobBinding;

pub mod context;
pub mod error;
pub mod jenkinsbinding;
pub mod pipeline;
pub mod pipelineconfig;

fn job_binding(key: &ResourceKey, uid: &str, resource_version: &str) -> JobBinding {
    JobBinding {
        namespace: key.namespace_or_default().to_owned(),
        name: key.name.clone(),
        uid: uid.to_owned(),
        resource_version: resource_version.to_owned(),
    }
}
