use std::sync::Arc;

use async_trait::async_trait;
use jenkins_sync_core::resources::{
    crd::v1alpha1::jenkinsbinding::JenkinsBinding, key::ResourceKey,
};
use log::debug;

use crate::{
    cache::{Cache, RegistryError},
    controller::{Action, Controller, ControllerFactory, Reconciler},
};

use super::{context::SyncContext, error::ReconcilerError};

/// Keeps the `JenkinsBinding` cache fed for the ownership checks of the other
/// reconcilers. There's nothing to materialise locally.
pub struct JenkinsBindingReconciler {
    bindings: Arc<Cache<JenkinsBinding>>,
    jenkins_service: String,
}

impl JenkinsBindingReconciler {
    pub fn new(context: &SyncContext) -> Result<Self, RegistryError> {
        Ok(Self {
            bindings: context.registry.require()?,
            jenkins_service: context.config.jenkins_service.clone(),
        })
    }
}

#[async_trait]
impl Reconciler for JenkinsBindingReconciler {
    async fn reconcile(&self, key: &ResourceKey) -> Result<Action, ReconcilerError> {
        match self.bindings.get(key) {
            Some(binding) if binding.is_bound_to(&self.jenkins_service) => {
                debug!("JenkinsBinding '{key}' is bound to this Jenkins")
            }
            Some(_) => debug!("JenkinsBinding '{key}' is bound to another Jenkins"),
            None => debug!("JenkinsBinding '{key}' is gone"),
        }

        Ok(Action::AwaitChange)
    }
}

pub struct JenkinsBindingControllerFactory;

impl ControllerFactory for JenkinsBindingControllerFactory {
    fn kind(&self) -> &'static str {
        "JenkinsBinding"
    }

    fn create(&self, context: &Arc<SyncContext>) -> Result<Controller, RegistryError> {
        let reconciler = JenkinsBindingReconciler::new(context)?;
        let cache = reconciler.bindings.clone();

        Ok(Controller::new(cache, Arc::new(reconciler), &context.config))
    }
}
