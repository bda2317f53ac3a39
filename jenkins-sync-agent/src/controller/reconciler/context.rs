use std::sync::{Arc, RwLock};

use jenkins_sync_core::resources::annotations::AnnotationDomain;

use crate::{cache::ClientRegistry, config::SyncConfig, jobs::JobModel};

/// State shared by the manager, every controller and every reconciler.
pub struct SyncContext {
    pub config: SyncConfig,
    pub registry: ClientRegistry,
    pub jobs: Arc<dyn JobModel>,
    annotation_domain: RwLock<AnnotationDomain>,
}

impl SyncContext {
    pub fn new(
        config: SyncConfig,
        registry: ClientRegistry,
        jobs: Arc<dyn JobModel>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            jobs,
            annotation_domain: RwLock::default(),
        })
    }

    /// Domain read from the Jenkins resource by the last successful gate check.
    pub fn annotation_domain(&self) -> AnnotationDomain {
        self.annotation_domain
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_annotation_domain(&self, domain: AnnotationDomain) {
        *self
            .annotation_domain
            .write()
            .unwrap_or_else(|e| e.into_inner()) = domain;
    }
}
