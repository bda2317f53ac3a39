use thiserror::Error;

use crate::{
    cache::RegistryError,
    error::{ApiError, ErrorClass},
    jobs::JobModelError,
};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Object is missing metadata!")]
    MissingObjectMetadata,
    #[error("Couldn't write the resource! Reason: {}", .0)]
    Api(#[from] ApiError),
    #[error("Couldn't update the job model! Reason: {}", .0)]
    JobModel(#[from] JobModelError),
    #[error("Required cache is unavailable! Reason: {}", .0)]
    Registry(#[from] RegistryError),
    #[error("{} cache hasn't synced yet!", .0)]
    CacheNotSynced(&'static str),
}

impl ReconcilerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ReconcilerError::MissingObjectMetadata => ErrorClass::Fatal,
            ReconcilerError::Api(error) => error.class(),
            ReconcilerError::JobModel(JobModelError::NotReady) => ErrorClass::Transient,
            ReconcilerError::JobModel(JobModelError::JobNotFound(_))
            | ReconcilerError::JobModel(JobModelError::JobExists(_)) => ErrorClass::Conflict,
            ReconcilerError::JobModel(JobModelError::JobDisabled(_)) => ErrorClass::Fatal,
            ReconcilerError::Registry(_) => ErrorClass::Configuration,
            ReconcilerError::CacheNotSynced(_) => ErrorClass::CacheStaleness,
        }
    }
}
