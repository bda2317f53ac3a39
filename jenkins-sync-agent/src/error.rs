use thiserror::Error;

/// How the engine should react to a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// transport problems, watch disconnects, expired resource versions
    Transient,
    /// optimistic concurrency conflict, retried like transient errors
    Conflict,
    /// gate failures, surfaced as the manager status and retried by the gate poll
    Configuration,
    /// missing metadata or invalid data, logged and dropped
    Fatal,
    /// caches didn't sync in time, the manager restarts
    CacheStaleness,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::Fatal)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource version conflict! Details: {}", .0)]
    Conflict(String),
    #[error("Resource not found! Details: {}", .0)]
    NotFound(String),
    #[error("Requested resource version is gone!")]
    Gone,
    #[error("Couldn't reach the API server! Reason: {}", .0)]
    Transport(String),
    #[error("The request was rejected as invalid! Reason: {}", .0)]
    Invalid(String),
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Conflict(_) => ErrorClass::Conflict,
            ApiError::Gone | ApiError::Transport(_) => ErrorClass::Transient,
            ApiError::NotFound(_) | ApiError::Invalid(_) => ErrorClass::Fatal,
        }
    }
}

impl From<kube::Error> for ApiError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) => match response.code {
                409 => ApiError::Conflict(response.message),
                404 => ApiError::NotFound(response.message),
                410 => ApiError::Gone,
                400 | 422 => ApiError::Invalid(response.message),
                _ => ApiError::Transport(response.message),
            },
            kube::Error::SerdeError(error) => ApiError::Invalid(error.to_string()),
            error => ApiError::Transport(error.to_string()),
        }
    }
}
