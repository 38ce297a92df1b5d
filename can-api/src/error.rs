//! Error types for the can API.

use std::io;
use thiserror::Error;
use tonic::Status;

/// Errors reported by a runtime capability provider.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("Layer extraction failed: {0}")]
    LayerExtraction(String),

    #[error("Image not pulled: {0}")]
    ImageNotPulled(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Pod not found: {0}")]
    PodNotFound(String),

    #[error("Container already exists: {0}")]
    AlreadyExists(String),

    #[error("Container {0} is not running")]
    NotRunning(String),

    #[error("youki command failed: {0}")]
    Youki(String),

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by the API layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("You must define '{0}' metadata")]
    MissingMetadata(&'static str),

    #[error("'{0}' must not be empty")]
    MissingField(&'static str),

    #[error("Invalid {field} {value:?}: use letters, digits, '-' and '.'")]
    InvalidName { field: &'static str, value: String },

    #[error("Invalid pod: {0}")]
    InvalidPod(String),

    #[error("Unrecognized signal number {0}")]
    InvalidSignal(i32),

    #[error("Failed to pull image [{image}]: {source}")]
    PullImage {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to create container [{container}]: {source}")]
    CreateContainer {
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to find containers for pod [{pod}] in namespace [{namespace}]: {source}")]
    FindContainers {
        namespace: String,
        pod: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to start container [{container}]: {source}")]
    StartContainer {
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Error while stopping container [{container}]: {source}")]
    StopContainer {
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Error {
    /// The provider error behind this error, if any.
    fn runtime_source(&self) -> Option<&RuntimeError> {
        match self {
            Error::PullImage { source, .. }
            | Error::CreateContainer { source, .. }
            | Error::FindContainers { source, .. }
            | Error::StartContainer { source, .. }
            | Error::StopContainer { source, .. } => Some(source),
            Error::Runtime(e) => Some(e),
            Error::MissingMetadata(_)
            | Error::MissingField(_)
            | Error::InvalidName { .. }
            | Error::InvalidPod(_)
            | Error::InvalidSignal(_) => None,
        }
    }
}

impl From<Error> for Status {
    fn from(e: Error) -> Self {
        match (&e, e.runtime_source()) {
            (
                Error::MissingMetadata(_)
                | Error::MissingField(_)
                | Error::InvalidName { .. }
                | Error::InvalidPod(_)
                | Error::InvalidSignal(_),
                _,
            ) => Status::invalid_argument(e.to_string()),
            (
                _,
                Some(
                    RuntimeError::ContainerNotFound(_)
                    | RuntimeError::PodNotFound(_)
                    | RuntimeError::ImageNotPulled(_),
                ),
            ) => Status::not_found(e.to_string()),
            (_, Some(RuntimeError::AlreadyExists(_))) => Status::already_exists(e.to_string()),
            (_, Some(RuntimeError::NotRunning(_))) => Status::failed_precondition(e.to_string()),
            (_, Some(RuntimeError::InvalidReference(_) | RuntimeError::InvalidName(_))) => {
                Status::invalid_argument(e.to_string())
            }
            _ => Status::internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
