//! Updater error types.

use thiserror::Error;

/// Errors that abort a reconciliation cycle.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("failed to list deployments: {0}")]
    ListDeployments(#[source] vulngrid_state::StateError),

    #[error("failed to resolve executables for container {container}: {source}")]
    ResolvePaths {
        container: String,
        #[source]
        source: vulngrid_state::StateError,
    },

    #[error("failed to search images: {0}")]
    ListImages(#[source] vulngrid_state::StateError),

    #[error("deployment {deployment_id}: {source}")]
    Deployment {
        deployment_id: String,
        #[source]
        source: Box<UpdaterError>,
    },

    #[error("state store error: {0}")]
    State(#[from] vulngrid_state::StateError),
}

impl UpdaterError {
    /// Attach the deployment being reconciled to an error.
    pub fn in_deployment(self, deployment_id: &str) -> Self {
        UpdaterError::Deployment {
            deployment_id: deployment_id.to_string(),
            source: Box::new(self),
        }
    }
}

pub type UpdaterResult<T> = Result<T, UpdaterError>;
