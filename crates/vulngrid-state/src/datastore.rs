//! Store contracts consumed by the reconciliation engine.
//!
//! Each trait is the smallest surface the updater needs from one
//! collaborator. Every call is synchronous and may be slow; callers do not
//! retry.

use crate::error::StateResult;
use crate::types::{ActiveComponent, ProcessIndicator};

/// Source of the set of deployments that currently exist.
pub trait DeploymentStore: Send + Sync {
    /// All known deployment IDs.
    fn deployment_ids(&self) -> StateResult<Vec<String>>;
}

/// Persistence for [`ActiveComponent`] documents.
pub trait ActiveComponentStore: Send + Sync {
    /// Existing documents for exactly those `ids` that exist.
    fn get_batch(&self, ids: &[String]) -> StateResult<Vec<ActiveComponent>>;

    /// Every document belonging to `deployment_id`.
    fn search_active_components(&self, deployment_id: &str) -> StateResult<Vec<ActiveComponent>>;

    /// Insert or replace all `docs`, or none of them.
    fn upsert_batch(&self, docs: &[ActiveComponent]) -> StateResult<()>;

    /// Delete all `ids`, or none of them. Missing IDs are ignored.
    fn delete_batch(&self, ids: &[String]) -> StateResult<()>;
}

/// Runtime process telemetry.
pub trait ProcessIndicatorStore: Send + Sync {
    /// Indicators recorded for one container of a deployment.
    fn search_process_indicators(
        &self,
        deployment_id: &str,
        container_name: &str,
    ) -> StateResult<Vec<ProcessIndicator>>;
}

/// Source of the set of images that currently exist.
pub trait ImageStore: Send + Sync {
    /// All current image IDs.
    fn image_ids(&self) -> StateResult<Vec<String>>;
}
