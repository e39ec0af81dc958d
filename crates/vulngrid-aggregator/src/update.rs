//! The unit of work handed from the aggregator to the updater.

use std::collections::HashSet;

/// How the updater should interpret a [`ProcessUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// Active paths must be re-derived from the stored process indicators.
    /// Replaces whatever was previously recorded for the container.
    FromDatabase,
    /// `new_paths` holds the executables observed since the last cycle.
    FromCache,
    /// The container no longer exists.
    ToBeRemoved,
}

/// Pending change for one container of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessUpdate {
    pub image_id: String,
    pub container_name: String,
    pub new_paths: HashSet<String>,
    pub origin: UpdateOrigin,
}

impl ProcessUpdate {
    pub fn new(
        image_id: impl Into<String>,
        container_name: impl Into<String>,
        new_paths: HashSet<String>,
        origin: UpdateOrigin,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            container_name: container_name.into(),
            new_paths,
            origin,
        }
    }

    pub fn from_database(&self) -> bool {
        self.origin == UpdateOrigin::FromDatabase
    }

    pub fn to_be_removed(&self) -> bool {
        self.origin == UpdateOrigin::ToBeRemoved
    }
}
