//! Domain documents for the vulngrid state store.
//!
//! These types mirror what the surrounding platform persists: scanned
//! images, deployments and their containers, runtime process indicators,
//! and the derived active components. All of them are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids;

/// Unique identifier for an image (usually its digest).
pub type ImageId = String;

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Identifier of a scanned component, see [`ids::component_id`].
pub type ComponentId = String;

// ── Image ──────────────────────────────────────────────────────────

/// A container image together with its latest scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Image {
    pub id: ImageId,
    pub name: String,
    pub scan: Option<ImageScan>,
}

/// Result of scanning an image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ImageScan {
    /// Version of the scanner that produced this result. Empty for scans
    /// recorded before the scanner started reporting it.
    #[serde(default)]
    pub scanner_version: String,
    /// Unix timestamp (seconds) of the scan.
    pub scan_time: u64,
    pub components: Vec<EmbeddedComponent>,
}

/// A package found inside an image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedComponent {
    pub name: String,
    pub version: String,
    pub source: SourceType,
    /// Files installed by this component that can be executed.
    #[serde(default)]
    pub executables: Vec<Executable>,
}

/// An executable file and the components it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Executable {
    pub path: String,
    pub dependencies: Vec<ComponentId>,
}

/// Where a component was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Os,
    Python,
    Java,
    Ruby,
    NodeJs,
    Go,
    DotNet,
    Infrastructure,
}

// ── Deployment ─────────────────────────────────────────────────────

/// A workload and the containers it is currently made of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Deployment {
    pub id: DeploymentId,
    pub namespace: String,
    pub name: String,
    pub containers: Vec<Container>,
}

/// A container within a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub name: String,
    /// Image the container runs. Empty until the image has been resolved.
    #[serde(default)]
    pub image_id: ImageId,
}

// ── Process indicator ─────────────────────────────────────────────

/// A process execution observed inside a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessIndicator {
    pub id: String,
    pub deployment_id: DeploymentId,
    pub container_name: String,
    pub image_id: ImageId,
    pub exec_file_path: String,
}

// ── Active component ──────────────────────────────────────────────

/// A scanned OS component that has been seen running in a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveComponent {
    pub id: String,
    pub deployment_id: DeploymentId,
    pub component_id: ComponentId,
    /// Container name → the context that proved the component active.
    pub active_contexts: HashMap<String, ActiveContext>,
}

/// One container through which a component is known to be active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveContext {
    pub container_name: String,
    pub image_id: ImageId,
}

impl ImageScan {
    /// Whether any component still carries its executable list.
    pub fn has_executables(&self) -> bool {
        self.components.iter().any(|c| !c.executables.is_empty())
    }
}

impl ProcessIndicator {
    /// Build the composite key for the process indicators table.
    pub fn table_key(&self) -> String {
        ids::compose(&[
            self.deployment_id.as_str(),
            self.container_name.as_str(),
            self.id.as_str(),
        ])
    }
}

impl ActiveComponent {
    /// A new active component for `(deployment_id, component_id)`.
    pub fn new(
        deployment_id: &str,
        component_id: &str,
        active_contexts: HashMap<String, ActiveContext>,
    ) -> Self {
        Self {
            id: ids::active_component_id(deployment_id, component_id),
            deployment_id: deployment_id.to_string(),
            component_id: component_id.to_string(),
            active_contexts,
        }
    }
}
