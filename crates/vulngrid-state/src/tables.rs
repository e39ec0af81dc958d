//! redb table definitions for the vulngrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized documents).
//! Composite keys are built with [`crate::ids::compose`].

use redb::TableDefinition;

/// Images keyed by `{image_id}`.
pub const IMAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("images");

/// Deployments keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Process indicators keyed by `{deployment_id}:{container_name}:{indicator_id}`.
pub const PROCESS_INDICATORS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("process_indicators");

/// Active components keyed by `{deployment_id}:{component_id}`.
pub const ACTIVE_COMPONENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("active_components");
