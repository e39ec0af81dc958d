//! vulngrid-state: domain documents and the embedded state store for vulngrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for images, deployments, process indicators, and active
//! components.
//!
//! # Architecture
//!
//! All documents are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys are built with [`ids::compose`], a reversible encoding
//! that keeps `{deployment_id}:{...}` prefix scans unambiguous.
//!
//! The reconciliation engine never talks to `StateStore` directly. It goes
//! through the narrow contracts in [`datastore`], which `StateStore`
//! implements and which tests can wrap or replace.

pub mod datastore;
pub mod error;
pub mod ids;
pub mod store;
pub mod tables;
pub mod types;

pub use datastore::{ActiveComponentStore, DeploymentStore, ImageStore, ProcessIndicatorStore};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
