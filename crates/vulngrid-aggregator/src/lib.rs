//! vulngrid-aggregator: per-container buffering of process telemetry.
//!
//! The aggregator sits between the ingestion path (deployment topology
//! refreshes and process indicators arriving from the cluster) and the
//! periodic updater. It remembers, for every container of every live
//! deployment, what has changed since the last reconciliation and hands
//! that out as [`ProcessUpdate`]s.
//!
//! # Update origins
//!
//! ```text
//! new container / image changed  ──► FromDatabase  (re-read stored indicators)
//! new executable path observed   ──► FromCache     (paths carried in the update)
//! container gone from deployment ──► ToBeRemoved   (drop its active contexts)
//! ```
//!
//! Updates for images the updater has not indexed yet stay buffered until
//! the image shows up in the executable cache.

pub mod aggregator;
pub mod update;

pub use aggregator::{Aggregator, ProcessAggregator};
pub use update::{ProcessUpdate, UpdateOrigin};
