//! vulngrid-updater: active component reconciliation.
//!
//! Decides, for every deployment, which scanned OS components inside its
//! images actually run, and keeps the persisted `ActiveComponent`
//! documents in step with that with as few writes as possible.
//!
//! # Architecture
//!
//! ```text
//! image scan ──► Updater::populate_executable_cache ──► ExecutableCache
//!                                                           │
//! periodic ──► Updater::update                              │
//!                ├── DeploymentStore (live deployment IDs)  │
//!                ├── ProcessAggregator::get_and_prune ◄─────┘ (is image cached?)
//!                ├── per deployment:
//!                │     ├── resolve active paths (update or ProcessIndicatorStore)
//!                │     ├── map paths → component IDs (ExecutableCache)
//!                │     ├── fetch existing (get_batch | deployment search)
//!                │     ├── merge_active_contexts
//!                │     └── upsert_batch / delete_batch
//!                └── prune_executable_cache (ImageStore)
//! ```

pub mod cache;
pub mod error;
pub mod merge;
pub mod updater;

pub use cache::{ExecutableCache, ImageExecutables};
pub use error::{UpdaterError, UpdaterResult};
pub use merge::{ContextMap, MergeOutcome, merge_active_contexts};
pub use updater::{DEFAULT_UPDATE_INTERVAL, Stores, Updater, UpdaterConfig};
