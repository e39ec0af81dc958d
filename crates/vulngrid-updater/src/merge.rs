//! Merge of a persisted active component with one cycle's observations.

use std::collections::{HashMap, HashSet};

use vulngrid_state::{ActiveComponent, ActiveContext};

/// Container name → context proving a component active through it.
pub type ContextMap = HashMap<String, ActiveContext>;

/// What to do with an existing active component after a merge.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Stored document is already correct.
    Unchanged,
    /// Store the document with these contexts.
    Updated(ContextMap),
    /// No context is left; the document must be deleted.
    Delete,
}

/// Merge `existing` with the containers being purged and the contexts
/// observed this cycle.
///
/// A container listed in both `containers_to_remove` and `addend` is kept:
/// it was refreshed, not torn down.
pub fn merge_active_contexts(
    existing: &ActiveComponent,
    containers_to_remove: &HashSet<String>,
    addend: Option<&ContextMap>,
) -> MergeOutcome {
    let empty = ContextMap::new();
    let addend = addend.unwrap_or(&empty);

    let mut contexts = existing.active_contexts.clone();
    let mut changed = false;

    for container in containers_to_remove {
        if addend.contains_key(container) {
            continue;
        }
        changed |= contexts.remove(container).is_some();
    }

    for (container, context) in addend {
        if contexts.get(container).map(|c| &c.image_id) != Some(&context.image_id) {
            contexts.insert(container.clone(), context.clone());
            changed = true;
        }
    }

    if contexts.is_empty() {
        MergeOutcome::Delete
    } else if !changed {
        MergeOutcome::Unchanged
    } else {
        MergeOutcome::Updated(contexts)
    }
}
