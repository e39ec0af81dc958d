//! In-memory process aggregator.
//!
//! Holds one [`ContainerState`] per `(deployment, container)` pair behind a
//! single mutex, so [`ProcessAggregator::get_and_prune`] can drain pending
//! work and drop dead deployments in one atomic step while the ingestion
//! path keeps calling [`ProcessAggregator::refresh_deployment`] and
//! [`ProcessAggregator::add`] from other threads.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::debug;

use vulngrid_state::{Deployment, ProcessIndicator};

use crate::update::{ProcessUpdate, UpdateOrigin};

/// Contract between the ingestion path, the aggregator, and the updater.
pub trait ProcessAggregator: Send + Sync {
    /// Record the current container topology of a deployment.
    fn refresh_deployment(&self, deployment: &Deployment);

    /// Record process executions observed at runtime.
    fn add(&self, indicators: &[ProcessIndicator]);

    /// Drain pending updates grouped by deployment ID.
    ///
    /// Deployments missing from `live_deployments` are forgotten. Updates
    /// whose image is not yet reported by `is_image_cached` stay buffered,
    /// except removals, which never need the image.
    fn get_and_prune(
        &self,
        is_image_cached: &dyn Fn(&str) -> bool,
        live_deployments: &HashSet<String>,
    ) -> HashMap<String, Vec<ProcessUpdate>>;
}

/// What the aggregator knows about one container.
#[derive(Debug, Default)]
struct ContainerState {
    image_id: String,
    /// Paths observed since the last delivered update. Re-observed paths are
    /// queued again; the merge turns known ones into a no-op.
    new_paths: HashSet<String>,
    /// Work waiting for the next cycle, if any.
    pending: Option<UpdateOrigin>,
}

impl ContainerState {
    /// A container whose active paths must be recomputed from storage.
    fn needs_database(image_id: &str) -> Self {
        Self {
            image_id: image_id.to_string(),
            pending: Some(UpdateOrigin::FromDatabase),
            ..Self::default()
        }
    }
}

type Containers = HashMap<String, ContainerState>;

/// Mutex-guarded [`ProcessAggregator`].
#[derive(Default)]
pub struct Aggregator {
    /// deployment_id → container name → state.
    deployments: Mutex<HashMap<String, Containers>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deployment IDs the aggregator currently holds state for.
    pub fn tracked_deployments(&self) -> Vec<String> {
        let deployments = self.deployments.lock().expect("aggregator lock");
        deployments.keys().cloned().collect()
    }
}

impl ProcessAggregator for Aggregator {
    fn refresh_deployment(&self, deployment: &Deployment) {
        let mut deployments = self.deployments.lock().expect("aggregator lock");
        let containers = deployments.entry(deployment.id.clone()).or_default();

        let mut current = HashSet::new();
        for container in &deployment.containers {
            if container.image_id.is_empty() {
                continue;
            }
            current.insert(container.name.as_str());

            let unchanged = containers.get(&container.name).is_some_and(|state| {
                state.image_id == container.image_id
                    && state.pending != Some(UpdateOrigin::ToBeRemoved)
            });
            if !unchanged {
                debug!(
                    deployment_id = %deployment.id,
                    container = %container.name,
                    image_id = %container.image_id,
                    "container needs full process refresh"
                );
                containers.insert(
                    container.name.clone(),
                    ContainerState::needs_database(&container.image_id),
                );
            }
        }

        for (name, state) in containers.iter_mut() {
            if !current.contains(name.as_str()) && state.pending != Some(UpdateOrigin::ToBeRemoved) {
                debug!(deployment_id = %deployment.id, container = %name, "container removed");
                state.pending = Some(UpdateOrigin::ToBeRemoved);
                state.new_paths.clear();
            }
        }
    }

    fn add(&self, indicators: &[ProcessIndicator]) {
        let mut deployments = self.deployments.lock().expect("aggregator lock");
        for indicator in indicators {
            let containers = deployments.entry(indicator.deployment_id.clone()).or_default();
            let Some(state) = containers.get_mut(&indicator.container_name) else {
                containers.insert(
                    indicator.container_name.clone(),
                    ContainerState::needs_database(&indicator.image_id),
                );
                continue;
            };

            if state.image_id != indicator.image_id {
                debug!(
                    deployment_id = %indicator.deployment_id,
                    container = %indicator.container_name,
                    tracked = %state.image_id,
                    observed = %indicator.image_id,
                    "ignoring indicator for stale image"
                );
                continue;
            }
            match state.pending {
                // A database refresh or a removal already covers this path.
                Some(UpdateOrigin::FromDatabase | UpdateOrigin::ToBeRemoved) => {}
                Some(UpdateOrigin::FromCache) | None => {
                    state.new_paths.insert(indicator.exec_file_path.clone());
                    state.pending = Some(UpdateOrigin::FromCache);
                }
            }
        }
    }

    fn get_and_prune(
        &self,
        is_image_cached: &dyn Fn(&str) -> bool,
        live_deployments: &HashSet<String>,
    ) -> HashMap<String, Vec<ProcessUpdate>> {
        let mut deployments = self.deployments.lock().expect("aggregator lock");

        let before = deployments.len();
        deployments.retain(|id, _| live_deployments.contains(id));
        let pruned = before - deployments.len();

        let mut result = HashMap::new();
        for (deployment_id, containers) in deployments.iter_mut() {
            let mut updates = Vec::new();
            containers.retain(|name, state| match state.pending {
                None => true,
                Some(UpdateOrigin::ToBeRemoved) => {
                    updates.push(ProcessUpdate::new(
                        state.image_id.clone(),
                        name.clone(),
                        HashSet::new(),
                        UpdateOrigin::ToBeRemoved,
                    ));
                    false
                }
                Some(origin) => {
                    if is_image_cached(&state.image_id) {
                        let paths = std::mem::take(&mut state.new_paths);
                        updates.push(ProcessUpdate::new(
                            state.image_id.clone(),
                            name.clone(),
                            paths,
                            origin,
                        ));
                        state.pending = None;
                    }
                    true
                }
            });
            if !updates.is_empty() {
                result.insert(deployment_id.clone(), updates);
            }
        }
        deployments.retain(|_, containers| !containers.is_empty());

        debug!(
            pruned_deployments = pruned,
            deployments_with_updates = result.len(),
            "aggregator drained"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vulngrid_state::Container;

    fn deployment(id: &str, containers: &[(&str, &str)]) -> Deployment {
        Deployment {
            id: id.to_string(),
            namespace: "default".to_string(),
            name: id.to_string(),
            containers: containers
                .iter()
                .map(|(name, image)| Container {
                    name: name.to_string(),
                    image_id: image.to_string(),
                })
                .collect(),
        }
    }

    fn indicator(deployment: &str, container: &str, image: &str, path: &str) -> ProcessIndicator {
        ProcessIndicator {
            id: format!("{deployment}-{container}-{path}"),
            deployment_id: deployment.to_string(),
            container_name: container.to_string(),
            image_id: image.to_string(),
            exec_file_path: path.to_string(),
        }
    }

    fn live(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn drain_all(agg: &Aggregator, ids: &[&str]) -> HashMap<String, Vec<ProcessUpdate>> {
        agg.get_and_prune(&|_| true, &live(ids))
    }

    fn by_container(updates: &[ProcessUpdate]) -> HashMap<&str, &ProcessUpdate> {
        updates.iter().map(|u| (u.container_name.as_str(), u)).collect()
    }

    #[test]
    fn new_containers_need_database_refresh() {
        let agg = Aggregator::new();
        agg.refresh_deployment(&deployment("dep", &[("c1", "image1"), ("c2", "image2"), ("c3", "")]));

        let updates = drain_all(&agg, &["dep"]);
        let dep = by_container(&updates["dep"]);
        assert_eq!(dep.len(), 2);
        assert_eq!(dep["c1"].origin, UpdateOrigin::FromDatabase);
        assert_eq!(dep["c2"].image_id, "image2");

        // Nothing new: second drain is empty.
        assert!(drain_all(&agg, &["dep"]).is_empty());
    }

    #[test]
    fn same_topology_does_not_requeue() {
        let agg = Aggregator::new();
        let dep = deployment("dep", &[("c1", "image1")]);
        agg.refresh_deployment(&dep);
        drain_all(&agg, &["dep"]);

        agg.refresh_deployment(&dep);
        assert!(drain_all(&agg, &["dep"]).is_empty());
    }

    #[test]
    fn image_change_requeues_from_database() {
        let agg = Aggregator::new();
        agg.refresh_deployment(&deployment("dep", &[("c1", "image1")]));
        drain_all(&agg, &["dep"]);

        agg.refresh_deployment(&deployment("dep", &[("c1", "image2")]));
        let updates = drain_all(&agg, &["dep"]);
        assert_eq!(updates["dep"].len(), 1);
        assert!(updates["dep"][0].from_database());
        assert_eq!(updates["dep"][0].image_id, "image2");
    }

    #[test]
    fn indicators_produce_incremental_updates() {
        let agg = Aggregator::new();
        agg.refresh_deployment(&deployment("dep", &[("c1", "image1")]));
        drain_all(&agg, &["dep"]);

        agg.add(&[
            indicator("dep", "c1", "image1", "/bin/bash"),
            indicator("dep", "c1", "image1", "/bin/ls"),
            indicator("dep", "c1", "image-old", "/bin/zsh"),
        ]);
        let updates = drain_all(&agg, &["dep"]);
        let update = &updates["dep"][0];
        assert_eq!(update.origin, UpdateOrigin::FromCache);
        let mut paths: Vec<_> = update.new_paths.iter().map(String::as_str).collect();
        paths.sort();
        assert_eq!(paths, ["/bin/bash", "/bin/ls"]);

        assert!(drain_all(&agg, &["dep"]).is_empty());
    }

    #[test]
    fn delivered_path_is_queued_again_when_reobserved() {
        let agg = Aggregator::new();
        agg.refresh_deployment(&deployment("dep", &[("c1", "image1")]));
        drain_all(&agg, &["dep"]);

        agg.add(&[indicator("dep", "c1", "image1", "/bin/bash")]);
        drain_all(&agg, &["dep"]);

        // A delivered update may never have been stored.
        agg.add(&[indicator("dep", "c1", "image1", "/bin/bash")]);
        let updates = drain_all(&agg, &["dep"]);
        assert_eq!(updates["dep"][0].origin, UpdateOrigin::FromCache);
        assert!(updates["dep"][0].new_paths.contains("/bin/bash"));
    }

    #[test]
    fn indicators_do_not_downgrade_database_refresh() {
        let agg = Aggregator::new();
        agg.refresh_deployment(&deployment("dep", &[("c1", "image1")]));
        agg.add(&[indicator("dep", "c1", "image1", "/bin/bash")]);

        let updates = drain_all(&agg, &["dep"]);
        assert!(updates["dep"][0].from_database());
        assert!(updates["dep"][0].new_paths.is_empty());
    }

    #[test]
    fn indicator_for_unknown_container_registers_it() {
        let agg = Aggregator::new();
        agg.add(&[indicator("dep", "c1", "image1", "/bin/bash")]);

        let updates = drain_all(&agg, &["dep"]);
        assert!(updates["dep"][0].from_database());
    }

    #[test]
    fn removed_container_is_reported_once() {
        let agg = Aggregator::new();
        agg.refresh_deployment(&deployment("dep", &[("c1", "image1"), ("c2", "image1")]));
        drain_all(&agg, &["dep"]);

        agg.refresh_deployment(&deployment("dep", &[("c2", "image1")]));
        // Removals are delivered even when the image is not cached.
        let updates = agg.get_and_prune(&|_| false, &live(&["dep"]));
        assert_eq!(updates["dep"].len(), 1);
        assert!(updates["dep"][0].to_be_removed());
        assert_eq!(updates["dep"][0].container_name, "c1");

        assert!(drain_all(&agg, &["dep"]).is_empty());
    }

    #[test]
    fn uncached_images_stay_pending() {
        let agg = Aggregator::new();
        agg.refresh_deployment(&deployment("dep", &[("c1", "image1"), ("c2", "image2")]));

        let updates = agg.get_and_prune(&|image| image == "image1", &live(&["dep"]));
        assert_eq!(updates["dep"].len(), 1);
        assert_eq!(updates["dep"][0].container_name, "c1");

        let updates = drain_all(&agg, &["dep"]);
        assert_eq!(updates["dep"].len(), 1);
        assert_eq!(updates["dep"][0].container_name, "c2");
    }

    #[test]
    fn dead_deployments_are_pruned() {
        let agg = Aggregator::new();
        agg.refresh_deployment(&deployment("depA", &[("c1", "image1")]));
        agg.refresh_deployment(&deployment("depB", &[("c1", "image1")]));

        let updates = drain_all(&agg, &["depA"]);
        assert!(updates.contains_key("depA"));
        assert!(!updates.contains_key("depB"));
        assert_eq!(agg.tracked_deployments(), ["depA"]);
    }

    #[test]
    fn fully_removed_deployment_is_forgotten() {
        let agg = Aggregator::new();
        agg.refresh_deployment(&deployment("dep", &[("c1", "image1")]));
        drain_all(&agg, &["dep"]);

        agg.refresh_deployment(&deployment("dep", &[]));
        let updates = drain_all(&agg, &["dep"]);
        assert!(updates["dep"][0].to_be_removed());
        assert!(agg.tracked_deployments().is_empty());
    }
}
