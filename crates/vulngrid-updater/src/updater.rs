//! Active component updater.
//!
//! Two entry points share one [`ExecutableCache`]:
//!
//! - [`Updater::populate_executable_cache`] runs on the image ingestion
//!   path and indexes the OS executables of a fresh scan.
//! - [`Updater::update`] runs periodically, drains the process aggregator,
//!   and reconciles the persisted active components of every deployment
//!   that has pending work.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use vulngrid_aggregator::{ProcessAggregator, ProcessUpdate};
use vulngrid_state::{
    ActiveComponent, ActiveComponentStore, ActiveContext, DeploymentStore, Image, ImageStore,
    ProcessIndicatorStore, SourceType, StateStore, ids,
};

use crate::cache::{ExecutableCache, ImageExecutables};
use crate::error::{UpdaterError, UpdaterResult};
use crate::merge::{ContextMap, MergeOutcome, merge_active_contexts};

/// Default time between two reconciliation cycles.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Runtime switches for the updater.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// When false, both entry points are no-ops.
    pub active_vuln_mgmt: bool,
    /// Time between two cycles of [`Updater::run`].
    pub interval: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            active_vuln_mgmt: true,
            interval: DEFAULT_UPDATE_INTERVAL,
        }
    }
}

/// The stores the updater reads from and writes to.
#[derive(Clone)]
pub struct Stores {
    pub deployments: Arc<dyn DeploymentStore>,
    pub active_components: Arc<dyn ActiveComponentStore>,
    pub process_indicators: Arc<dyn ProcessIndicatorStore>,
    pub images: Arc<dyn ImageStore>,
}

impl Stores {
    /// Serve every contract from one redb store.
    pub fn from_state(state: StateStore) -> Self {
        let state = Arc::new(state);
        Self {
            deployments: state.clone(),
            active_components: state.clone(),
            process_indicators: state.clone(),
            images: state,
        }
    }
}

/// Reconciles active components from image scans and process telemetry.
pub struct Updater {
    config: UpdaterConfig,
    stores: Stores,
    aggregator: Arc<dyn ProcessAggregator>,
    executable_cache: ExecutableCache,
}

impl Updater {
    pub fn new(
        stores: Stores,
        aggregator: Arc<dyn ProcessAggregator>,
        config: UpdaterConfig,
    ) -> Self {
        Self {
            config,
            stores,
            aggregator,
            executable_cache: ExecutableCache::new(),
        }
    }

    pub fn executable_cache(&self) -> &ExecutableCache {
        &self.executable_cache
    }

    // ── Image ingestion ────────────────────────────────────────────

    /// Index the OS executables of `image` and strip every executable list
    /// from its scan.
    ///
    /// A scan from the scanner version already cached is only stripped.
    /// Images without an ID or a scan are left alone.
    pub fn populate_executable_cache(&self, image: &mut Image) {
        if !self.config.active_vuln_mgmt {
            return;
        }
        if image.id.is_empty() {
            debug!(image = %image.name, "image has no id, not caching executables");
            return;
        }
        let Some(scan) = image.scan.as_mut() else {
            debug!(image_id = %image.id, "image has no scan, not caching executables");
            return;
        };

        let cached_version = self
            .executable_cache
            .get(&image.id)
            .map(|cached| cached.scanner_version.clone());
        if cached_version.as_deref() == Some(scan.scanner_version.as_str()) {
            debug!(
                image_id = %image.id,
                scanner_version = %scan.scanner_version,
                "executables already cached"
            );
            for component in &mut scan.components {
                component.executables = Vec::new();
            }
            return;
        }

        let mut exec_to_components: HashMap<String, Vec<String>> = HashMap::new();
        for component in &mut scan.components {
            let executables = std::mem::take(&mut component.executables);
            if component.source != SourceType::Os {
                continue;
            }
            for executable in executables {
                exec_to_components
                    .entry(executable.path)
                    .or_default()
                    .extend(executable.dependencies);
            }
        }

        debug!(
            image_id = %image.id,
            scanner_version = %scan.scanner_version,
            executables = exec_to_components.len(),
            "caching image executables"
        );
        self.executable_cache.put(
            &image.id,
            ImageExecutables {
                exec_to_components,
                scanner_version: scan.scanner_version.clone(),
            },
        );
    }

    // ── Reconciliation ─────────────────────────────────────────────

    /// Run one reconciliation cycle, then prune the executable cache.
    ///
    /// The first failing deployment aborts the cycle. Work already drained
    /// from the aggregator for the remaining deployments is dropped; it is
    /// queued again when the aggregator next observes those paths.
    pub fn update(&self) -> UpdaterResult<()> {
        if !self.config.active_vuln_mgmt {
            return Ok(());
        }

        let result = self.update_active_components();

        match self.prune_executable_cache() {
            Ok(0) => {}
            Ok(evicted) => debug!(evicted, "pruned executable cache"),
            Err(e) => warn!(error = %e, "failed to prune executable cache"),
        }

        result
    }

    fn update_active_components(&self) -> UpdaterResult<()> {
        let live: HashSet<String> = self
            .stores
            .deployments
            .deployment_ids()
            .map_err(UpdaterError::ListDeployments)?
            .into_iter()
            .collect();

        let cache = &self.executable_cache;
        let pending = self
            .aggregator
            .get_and_prune(&|image_id| cache.contains(image_id), &live);
        if pending.is_empty() {
            return Ok(());
        }
        debug!(deployments = pending.len(), "reconciling active components");

        for (deployment_id, updates) in &pending {
            self.update_deployment(deployment_id, updates)
                .map_err(|e| e.in_deployment(deployment_id))?;
        }
        Ok(())
    }

    /// Translate one deployment's updates into active contexts and persist
    /// the difference.
    fn update_deployment(&self, deployment_id: &str, updates: &[ProcessUpdate]) -> UpdaterResult<()> {
        let mut id_to_containers: HashMap<String, ContextMap> = HashMap::new();
        let mut containers_to_remove: HashSet<String> = HashSet::new();

        for update in updates {
            if update.to_be_removed() || update.from_database() {
                containers_to_remove.insert(update.container_name.clone());
            }
            if update.to_be_removed() {
                continue;
            }

            let Some(executables) = self.executable_cache.get(&update.image_id) else {
                error!(
                    deployment_id,
                    container = %update.container_name,
                    image_id = %update.image_id,
                    "invariant violation: update delivered for an image with no cached executables"
                );
                continue;
            };

            let paths = self.active_paths(deployment_id, update)?;
            for path in paths.iter() {
                let Some(component_ids) = executables.exec_to_components.get(path) else {
                    continue;
                };
                for component_id in component_ids {
                    id_to_containers
                        .entry(ids::active_component_id(deployment_id, component_id))
                        .or_default()
                        .entry(update.container_name.clone())
                        .or_insert_with(|| ActiveContext {
                            container_name: update.container_name.clone(),
                            image_id: update.image_id.clone(),
                        });
                }
            }
        }

        self.reconcile_with_database(deployment_id, id_to_containers, &containers_to_remove)
    }

    /// Executable paths that count as active for one update.
    ///
    /// Database-origin updates replace everything known about the container,
    /// so their paths come from the stored indicators for the current image.
    fn active_paths<'a>(
        &self,
        deployment_id: &str,
        update: &'a ProcessUpdate,
    ) -> UpdaterResult<Cow<'a, HashSet<String>>> {
        if !update.from_database() {
            return Ok(Cow::Borrowed(&update.new_paths));
        }

        let indicators = self
            .stores
            .process_indicators
            .search_process_indicators(deployment_id, &update.container_name)
            .map_err(|source| UpdaterError::ResolvePaths {
                container: update.container_name.clone(),
                source,
            })?;

        Ok(Cow::Owned(
            indicators
                .into_iter()
                .filter(|indicator| indicator.image_id == update.image_id)
                .map(|indicator| indicator.exec_file_path)
                .collect(),
        ))
    }

    /// Merge the observed contexts into the stored documents and write only
    /// what changed.
    fn reconcile_with_database(
        &self,
        deployment_id: &str,
        mut id_to_containers: HashMap<String, ContextMap>,
        containers_to_remove: &HashSet<String>,
    ) -> UpdaterResult<()> {
        if id_to_containers.is_empty() && containers_to_remove.is_empty() {
            return Ok(());
        }

        let store = &self.stores.active_components;
        let existing = if containers_to_remove.is_empty() {
            let ids: Vec<String> = id_to_containers.keys().cloned().collect();
            store.get_batch(&ids)?
        } else {
            store.search_active_components(deployment_id)?
        };

        let mut to_upsert = Vec::new();
        let mut to_delete = Vec::new();

        for component in existing {
            let addend = id_to_containers.remove(&component.id);
            match merge_active_contexts(&component, containers_to_remove, addend.as_ref()) {
                MergeOutcome::Unchanged => {}
                MergeOutcome::Updated(active_contexts) => to_upsert.push(ActiveComponent {
                    active_contexts,
                    ..component
                }),
                MergeOutcome::Delete => to_delete.push(component.id),
            }
        }

        for (id, active_contexts) in id_to_containers {
            let (deployment_id, component_id) = ids::split_active_component_id(&id)?;
            to_upsert.push(ActiveComponent {
                id,
                deployment_id,
                component_id,
                active_contexts,
            });
        }

        if !to_upsert.is_empty() {
            store.upsert_batch(&to_upsert)?;
        }
        if !to_delete.is_empty() {
            store.delete_batch(&to_delete)?;
        }

        debug!(
            deployment_id,
            upserted = to_upsert.len(),
            deleted = to_delete.len(),
            "active components reconciled"
        );
        Ok(())
    }

    // ── Janitor ────────────────────────────────────────────────────

    /// Evict cached images that no longer exist. Returns how many were
    /// evicted.
    pub fn prune_executable_cache(&self) -> UpdaterResult<usize> {
        let live: HashSet<String> = self
            .stores
            .images
            .image_ids()
            .map_err(UpdaterError::ListImages)?
            .into_iter()
            .collect();

        let mut evicted = 0;
        for image_id in self.executable_cache.keys() {
            if !live.contains(&image_id) && self.executable_cache.remove(&image_id) {
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    // ── Background loop ────────────────────────────────────────────

    /// Run [`Self::update`] every `interval` until `shutdown` changes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            enabled = self.config.active_vuln_mgmt,
            "active component updater started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.update() {
                        error!(error = %e, "active component update failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("active component updater shutting down");
                    break;
                }
            }
        }
    }
}
