//! Ingestion pipeline.
//!
//! Everything that enters the daemon goes through [`Pipeline`]: it persists
//! the document, then notifies the executable cache or the aggregator so
//! the next reconciliation cycle sees it.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info};

use vulngrid_aggregator::ProcessAggregator;
use vulngrid_state::{Deployment, Image, ProcessIndicator, StateStore};
use vulngrid_updater::Updater;

/// Documents loaded from a `--seed` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub images: Vec<Image>,
    pub deployments: Vec<Deployment>,
    pub indicators: Vec<ProcessIndicator>,
    /// Deployment IDs deleted after everything else is ingested.
    pub removed_deployments: Vec<String>,
}

impl Seed {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed {}", path.display()))?;
        let seed = serde_json::from_str(&content)
            .with_context(|| format!("invalid seed {}", path.display()))?;
        Ok(seed)
    }
}

pub struct Pipeline {
    state: StateStore,
    aggregator: Arc<dyn ProcessAggregator>,
    updater: Arc<Updater>,
}

impl Pipeline {
    pub fn new(
        state: StateStore,
        aggregator: Arc<dyn ProcessAggregator>,
        updater: Arc<Updater>,
    ) -> Self {
        Self {
            state,
            aggregator,
            updater,
        }
    }

    /// Persist a scanned image and index its executables.
    ///
    /// The stored copy keeps its executables so the cache can be rebuilt on
    /// restart. The stripped copy is returned.
    pub fn ingest_image(&self, image: Image) -> anyhow::Result<Image> {
        self.state.put_image(&image)?;
        let mut image = image;
        self.updater.populate_executable_cache(&mut image);
        debug!(image_id = %image.id, "image ingested");
        Ok(image)
    }

    pub fn ingest_deployment(&self, deployment: &Deployment) -> anyhow::Result<()> {
        self.state.put_deployment(deployment)?;
        self.aggregator.refresh_deployment(deployment);
        debug!(
            deployment_id = %deployment.id,
            containers = deployment.containers.len(),
            "deployment ingested"
        );
        Ok(())
    }

    pub fn ingest_indicators(&self, indicators: &[ProcessIndicator]) -> anyhow::Result<()> {
        if indicators.is_empty() {
            return Ok(());
        }
        self.state.put_process_indicators(indicators)?;
        self.aggregator.add(indicators);
        debug!(count = indicators.len(), "process indicators ingested");
        Ok(())
    }

    /// Delete a deployment with its indicators and active components.
    ///
    /// The aggregator forgets it on the next cycle, once it is missing from
    /// the deployment store.
    pub fn remove_deployment(&self, deployment_id: &str) -> anyhow::Result<bool> {
        let removed = self.state.delete_deployment(deployment_id)?;
        if removed {
            info!(deployment_id, "deployment removed");
        }
        Ok(removed)
    }

    /// Rebuild in-memory state from the store after a restart.
    ///
    /// Every stored container is queued for a database-origin update, so
    /// stored indicators need no replay.
    pub fn bootstrap(&self) -> anyhow::Result<()> {
        let images = self.state.list_images()?;
        for mut image in images.iter().cloned() {
            self.updater.populate_executable_cache(&mut image);
        }

        let deployments = self.state.list_deployments()?;
        for deployment in &deployments {
            self.aggregator.refresh_deployment(deployment);
        }

        info!(
            images = images.len(),
            deployments = deployments.len(),
            "state bootstrapped"
        );
        Ok(())
    }

    pub fn ingest_seed(&self, seed: Seed) -> anyhow::Result<()> {
        let Seed {
            images,
            deployments,
            indicators,
            removed_deployments,
        } = seed;
        let counts = (images.len(), deployments.len(), indicators.len());

        for image in images {
            self.ingest_image(image)?;
        }
        for deployment in &deployments {
            self.ingest_deployment(deployment)?;
        }
        self.ingest_indicators(&indicators)?;
        for deployment_id in &removed_deployments {
            self.remove_deployment(deployment_id)?;
        }

        info!(
            images = counts.0,
            deployments = counts.1,
            indicators = counts.2,
            removed = removed_deployments.len(),
            "seed ingested"
        );
        Ok(())
    }
}
