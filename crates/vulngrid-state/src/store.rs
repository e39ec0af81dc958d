//! StateStore: redb-backed persistence for vulngrid.
//!
//! Provides typed CRUD over images, deployments, process indicators, and
//! active components, and implements the [`crate::datastore`] contracts the
//! updater consumes. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::datastore::{ActiveComponentStore, DeploymentStore, ImageStore, ProcessIndicatorStore};
use crate::error::{StateError, StateResult};
use crate::ids;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(IMAGES).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(PROCESS_INDICATORS).map_err(map_err!(Table))?;
        txn.open_table(ACTIVE_COMPONENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Images ─────────────────────────────────────────────────────

    /// Insert or update an image.
    pub fn put_image(&self, image: &Image) -> StateResult<()> {
        self.put_many(IMAGES, [(image.id.clone(), image)])?;
        debug!(image_id = %image.id, "image stored");
        Ok(())
    }

    /// Get an image by ID.
    pub fn get_image(&self, image_id: &str) -> StateResult<Option<Image>> {
        self.get(IMAGES, image_id)
    }

    /// List all images.
    pub fn list_images(&self) -> StateResult<Vec<Image>> {
        self.scan(IMAGES, None)
    }

    /// Delete an image by ID. Returns true if it existed.
    pub fn delete_image(&self, image_id: &str) -> StateResult<bool> {
        let removed = self.remove_many(IMAGES, &[image_id.to_string()])?;
        Ok(removed > 0)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        self.put_many(DEPLOYMENTS, [(deployment.id.clone(), deployment)])?;
        debug!(deployment_id = %deployment.id, "deployment stored");
        Ok(())
    }

    /// Get a deployment by ID.
    pub fn get_deployment(&self, deployment_id: &str) -> StateResult<Option<Deployment>> {
        self.get(DEPLOYMENTS, deployment_id)
    }

    /// List all deployments.
    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        self.scan(DEPLOYMENTS, None)
    }

    /// Delete a deployment together with its process indicators and active
    /// components. Returns true if the deployment existed.
    pub fn delete_deployment(&self, deployment_id: &str) -> StateResult<bool> {
        let prefix = ids::prefix(deployment_id);
        let indicator_keys = self.keys_with_prefix(PROCESS_INDICATORS, &prefix)?;
        let component_keys = self.keys_with_prefix(ACTIVE_COMPONENTS, &prefix)?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            existed = table.remove(deployment_id).map_err(map_err!(Write))?.is_some();
            let mut table = txn.open_table(PROCESS_INDICATORS).map_err(map_err!(Table))?;
            for key in &indicator_keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            let mut table = txn.open_table(ACTIVE_COMPONENTS).map_err(map_err!(Table))?;
            for key in &component_keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %deployment_id,
            existed,
            indicators = indicator_keys.len(),
            active_components = component_keys.len(),
            "deployment deleted"
        );
        Ok(existed)
    }

    // ── Process indicators ─────────────────────────────────────────

    /// Insert or update a batch of process indicators.
    pub fn put_process_indicators(&self, indicators: &[ProcessIndicator]) -> StateResult<()> {
        self.put_many(
            PROCESS_INDICATORS,
            indicators.iter().map(|pi| (pi.table_key(), pi)),
        )?;
        debug!(count = indicators.len(), "process indicators stored");
        Ok(())
    }

    /// List all process indicators recorded for a deployment.
    pub fn list_process_indicators_for_deployment(
        &self,
        deployment_id: &str,
    ) -> StateResult<Vec<ProcessIndicator>> {
        let indicators: Vec<ProcessIndicator> =
            self.scan(PROCESS_INDICATORS, Some(&ids::prefix(deployment_id)))?;
        Ok(indicators
            .into_iter()
            .filter(|pi| pi.deployment_id == deployment_id)
            .collect())
    }

    // ── Active components ──────────────────────────────────────────

    /// Get an active component by its composite ID.
    pub fn get_active_component(&self, id: &str) -> StateResult<Option<ActiveComponent>> {
        self.get(ACTIVE_COMPONENTS, id)
    }

    /// List every active component.
    pub fn list_active_components(&self) -> StateResult<Vec<ActiveComponent>> {
        self.scan(ACTIVE_COMPONENTS, None)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Deserialize every value, or only those whose key starts with `prefix`.
    fn scan<T: DeserializeOwned>(&self, table: Table, prefix: Option<&str>) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if prefix.is_some_and(|p| !key.value().starts_with(p)) {
                continue;
            }
            let doc: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(doc);
        }
        Ok(results)
    }

    fn keys_with_prefix(&self, table: Table, prefix: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                keys.push(key.value().to_string());
            }
        }
        Ok(keys)
    }

    /// Write all entries in one transaction.
    fn put_many<'a, T, I>(&self, table: Table, entries: I) -> StateResult<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = (String, &'a T)>,
    {
        // Serialize up front so a bad document aborts before the transaction opens.
        let encoded = entries
            .into_iter()
            .map(|(key, doc)| Ok((key, serde_json::to_vec(doc).map_err(map_err!(Serialize))?)))
            .collect::<StateResult<Vec<_>>>()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            for (key, value) in &encoded {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Remove all keys in one transaction. Returns how many existed.
    fn remove_many(&self, table: Table, keys: &[String]) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            for key in keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }
}

impl DeploymentStore for StateStore {
    fn deployment_ids(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }
}

impl ImageStore for StateStore {
    fn image_ids(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(IMAGES).map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }
}

impl ProcessIndicatorStore for StateStore {
    fn search_process_indicators(
        &self,
        deployment_id: &str,
        container_name: &str,
    ) -> StateResult<Vec<ProcessIndicator>> {
        let prefix = ids::compose(&[deployment_id, container_name]) + ":";
        let indicators: Vec<ProcessIndicator> = self.scan(PROCESS_INDICATORS, Some(&prefix))?;
        Ok(indicators
            .into_iter()
            .filter(|pi| pi.deployment_id == deployment_id && pi.container_name == container_name)
            .collect())
    }
}

impl ActiveComponentStore for StateStore {
    fn get_batch(&self, ids: &[String]) -> StateResult<Vec<ActiveComponent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIVE_COMPONENTS).map_err(map_err!(Table))?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(guard) = table.get(id.as_str()).map_err(map_err!(Read))? {
                let doc: ActiveComponent =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                results.push(doc);
            }
        }
        Ok(results)
    }

    fn search_active_components(&self, deployment_id: &str) -> StateResult<Vec<ActiveComponent>> {
        let docs: Vec<ActiveComponent> =
            self.scan(ACTIVE_COMPONENTS, Some(&ids::prefix(deployment_id)))?;
        Ok(docs
            .into_iter()
            .filter(|ac| ac.deployment_id == deployment_id)
            .collect())
    }

    fn upsert_batch(&self, docs: &[ActiveComponent]) -> StateResult<()> {
        self.put_many(ACTIVE_COMPONENTS, docs.iter().map(|ac| (ac.id.clone(), ac)))?;
        debug!(count = docs.len(), "active components upserted");
        Ok(())
    }

    fn delete_batch(&self, ids: &[String]) -> StateResult<()> {
        let removed = self.remove_many(ACTIVE_COMPONENTS, ids)?;
        debug!(requested = ids.len(), removed, "active components deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_image(id: &str) -> Image {
        Image {
            id: id.to_string(),
            name: format!("docker.io/library/{id}:latest"),
            scan: Some(ImageScan {
                scanner_version: "2.22.0".to_string(),
                scan_time: 1000,
                components: vec![EmbeddedComponent {
                    name: "bash".to_string(),
                    version: "5.1".to_string(),
                    source: SourceType::Os,
                    executables: vec![Executable {
                        path: "/bin/bash".to_string(),
                        dependencies: vec![ids::component_id("bash", "5.1", "")],
                    }],
                }],
            }),
        }
    }

    fn test_deployment(id: &str, containers: &[(&str, &str)]) -> Deployment {
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

    fn test_indicator(deployment: &str, container: &str, index: u32, path: &str) -> ProcessIndicator {
        ProcessIndicator {
            id: format!("pi-{index}"),
            deployment_id: deployment.to_string(),
            container_name: container.to_string(),
            image_id: "image1".to_string(),
            exec_file_path: path.to_string(),
        }
    }

    fn test_active_component(deployment: &str, component: &str, containers: &[&str]) -> ActiveComponent {
        let contexts = containers
            .iter()
            .map(|c| {
                (
                    c.to_string(),
                    ActiveContext {
                        container_name: c.to_string(),
                        image_id: "image1".to_string(),
                    },
                )
            })
            .collect::<HashMap<_, _>>();
        ActiveComponent::new(deployment, component, contexts)
    }

    // ── Image CRUD ─────────────────────────────────────────────────

    #[test]
    fn image_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let image = test_image("image1");

        store.put_image(&image).unwrap();
        assert_eq!(store.get_image("image1").unwrap(), Some(image));
    }

    #[test]
    fn image_ids_lists_every_image() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_image(&test_image("image1")).unwrap();
        store.put_image(&test_image("image2")).unwrap();

        let mut ids = store.image_ids().unwrap();
        ids.sort();
        assert_eq!(ids, ["image1", "image2"]);

        assert!(store.delete_image("image1").unwrap());
        assert!(!store.delete_image("image1").unwrap());
        assert_eq!(store.image_ids().unwrap(), ["image2"]);
    }

    // ── Deployment CRUD ────────────────────────────────────────────

    #[test]
    fn deployment_put_get_and_ids() {
        let store = StateStore::open_in_memory().unwrap();
        let dep = test_deployment("depA", &[("c1", "image1")]);

        store.put_deployment(&dep).unwrap();
        store.put_deployment(&test_deployment("depB", &[])).unwrap();

        assert_eq!(store.get_deployment("depA").unwrap(), Some(dep));
        let mut ids = store.deployment_ids().unwrap();
        ids.sort();
        assert_eq!(ids, ["depA", "depB"]);
        assert_eq!(store.list_deployments().unwrap().len(), 2);
    }

    #[test]
    fn deployment_delete_cascades_to_owned_documents() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&test_deployment("dep", &[("c1", "image1")])).unwrap();
        store.put_deployment(&test_deployment("dep2", &[("c1", "image1")])).unwrap();
        store
            .put_process_indicators(&[
                test_indicator("dep", "c1", 0, "/bin/bash"),
                test_indicator("dep2", "c1", 0, "/bin/bash"),
            ])
            .unwrap();
        store
            .upsert_batch(&[
                test_active_component("dep", "bash", &["c1"]),
                test_active_component("dep2", "bash", &["c1"]),
            ])
            .unwrap();

        assert!(store.delete_deployment("dep").unwrap());
        assert!(!store.delete_deployment("dep").unwrap());

        assert!(store.list_process_indicators_for_deployment("dep").unwrap().is_empty());
        assert!(store.search_active_components("dep").unwrap().is_empty());
        assert_eq!(store.list_process_indicators_for_deployment("dep2").unwrap().len(), 1);
        assert_eq!(store.search_active_components("dep2").unwrap().len(), 1);
    }

    // ── Process indicators ─────────────────────────────────────────

    #[test]
    fn indicators_are_scoped_to_container() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_process_indicators(&[
                test_indicator("dep", "c1", 0, "/bin/bash"),
                test_indicator("dep", "c1", 1, "/bin/ls"),
                test_indicator("dep", "c10", 0, "/bin/cat"),
                test_indicator("dep2", "c1", 0, "/bin/sh"),
            ])
            .unwrap();

        let found = store.search_process_indicators("dep", "c1").unwrap();
        let mut paths: Vec<_> = found.iter().map(|pi| pi.exec_file_path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, ["/bin/bash", "/bin/ls"]);

        assert_eq!(store.list_process_indicators_for_deployment("dep").unwrap().len(), 3);
        assert!(store.search_process_indicators("dep", "c2").unwrap().is_empty());
    }

    // ── Active components ──────────────────────────────────────────

    #[test]
    fn get_batch_returns_only_existing() {
        let store = StateStore::open_in_memory().unwrap();
        let ac = test_active_component("dep", "bash", &["c1"]);
        store.upsert_batch(std::slice::from_ref(&ac)).unwrap();

        let missing = ids::active_component_id("dep", "zsh");
        let found = store.get_batch(&[ac.id.clone(), missing]).unwrap();
        assert_eq!(found, vec![ac]);
        assert!(store.get_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn search_is_scoped_to_deployment() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .upsert_batch(&[
                test_active_component("dep", "bash", &["c1"]),
                test_active_component("dep", "curl", &["c1", "c2"]),
                test_active_component("dep-other", "bash", &["c1"]),
            ])
            .unwrap();

        let found = store.search_active_components("dep").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|ac| ac.deployment_id == "dep"));
    }

    #[test]
    fn upsert_replaces_and_delete_batch_ignores_missing() {
        let store = StateStore::open_in_memory().unwrap();
        let mut ac = test_active_component("dep", "bash", &["c1"]);
        store.upsert_batch(std::slice::from_ref(&ac)).unwrap();

        ac.active_contexts.clear();
        ac.active_contexts.insert(
            "c2".to_string(),
            ActiveContext {
                container_name: "c2".to_string(),
                image_id: "image2".to_string(),
            },
        );
        store.upsert_batch(std::slice::from_ref(&ac)).unwrap();
        assert_eq!(store.get_active_component(&ac.id).unwrap(), Some(ac.clone()));

        store
            .delete_batch(&[ac.id.clone(), "never-existed".to_string()])
            .unwrap();
        assert!(store.get_active_component(&ac.id).unwrap().is_none());
        assert!(store.list_active_components().unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_image(&test_image("image1")).unwrap();
            store
                .upsert_batch(&[test_active_component("dep", "bash", &["c1"])])
                .unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_image("image1").unwrap().is_some());
        assert_eq!(store.search_active_components("dep").unwrap().len(), 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.deployment_ids().unwrap().is_empty());
        assert!(store.image_ids().unwrap().is_empty());
        assert!(store.list_images().unwrap().is_empty());
        assert!(store.search_active_components("any").unwrap().is_empty());
        assert!(store.search_process_indicators("any", "c").unwrap().is_empty());
        assert!(!store.delete_deployment("nope").unwrap());
        store.upsert_batch(&[]).unwrap();
        store.delete_batch(&[]).unwrap();
    }
}
