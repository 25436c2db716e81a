//! Inventory of artifacts available in the store

use mmhost_core::{HostResult, InventoryRecord, ModelId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type RecordsMap = HashMap<ModelId, InventoryRecord>;

/// Tracks which identifiers are registered and where their artifacts live.
///
/// Membership here is independent of what the cache holds: deregistering an
/// identifier leaves an already-loaded copy alone.
pub struct Inventory {
    /// Records indexed by identifier
    records: RwLock<RecordsMap>,
    /// JSON file mirrored on every mutation
    persist_path: Option<PathBuf>,
}

impl Inventory {
    /// Create an in-memory inventory
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            persist_path: None,
        }
    }

    /// Open an inventory backed by a JSON file, loading it if present
    pub async fn open(path: PathBuf) -> HostResult<Self> {
        let mut records = HashMap::new();

        if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read(&path).await?;
            let stored: Vec<InventoryRecord> = serde_json::from_slice(&content)?;
            for record in stored {
                records.insert(record.id.clone(), record);
            }
            info!(
                path = %path.display(),
                models = records.len(),
                "Loaded inventory"
            );
        }

        Ok(Self {
            records: RwLock::new(records),
            persist_path: Some(path),
        })
    }

    /// Register an artifact, replacing any record with the same identifier
    pub async fn register(&self, record: InventoryRecord) -> HostResult<Option<InventoryRecord>> {
        let mut records = self.records.write().await;
        let id = record.id.clone();
        let location = record.location.to_string();
        let previous = records.insert(id.clone(), record);
        if let Err(e) = self.persist(&records).await {
            match previous {
                Some(old) => records.insert(id.clone(), old),
                None => records.remove(&id),
            };
            warn!(model_id = %id, error = %e, "Registration not persisted, rolled back");
            return Err(e);
        }

        info!(
            model_id = %id,
            location = %location,
            replaced = previous.is_some(),
            "Registered model artifact"
        );

        Ok(previous)
    }

    /// Remove an identifier from the inventory
    pub async fn deregister(&self, id: &ModelId) -> HostResult<Option<InventoryRecord>> {
        let mut records = self.records.write().await;
        let Some(removed) = records.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = self.persist(&records).await {
            records.insert(id.clone(), removed);
            warn!(model_id = %id, error = %e, "Deregistration not persisted, rolled back");
            return Err(e);
        }
        info!(model_id = %id, "Deregistered model artifact");
        Ok(Some(removed))
    }

    /// Look up the record for an identifier
    pub async fn lookup(&self, id: &ModelId) -> Option<InventoryRecord> {
        let records = self.records.read().await;
        records.get(id).cloned()
    }

    /// Check if an identifier is registered
    pub async fn contains(&self, id: &ModelId) -> bool {
        self.records.read().await.contains_key(id)
    }

    /// Snapshot of registered identifiers, sorted
    pub async fn list(&self) -> Vec<ModelId> {
        let records = self.records.read().await;
        let mut ids: Vec<ModelId> = records.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of all records, sorted by identifier
    pub async fn records(&self) -> Vec<InventoryRecord> {
        let records = self.records.read().await;
        let mut all: Vec<InventoryRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Number of registered identifiers
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Write the records to the backing file via temp file + rename; the
    /// temp file never outlives a failed attempt
    async fn persist(&self, records: &RecordsMap) -> HostResult<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };

        let mut all: Vec<&InventoryRecord> = records.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        let content = serde_json::to_vec_pretty(&all)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(path);
        let written = async {
            tokio::fs::write(&tmp, content).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                debug!(path = %tmp.display(), error = %cleanup, "No temp inventory to remove");
            }
            return Err(e.into());
        }

        debug!(path = %path.display(), models = all.len(), "Persisted inventory");
        Ok(())
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmhost_core::ArtifactLocation;

    fn record(id: &str) -> InventoryRecord {
        InventoryRecord::new(
            ModelId::parse(id).unwrap(),
            ArtifactLocation::parse(&format!("file:///models/{}.json", id)).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let inventory = Inventory::new();
        assert!(inventory.is_empty().await);

        let previous = inventory.register(record("Chicago_IL")).await.unwrap();
        assert!(previous.is_none());

        let id = ModelId::parse("Chicago_IL").unwrap();
        assert!(inventory.contains(&id).await);
        let found = inventory.lookup(&id).await.unwrap();
        assert_eq!(found.location.to_string(), "file:///models/Chicago_IL.json");
    }

    #[tokio::test]
    async fn test_register_replaces_existing() {
        let inventory = Inventory::new();
        inventory.register(record("Denver_CO")).await.unwrap();

        let mut updated = record("Denver_CO");
        updated.location = ArtifactLocation::parse("file:///models/v2/Denver_CO.json").unwrap();
        let previous = inventory.register(updated).await.unwrap();

        assert!(previous.is_some());
        assert_eq!(inventory.len().await, 1);
        let id = ModelId::parse("Denver_CO").unwrap();
        assert!(inventory
            .lookup(&id)
            .await
            .unwrap()
            .location
            .to_string()
            .contains("/v2/"));
    }

    #[tokio::test]
    async fn test_list_and_deregister() {
        let inventory = Inventory::new();
        for id in ["Miami_FL", "Austin_TX", "Boston_MA"] {
            inventory.register(record(id)).await.unwrap();
        }

        let ids: Vec<String> = inventory.list().await.iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["Austin_TX", "Boston_MA", "Miami_FL"]);

        let austin = ModelId::parse("Austin_TX").unwrap();
        assert!(inventory.deregister(&austin).await.unwrap().is_some());
        assert!(inventory.deregister(&austin).await.unwrap().is_none());
        assert_eq!(inventory.len().await, 2);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("inventory.json");

        {
            let inventory = Inventory::open(path.clone()).await.unwrap();
            inventory.register(record("Seattle_WA")).await.unwrap();
            inventory
                .register(record("Portland_OR").with_sha256("00ff"))
                .await
                .unwrap();
            inventory
                .deregister(&ModelId::parse("Seattle_WA").unwrap())
                .await
                .unwrap();
        }

        assert!(!tmp_path(&path).exists());
        let reopened = Inventory::open(path).await.unwrap();
        let records = reopened.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_str(), "Portland_OR");
        assert_eq!(records[0].sha256.as_deref(), Some("00ff"));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_records_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        let inventory = Inventory::open(path.clone()).await.unwrap();
        inventory.register(record("Tucson_AZ")).await.unwrap();

        // a non-empty directory in place of the file makes the rename fail
        tokio::fs::remove_file(&path).await.unwrap();
        tokio::fs::create_dir(&path).await.unwrap();
        tokio::fs::write(path.join("keep"), b"x").await.unwrap();

        assert!(inventory.register(record("Mesa_AZ")).await.is_err());
        assert!(!inventory.contains(&ModelId::parse("Mesa_AZ").unwrap()).await);

        let mut moved = record("Tucson_AZ");
        moved.location = ArtifactLocation::parse("file:///elsewhere/Tucson_AZ.json").unwrap();
        assert!(inventory.register(moved).await.is_err());

        let tucson = ModelId::parse("Tucson_AZ").unwrap();
        assert!(inventory.deregister(&tucson).await.is_err());
        let kept = inventory.lookup(&tucson).await.unwrap();
        assert_eq!(kept.location.to_string(), "file:///models/Tucson_AZ.json");
        assert_eq!(inventory.len().await, 1);
        assert!(!tmp_path(&path).exists());
    }
}
