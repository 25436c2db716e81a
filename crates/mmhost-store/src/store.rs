//! Artifact store trait, local staging and fetch retry

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mmhost_core::{ArtifactHandle, HostError, HostResult, InventoryRecord, ModelId};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Client for fetching immutable artifacts out of durable storage
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Copy the artifact named by `record` into local staging
    async fn fetch(&self, record: &InventoryRecord, staging: &StagingArea)
        -> HostResult<StagedArtifact>;

    /// Get the store name
    fn name(&self) -> &'static str;
}

/// Directory that holds artifacts between fetch and load
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Create the staging directory if needed and clear `.part` files a
    /// previous process left behind
    pub async fn init(&self) -> HostResult<()> {
        if !tokio::fs::try_exists(&self.dir).await? {
            tokio::fs::create_dir_all(&self.dir).await?;
            info!(path = %self.dir.display(), "Created staging directory");
            return Ok(());
        }

        let mut swept = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "part") && entry.file_type().await?.is_file()
            {
                tokio::fs::remove_file(&path).await?;
                swept += 1;
            }
        }
        if swept > 0 {
            info!(path = %self.dir.display(), files = swept, "Removed leftover staging files");
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Stage an in-memory artifact body in one step
    pub async fn stage_bytes(
        &self,
        record: &InventoryRecord,
        bytes: &[u8],
    ) -> HostResult<StagedArtifact> {
        let mut writer = self.create(&record.id).await?;
        writer.write(bytes).await?;
        writer.finish(record, Some(bytes.len() as u64), None).await
    }

    /// Open a fresh staging file for `id`
    pub async fn create(&self, id: &ModelId) -> HostResult<StagingWriter> {
        let path = self
            .dir
            .join(format!("{}-{}.part", id.file_stem(), Uuid::new_v4()));
        let file = tokio::fs::File::create(&path).await.map_err(|e| {
            HostError::TransientStore {
                id: id.clone(),
                message: format!("cannot create staging file {}: {}", path.display(), e),
            }
        })?;

        Ok(StagingWriter {
            id: id.clone(),
            file,
            hasher: Sha256::new(),
            written: 0,
            path: Some(path),
        })
    }
}

/// Staging file being written; removed on drop unless finished
pub struct StagingWriter {
    id: ModelId,
    file: tokio::fs::File,
    hasher: Sha256,
    written: u64,
    path: Option<PathBuf>,
}

impl StagingWriter {
    pub async fn write(&mut self, chunk: &[u8]) -> HostResult<()> {
        self.hasher.update(chunk);
        self.written += chunk.len() as u64;
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| HostError::TransientStore {
                id: self.id.clone(),
                message: format!("staging write failed: {}", e),
            })
    }

    /// Flush, verify size and digest against the record, and hand over the file
    pub async fn finish(
        mut self,
        record: &InventoryRecord,
        expected_size: Option<u64>,
        last_modified: Option<DateTime<Utc>>,
    ) -> HostResult<StagedArtifact> {
        self.file
            .flush()
            .await
            .map_err(|e| HostError::TransientStore {
                id: self.id.clone(),
                message: format!("staging flush failed: {}", e),
            })?;

        if let Some(expected) = expected_size {
            if expected != self.written {
                return Err(HostError::Corrupt {
                    id: self.id.clone(),
                    message: format!(
                        "size mismatch: expected {} bytes, received {}",
                        expected, self.written
                    ),
                });
            }
        }

        let digest = format!("{:x}", std::mem::take(&mut self.hasher).finalize());
        if let Some(expected) = &record.sha256 {
            if *expected != digest {
                return Err(HostError::Corrupt {
                    id: self.id.clone(),
                    message: format!("sha256 mismatch: expected {}, computed {}", expected, digest),
                });
            }
        }

        let path = self
            .path
            .take()
            .ok_or_else(|| HostError::Internal("staging file already handed over".to_string()))?;

        debug!(
            model_id = %self.id,
            path = %path.display(),
            bytes = self.written,
            "Staged artifact"
        );

        Ok(StagedArtifact {
            handle: ArtifactHandle {
                id: self.id.clone(),
                location: record.location.clone(),
                size: self.written,
                last_modified,
                sha256: digest,
            },
            path,
        })
    }
}

impl Drop for StagingWriter {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            remove_staging_file(&path);
        }
    }
}

/// Artifact bytes sitting in local staging, removed when dropped
#[derive(Debug)]
pub struct StagedArtifact {
    /// Store-side description of the artifact
    pub handle: ArtifactHandle,
    path: PathBuf,
}

impl StagedArtifact {
    /// Local path of the staged bytes
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> &ModelId {
        &self.handle.id
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        remove_staging_file(&self.path);
    }
}

fn remove_staging_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Cleared staging file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to clear staging file"),
    }
}

/// Bounds on fetch attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Timeout for a single attempt
    pub fetch_timeout: Duration,
    /// Extra attempts after a transient failure
    pub retries: u32,
    /// Delay before the first retry, doubled each time
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            retries: 2,
            backoff: Duration::from_millis(100),
        }
    }
}

impl From<&mmhost_core::StoreConfig> for RetryPolicy {
    fn from(config: &mmhost_core::StoreConfig) -> Self {
        Self {
            fetch_timeout: config.store_fetch_timeout(),
            retries: config.fetch_retry_count,
            backoff: config.fetch_backoff(),
        }
    }
}

/// Fetch with a per-attempt timeout, retrying only transient failures
pub async fn fetch_with_retry(
    store: &dyn ArtifactStore,
    record: &InventoryRecord,
    staging: &StagingArea,
    policy: &RetryPolicy,
) -> HostResult<StagedArtifact> {
    let mut delay = policy.backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.fetch_timeout, store.fetch(record, staging))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(HostError::TransientStore {
                id: record.id.clone(),
                message: format!("fetch timed out after {:?}", policy.fetch_timeout),
            }),
        };

        match result {
            Ok(staged) => return Ok(staged),
            Err(e) if e.is_retryable() && attempt <= policy.retries => {
                warn!(
                    model_id = %record.id,
                    store = store.name(),
                    attempt = attempt,
                    error = %e,
                    "Transient store failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmhost_core::ArtifactLocation;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record(id: &str) -> InventoryRecord {
        InventoryRecord::new(
            ModelId::parse(id).unwrap(),
            ArtifactLocation::parse(&format!("file:///models/{}.json", id)).unwrap(),
        )
    }

    /// Fails transiently a fixed number of times, then stages fixed bytes
    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ArtifactStore for FlakyStore {
        async fn fetch(
            &self,
            record: &InventoryRecord,
            staging: &StagingArea,
        ) -> HostResult<StagedArtifact> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(HostError::TransientStore {
                    id: record.id.clone(),
                    message: "connection reset".to_string(),
                });
            }
            let mut writer = staging.create(&record.id).await?;
            writer.write(b"{}").await?;
            writer.finish(record, Some(2), None).await
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            fetch_timeout: Duration::from_secs(5),
            retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_init_sweeps_leftover_part_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("staging");
        let staging = StagingArea::new(root.clone());
        staging.init().await.unwrap();
        assert!(root.is_dir());

        let leftover = root.join("Tulsa_OK-0b6f.part");
        tokio::fs::write(&leftover, b"half a model").await.unwrap();
        tokio::fs::write(root.join("notes.txt"), b"keep").await.unwrap();

        StagingArea::new(root.clone()).init().await.unwrap();
        assert!(!leftover.exists());
        assert!(root.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().to_path_buf());
        let store = FlakyStore {
            failures: 2,
            calls: AtomicU32::new(0),
        };

        let staged = fetch_with_retry(&store, &record("Tulsa_OK"), &staging, &fast_policy(2))
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(staged.handle.size, 2);
        assert!(staged.path().exists());

        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().to_path_buf());
        let store = FlakyStore {
            failures: 3,
            calls: AtomicU32::new(0),
        };

        let err = fetch_with_retry(&store, &record("Tulsa_OK"), &staging, &fast_policy(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransientStoreError");
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_digest_mismatch_is_corrupt_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().to_path_buf());
        let record = record("Omaha_NE").with_sha256("deadbeef");

        let mut writer = staging.create(&record.id).await.unwrap();
        writer.write(b"payload").await.unwrap();
        let err = writer.finish(&record, None, None).await.unwrap_err();

        assert_eq!(err.kind(), "Corrupt");
        let leftover = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().to_path_buf());
        let record = record("Omaha_NE");

        let mut writer = staging.create(&record.id).await.unwrap();
        writer.write(b"abc").await.unwrap();
        let err = writer.finish(&record, Some(10), None).await.unwrap_err();
        assert!(matches!(err, HostError::Corrupt { .. }));
    }
}
