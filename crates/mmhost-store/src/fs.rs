//! Filesystem-backed artifact store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mmhost_core::{ArtifactLocation, HostError, HostResult, InventoryRecord, ModelId};
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::store::{ArtifactStore, StagedArtifact, StagingArea};

/// Extension of artifact files picked up by [`scan_dir`]
pub const ARTIFACT_EXTENSION: &str = "json";

const COPY_CHUNK: usize = 64 * 1024;

/// Store for `file://` locations on a locally mounted volume
#[derive(Debug, Default, Clone)]
pub struct FsArtifactStore;

impl FsArtifactStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn fetch(
        &self,
        record: &InventoryRecord,
        staging: &StagingArea,
    ) -> HostResult<StagedArtifact> {
        let ArtifactLocation::File(source) = &record.location else {
            return Err(HostError::InvalidLocation(record.location.to_string()));
        };

        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| io_error(&record.id, source, e))?;
        if !metadata.is_file() {
            return Err(HostError::NotFound {
                id: record.id.clone(),
                message: format!("{} is not a file", source.display()),
            });
        }
        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        debug!(
            model_id = %record.id,
            source = %source.display(),
            bytes = metadata.len(),
            "Fetching artifact from filesystem"
        );

        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|e| io_error(&record.id, source, e))?;
        let mut writer = staging.create(&record.id).await?;
        let mut buf = vec![0u8; COPY_CHUNK];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| io_error(&record.id, source, e))?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n]).await?;
        }

        writer
            .finish(record, Some(metadata.len()), last_modified)
            .await
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

fn io_error(id: &ModelId, path: &Path, err: std::io::Error) -> HostError {
    match err.kind() {
        ErrorKind::NotFound => HostError::NotFound {
            id: id.clone(),
            message: format!("{} does not exist", path.display()),
        },
        _ => HostError::TransientStore {
            id: id.clone(),
            message: format!("reading {} failed: {}", path.display(), err),
        },
    }
}

/// List artifact files directly under `root` as inventory records.
///
/// The identifier is the file stem, so `root/Chicago_IL.json` registers as
/// `Chicago_IL`. Files whose stem is not a valid identifier are skipped.
pub async fn scan_dir(root: &Path) -> HostResult<Vec<InventoryRecord>> {
    let mut records = Vec::new();

    if !tokio::fs::try_exists(root).await? {
        return Ok(records);
    }

    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(true, |e| e != ARTIFACT_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem() else {
            continue;
        };
        match ModelId::parse(stem.to_string_lossy().into_owned()) {
            Ok(id) => {
                let location = ArtifactLocation::File(tokio::fs::canonicalize(&path).await?);
                records.push(InventoryRecord::new(id, location));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping artifact with invalid name");
            }
        }
    }

    records.sort_by(|a, b| a.id.cmp(&b.id));
    info!(root = %root.display(), found = records.len(), "Scanned artifact directory");
    Ok(records)
}
