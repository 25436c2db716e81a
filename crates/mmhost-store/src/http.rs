//! HTTP(S) artifact store and scheme routing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mmhost_core::{ArtifactLocation, HostError, HostResult, InventoryRecord, ModelId};
use reqwest::StatusCode;
use tracing::debug;

use crate::fs::FsArtifactStore;
use crate::store::{ArtifactStore, StagedArtifact, StagingArea};

/// Store for `http://` and `https://` locations (object storage gateways,
/// presigned URLs, plain file servers)
#[derive(Debug, Clone, Default)]
pub struct HttpArtifactStore {
    client: reqwest::Client,
}

impl HttpArtifactStore {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn fetch(
        &self,
        record: &InventoryRecord,
        staging: &StagingArea,
    ) -> HostResult<StagedArtifact> {
        let ArtifactLocation::Http(url) = &record.location else {
            return Err(HostError::InvalidLocation(record.location.to_string()));
        };

        debug!(model_id = %record.id, url = %url, "Fetching artifact over HTTP");

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transient(&record.id, format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&record.id, url, status));
        }

        let expected_size = response.content_length();
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let mut writer = staging.create(&record.id).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transient(&record.id, format!("download from {} failed: {}", url, e)))?
        {
            writer.write(&chunk).await?;
        }

        writer.finish(record, expected_size, last_modified).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn transient(id: &ModelId, message: String) -> HostError {
    HostError::TransientStore {
        id: id.clone(),
        message,
    }
}

/// Map a non-success HTTP status onto the store error taxonomy
fn status_error(id: &ModelId, url: &str, status: StatusCode) -> HostError {
    let message = format!("GET {} returned {}", url, status);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        transient(id, message)
    } else {
        HostError::NotFound {
            id: id.clone(),
            message,
        }
    }
}

/// Routes each record to the store that understands its location scheme
#[derive(Debug, Clone, Default)]
pub struct LocationStore {
    fs: FsArtifactStore,
    http: HttpArtifactStore,
}

impl LocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for LocationStore {
    async fn fetch(
        &self,
        record: &InventoryRecord,
        staging: &StagingArea,
    ) -> HostResult<StagedArtifact> {
        match record.location {
            ArtifactLocation::File(_) => self.fs.fetch(record, staging).await,
            ArtifactLocation::Http(_) => self.http.fetch(record, staging).await,
        }
    }

    fn name(&self) -> &'static str {
        "location"
    }
}
