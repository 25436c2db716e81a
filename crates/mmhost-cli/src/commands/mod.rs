//! CLI commands implementation

use anyhow::Result;
use chrono::{DateTime, Utc};
use mmhost_core::{ErrorBody, Prediction, PredictRequest};
use serde::{Deserialize, Serialize};

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Registered model from API
#[derive(Debug, Deserialize)]
pub struct ModelResponse {
    pub model_identifier: String,
    pub location: String,
    #[serde(default)]
    pub sha256: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub resident: bool,
}

/// Cache statistics from API
#[derive(Debug, Deserialize)]
pub struct CacheStats {
    pub resident: usize,
    pub capacity: usize,
    pub resident_bytes: u64,
    pub memory_budget_bytes: Option<u64>,
    pub in_flight_loads: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

/// Resident entry from API
#[derive(Debug, Deserialize)]
pub struct EntrySnapshot {
    pub id: String,
    pub kind: String,
    pub footprint_bytes: u64,
    pub ref_count: usize,
    pub hits: u64,
    pub last_access: DateTime<Utc>,
}

/// Cache response from API
#[derive(Debug, Deserialize)]
pub struct CacheResponse {
    pub stats: CacheStats,
    pub entries: Vec<EntrySnapshot>,
}

/// Status response
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub registered_models: usize,
    pub cache: CacheStats,
}

/// Turn a non-success response into an error carrying the daemon's message
async fn failure(response: reqwest::Response, action: &str) -> anyhow::Error {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => anyhow::anyhow!("{} failed ({}): {}", action, body.error_kind, body.message),
        Err(_) => anyhow::anyhow!("{} failed ({}): {}", action, status, text),
    }
}

/// Register a model
pub async fn register(
    client: &ApiClient,
    model: String,
    location: String,
    sha256: Option<String>,
) -> Result<()> {
    #[derive(Serialize)]
    struct RegisterRequest {
        model_identifier: String,
        location: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
    }

    let response = client
        .client
        .post(client.url("/api/v1/models"))
        .json(&RegisterRequest {
            model_identifier: model,
            location,
            sha256,
        })
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(failure(response, "Register").await);
    }

    let model: ModelResponse = response.json().await?;
    println!("Model '{}' registered", model.model_identifier);
    println!("  Location: {}", model.location);
    if let Some(sha256) = &model.sha256 {
        println!("  SHA-256: {}", sha256);
    }
    Ok(())
}

/// Deregister a model
pub async fn deregister(client: &ApiClient, model: &str) -> Result<()> {
    let response = client
        .client
        .delete(client.url(&format!("/api/v1/models/{}", model)))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(failure(response, "Deregister").await);
    }

    println!("Model '{}' deregistered", model);
    Ok(())
}

/// List registered models
pub async fn models(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/api/v1/models")).send().await?;

    if !response.status().is_success() {
        return Err(failure(response, "Listing models").await);
    }

    let models: Vec<ModelResponse> = response.json().await?;
    if models.is_empty() {
        println!("No models registered");
        return Ok(());
    }

    println!(
        "{:<30} {:<9} {:<20} {}",
        "MODEL", "RESIDENT", "REGISTERED", "LOCATION"
    );
    println!("{}", "-".repeat(100));
    for model in models {
        println!(
            "{:<30} {:<9} {:<20} {}",
            model.model_identifier,
            if model.resident { "yes" } else { "no" },
            model.registered_at.format("%Y-%m-%d %H:%M:%S"),
            model.location
        );
    }
    Ok(())
}

/// Run one prediction
pub async fn predict(client: &ApiClient, model: String, features: Vec<f64>) -> Result<()> {
    let request = PredictRequest {
        model_identifier: model.parse()?,
        features,
    };

    let response = client
        .client
        .post(client.url("/api/v1/invocations"))
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(failure(response, "Prediction").await);
    }

    let prediction: Prediction = response.json().await?;
    println!(
        "{} = {} ({})",
        prediction.model_identifier,
        prediction.prediction,
        if prediction.warm { "warm" } else { "cold" }
    );
    Ok(())
}

/// Show resident models
pub async fn cache(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/api/v1/cache")).send().await?;

    if !response.status().is_success() {
        return Err(failure(response, "Reading cache").await);
    }

    let cache: CacheResponse = response.json().await?;
    println!(
        "Resident: {}/{} ({})",
        cache.stats.resident,
        cache.stats.capacity,
        format_bytes(cache.stats.resident_bytes)
    );

    if !cache.entries.is_empty() {
        println!();
        println!(
            "{:<30} {:<14} {:>10} {:>6} {:>8} {:<20}",
            "MODEL", "KIND", "SIZE", "REFS", "HITS", "LAST ACCESS"
        );
        for entry in cache.entries {
            println!(
                "{:<30} {:<14} {:>10} {:>6} {:>8} {:<20}",
                entry.id,
                entry.kind,
                format_bytes(entry.footprint_bytes),
                entry.ref_count,
                entry.hits,
                entry.last_access.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}

/// Drop a model from the cache
pub async fn invalidate(client: &ApiClient, model: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct InvalidateResponse {
        invalidated: bool,
    }

    let response = client
        .client
        .delete(client.url(&format!("/api/v1/cache/{}", model)))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(failure(response, "Invalidate").await);
    }

    let result: InvalidateResponse = response.json().await?;
    if result.invalidated {
        println!("Model '{}' invalidated", model);
    } else {
        println!("Model '{}' was not resident", model);
    }
    Ok(())
}

/// Show system status
pub async fn top(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .get(client.url("/api/v1/status"))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(failure(response, "Reading status").await);
    }

    let status: StatusResponse = response.json().await?;
    let stats = status.cache;

    println!("mmhost v{}", status.version);
    println!();
    println!("Registered models: {}", status.registered_models);
    println!("Resident models: {}/{}", stats.resident, stats.capacity);
    match stats.memory_budget_bytes {
        Some(budget) => println!(
            "Memory: {} of {}",
            format_bytes(stats.resident_bytes),
            format_bytes(budget)
        ),
        None => println!("Memory: {}", format_bytes(stats.resident_bytes)),
    }
    println!(
        "Requests: {} hits, {} misses ({} coalesced)",
        stats.hits, stats.misses, stats.coalesced
    );
    println!(
        "Loads: {} started, {} failed, {} in flight",
        stats.loads, stats.load_failures, stats.in_flight_loads
    );
    println!(
        "Evictions: {}, invalidations: {}",
        stats.evictions, stats.invalidations
    );
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
