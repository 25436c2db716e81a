//! REST API handlers

use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use mmhost_cache::{CacheStats, EntrySnapshot};
use mmhost_core::{
    ApiConfig, ArtifactLocation, BatchPrediction, HostError, InventoryRecord, ModelId, Prediction,
};
use mmhost_dispatch::Dispatcher;
use mmhost_store::Inventory;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

/// Application state shared across handlers
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub inventory: Arc<Inventory>,
}

/// Create the API router
pub fn create_router(dispatcher: Dispatcher, inventory: Arc<Inventory>) -> Router {
    let state = Arc::new(AppState {
        dispatcher,
        inventory,
    });

    Router::new()
        .route("/api/v1/invocations", post(invoke))
        .route("/api/v1/invocations/batch", post(invoke_batch))
        .route("/api/v1/models", get(list_models).post(register_model))
        .route("/api/v1/models/*id", get(get_model).delete(deregister_model))
        .route("/api/v1/cache", get(get_cache))
        .route("/api/v1/cache/*id", axum::routing::delete(invalidate_model))
        .route("/api/v1/status", get(get_status))
        .with_state(state)
}

/// Wrap the router with request tracing and, if enabled, CORS
pub fn apply_layers(router: Router, config: &ApiConfig) -> Router {
    let router = if config.cors_enabled {
        let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        let wildcard = config.cors_origins.iter().any(|origin| origin == "*");
        let cors = if wildcard || config.cors_origins.is_empty() {
            cors.allow_origin(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|origin| match origin.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(origin = %origin, "Ignoring malformed CORS origin");
                        None
                    }
                })
                .collect();
            cors.allow_origin(origins)
        };
        router.layer(cors)
    } else {
        router
    };
    router.layer(TraceLayer::new_for_http())
}

/// Prediction request as it arrives on the wire; the identifier is validated
/// by the dispatcher so a bad one yields a structured error
#[derive(Debug, Deserialize)]
pub struct InvocationRequest {
    pub model_identifier: String,
    pub features: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct BatchInvocationRequest {
    pub model_identifier: String,
    pub instances: Vec<Vec<f64>>,
}

/// Run a single prediction
async fn invoke(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InvocationRequest>,
) -> ApiResult<Json<Prediction>> {
    let prediction = state
        .dispatcher
        .predict(&req.model_identifier, &req.features)
        .await?;
    Ok(Json(prediction))
}

/// Run several rows against one model
async fn invoke_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchInvocationRequest>,
) -> ApiResult<Json<BatchPrediction>> {
    let batch = state
        .dispatcher
        .predict_batch(&req.model_identifier, &req.instances)
        .await?;
    Ok(Json(batch))
}

/// Request to register an artifact
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Identifier to register under
    pub model_identifier: String,
    /// `file://`, absolute path or `http(s)://` location
    pub location: String,
    /// Expected SHA-256 of the artifact bytes
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Response for a registered model
#[derive(Debug, Serialize)]
pub struct ModelResponse {
    pub model_identifier: ModelId,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub registered_at: DateTime<Utc>,
    /// Whether the model is currently loaded
    pub resident: bool,
}

impl ModelResponse {
    fn new(record: InventoryRecord, resident: bool) -> Self {
        Self {
            model_identifier: record.id,
            location: record.location.to_string(),
            sha256: record.sha256,
            registered_at: record.registered_at,
            resident,
        }
    }
}

/// List registered models
async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelResponse>> {
    let cache = state.dispatcher.cache();
    let records = state.inventory.records().await;
    Json(
        records
            .into_iter()
            .map(|record| {
                let resident = cache.contains(&record.id);
                ModelResponse::new(record, resident)
            })
            .collect(),
    )
}

/// Register (or re-point) a model
async fn register_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<ModelResponse>)> {
    let id = ModelId::parse(req.model_identifier)?;
    let location = ArtifactLocation::parse(&req.location)?;

    let mut record = InventoryRecord::new(id, location);
    if let Some(sha256) = req.sha256 {
        record = record.with_sha256(sha256);
    }

    info!(model_id = %record.id, location = %record.location, "Registering model");
    let previous = state.inventory.register(record.clone()).await?;
    let status = if previous.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    let resident = state.dispatcher.cache().contains(&record.id);
    Ok((status, Json(ModelResponse::new(record, resident))))
}

/// Get a registered model
async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ModelResponse>> {
    let id = ModelId::parse(id)?;
    let record = state
        .inventory
        .lookup(&id)
        .await
        .ok_or_else(|| HostError::UnknownModel(id.clone()))?;

    let resident = state.dispatcher.cache().contains(&id);
    Ok(Json(ModelResponse::new(record, resident)))
}

/// Remove a model from the inventory; a resident copy stays cached
async fn deregister_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = ModelId::parse(id)?;
    info!(model_id = %id, "Deregistering model");

    match state.inventory.deregister(&id).await? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(HostError::UnknownModel(id).into()),
    }
}

/// Cache snapshot response
#[derive(Debug, Serialize)]
pub struct CacheResponse {
    pub stats: CacheStats,
    pub entries: Vec<EntrySnapshot>,
}

/// Inspect the cache
async fn get_cache(State(state): State<Arc<AppState>>) -> Json<CacheResponse> {
    let cache = state.dispatcher.cache();
    Json(CacheResponse {
        stats: cache.stats(),
        entries: cache.entries(),
    })
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub model_identifier: ModelId,
    /// False when the model was not resident
    pub invalidated: bool,
}

/// Drop a model from the cache so the next request reloads it
async fn invalidate_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<InvalidateResponse>> {
    let id = ModelId::parse(id)?;
    let invalidated = state.dispatcher.cache().invalidate(&id);
    info!(model_id = %id, invalidated = invalidated, "Cache invalidation requested");

    Ok(Json(InvalidateResponse {
        model_identifier: id,
        invalidated,
    }))
}

/// System status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub registered_models: usize,
    pub cache: CacheStats,
}

/// Get system status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        registered_models: state.inventory.len().await,
        cache: state.dispatcher.cache().stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use mmhost_cache::{CacheSettings, LoadBackend, ModelCache};
    use mmhost_runtime::JsonModelLoader;
    use mmhost_store::{LocationStore, RetryPolicy, StagingArea};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        artifacts: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    async fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        let staging = StagingArea::new(dir.path().join("staging"));
        tokio::fs::create_dir_all(&artifacts).await.unwrap();
        staging.init().await.unwrap();

        tokio::fs::write(
            artifacts.join("Denver_CO.json"),
            r#"{"kind": "linear", "coefficients": [0.5, 0.25], "intercept": 10.0}"#,
        )
        .await
        .unwrap();

        let inventory = Arc::new(Inventory::new());
        let backend = LoadBackend {
            inventory: inventory.clone(),
            store: Arc::new(LocationStore::new()),
            loader: Arc::new(JsonModelLoader::new()),
            staging,
            retry: RetryPolicy::default(),
        };
        let cache = ModelCache::new(CacheSettings::default(), backend);
        let router = create_router(Dispatcher::new(cache, None), inventory);

        TestApp {
            router,
            artifacts,
            _dir: dir,
        }
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register_denver(app: &TestApp) -> (StatusCode, Value) {
        let location = app.artifacts.join("Denver_CO.json");
        send(
            &app.router,
            Method::POST,
            "/api/v1/models",
            Some(json!({
                "model_identifier": "Denver_CO",
                "location": location.to_string_lossy(),
            })),
        )
        .await
    }

    #[tokio::test]
    async fn test_register_then_invoke() {
        let app = test_app().await;

        let (status, body) = register_denver(&app).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["model_identifier"], "Denver_CO");
        assert_eq!(body["resident"], false);

        let request = json!({"model_identifier": "Denver_CO", "features": [4.0, 8.0]});
        let (status, body) = send(&app.router, Method::POST, "/api/v1/invocations", Some(request.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["prediction"], 14.0);
        assert_eq!(body["warm"], false);

        let (_, body) = send(&app.router, Method::POST, "/api/v1/invocations", Some(request)).await;
        assert_eq!(body["warm"], true);

        let (status, body) = send(&app.router, Method::GET, "/api/v1/models/Denver_CO", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resident"], true);
    }

    #[tokio::test]
    async fn test_batch_invocation() {
        let app = test_app().await;
        register_denver(&app).await;

        let request = json!({"model_identifier": "Denver_CO", "instances": [[0.0, 0.0], [2.0, 4.0]]});
        let (status, body) = send(&app.router, Method::POST, "/api/v1/invocations/batch", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["predictions"], json!([10.0, 12.0]));
    }

    #[tokio::test]
    async fn test_error_bodies() {
        let app = test_app().await;
        register_denver(&app).await;

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/v1/invocations",
            Some(json!({"model_identifier": "Nowhere_XX", "features": [1.0]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_kind"], "UnknownModel");
        assert_eq!(body["model_identifier"], "Nowhere_XX");

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/v1/invocations",
            Some(json!({"model_identifier": "a/../b", "features": [1.0]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_kind"], "InvalidModelId");
        assert_eq!(body["model_identifier"], "a/../b");

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/v1/invocations",
            Some(json!({"model_identifier": "Denver_CO", "features": [1.0]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_kind"], "InferenceError");
    }

    #[tokio::test]
    async fn test_missing_artifact_is_bad_gateway() {
        let app = test_app().await;
        send(
            &app.router,
            Method::POST,
            "/api/v1/models",
            Some(json!({
                "model_identifier": "Ghost_NV",
                "location": app.artifacts.join("Ghost_NV.json").to_string_lossy(),
            })),
        )
        .await;

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/v1/invocations",
            Some(json!({"model_identifier": "Ghost_NV", "features": [1.0]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error_kind"], "LoadFailed");
    }

    #[tokio::test]
    async fn test_cache_invalidation_and_status() {
        let app = test_app().await;
        register_denver(&app).await;
        send(
            &app.router,
            Method::POST,
            "/api/v1/invocations",
            Some(json!({"model_identifier": "Denver_CO", "features": [0.0, 0.0]})),
        )
        .await;

        let (status, body) = send(&app.router, Method::GET, "/api/v1/cache", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["resident"], 1);
        assert_eq!(body["entries"][0]["id"], "Denver_CO");

        let (_, body) = send(&app.router, Method::DELETE, "/api/v1/cache/Denver_CO", None).await;
        assert_eq!(body["invalidated"], true);
        let (_, body) = send(&app.router, Method::DELETE, "/api/v1/cache/Denver_CO", None).await;
        assert_eq!(body["invalidated"], false);

        let (status, body) = send(&app.router, Method::GET, "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["registered_models"], 1);
        assert_eq!(body["cache"]["resident"], 0);
        assert_eq!(body["cache"]["invalidations"], 1);
    }

    #[tokio::test]
    async fn test_deregister_keeps_resident_copy() {
        let app = test_app().await;
        register_denver(&app).await;
        let invoke = json!({"model_identifier": "Denver_CO", "features": [0.0, 0.0]});
        send(&app.router, Method::POST, "/api/v1/invocations", Some(invoke.clone())).await;

        let (status, _) = send(&app.router, Method::DELETE, "/api/v1/models/Denver_CO", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app.router, Method::DELETE, "/api/v1/models/Denver_CO", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app.router, Method::POST, "/api/v1/invocations", Some(invoke)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["warm"], true);

        let (_, body) = send(&app.router, Method::GET, "/api/v1/models", None).await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_nested_identifier_routes() {
        let app = test_app().await;
        let location = app.artifacts.join("Denver_CO.json");
        let (status, _) = send(
            &app.router,
            Method::POST,
            "/api/v1/models",
            Some(json!({
                "model_identifier": "housing/denver:v2",
                "location": location.to_string_lossy(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app.router, Method::GET, "/api/v1/models/housing/denver:v2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model_identifier"], "housing/denver:v2");
    }

    #[tokio::test]
    async fn test_apply_layers() {
        let app = test_app().await;
        let config = ApiConfig {
            cors_enabled: true,
            cors_origins: vec!["http://localhost:3000".to_string()],
            ..Default::default()
        };
        let router = apply_layers(app.router.clone(), &config);
        let (status, _) = send(&router, Method::GET, "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
