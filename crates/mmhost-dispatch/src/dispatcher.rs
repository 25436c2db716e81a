//! Prediction dispatch

use mmhost_cache::{ModelCache, ModelLease};
use mmhost_core::{BatchPrediction, HostError, HostResult, ModelId, Prediction};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Routes prediction requests to cached models
#[derive(Clone)]
pub struct Dispatcher {
    cache: ModelCache,
    request_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(cache: ModelCache, request_timeout: Option<Duration>) -> Self {
        Self {
            cache,
            request_timeout,
        }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Run one feature row against a model, loading it if needed
    pub async fn predict(&self, model_identifier: &str, features: &[f64]) -> HostResult<Prediction> {
        let id = ModelId::parse(model_identifier)?;
        let started = Instant::now();
        let lease = self.acquire(&id).await?;

        let prediction = lease.infer(features)?;
        debug!(
            model_id = %id,
            warm = lease.is_warm(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Prediction served"
        );

        Ok(Prediction {
            model_identifier: id,
            prediction,
            warm: lease.is_warm(),
        })
    }

    /// Run several rows against a single lease; fails on the first bad row
    pub async fn predict_batch(
        &self,
        model_identifier: &str,
        instances: &[Vec<f64>],
    ) -> HostResult<BatchPrediction> {
        let id = ModelId::parse(model_identifier)?;
        let lease = self.acquire(&id).await?;

        let predictions = instances
            .iter()
            .map(|row| lease.infer(row))
            .collect::<HostResult<Vec<f64>>>()?;
        debug!(model_id = %id, rows = predictions.len(), "Batch prediction served");

        Ok(BatchPrediction {
            model_identifier: id,
            predictions,
            warm: lease.is_warm(),
        })
    }

    /// Resolve a lease, bounded by the request timeout when one is set.
    ///
    /// A timeout only withdraws this caller; the load keeps going and fills
    /// the cache for whoever asks next.
    async fn acquire(&self, id: &ModelId) -> HostResult<ModelLease> {
        let result = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.cache.get_or_load(id))
                .await
                .map_err(|_| {
                    warn!(model_id = %id, waited = ?limit, "Gave up waiting for model");
                    HostError::Timeout {
                        id: id.clone(),
                        waited: limit,
                    }
                })?,
            None => self.cache.get_or_load(id).await,
        };
        result.map_err(|e| surface_error(id, e))
    }
}

/// Map cache and load failures onto caller-facing errors
pub fn surface_error(id: &ModelId, err: HostError) -> HostError {
    match err {
        HostError::CacheFull { .. } | HostError::ResourceExhausted { .. } => {
            HostError::Overloaded {
                id: id.clone(),
                message: err.to_string(),
            }
        }
        e if e.is_load_stage() => HostError::LoadFailed {
            id: id.clone(),
            source: Box::new(e),
        },
        e => e,
    }
}
