//! Mapping of host errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use mmhost_core::{ErrorBody, HostError};
use tracing::warn;

/// A `HostError` rendered as a structured JSON body
#[derive(Debug)]
pub struct ApiError(pub HostError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            HostError::InvalidModelId { .. }
            | HostError::InvalidLocation(_)
            | HostError::Inference { .. } => StatusCode::BAD_REQUEST,
            HostError::UnknownModel(_) => StatusCode::NOT_FOUND,
            HostError::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            HostError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            HostError::LoadFailed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<HostError> for ApiError {
    fn from(err: HostError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ErrorBody::from(&self.0);
        if let HostError::InvalidModelId { id, .. } = &self.0 {
            body.model_identifier = Some(id.clone());
        }
        if status.is_server_error() {
            warn!(status = status.as_u16(), kind = %body.error_kind, error = %self.0, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmhost_core::ModelId;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        let id = ModelId::parse("Austin_TX").unwrap();
        let cases = [
            (
                HostError::InvalidModelId {
                    id: "/x".to_string(),
                    reason: "leading slash".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (HostError::UnknownModel(id.clone()), StatusCode::NOT_FOUND),
            (
                HostError::Overloaded {
                    id: id.clone(),
                    message: "full".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                HostError::Timeout {
                    id: id.clone(),
                    waited: Duration::from_secs(1),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                HostError::LoadFailed {
                    id: id.clone(),
                    source: Box::new(HostError::NotFound {
                        id: id.clone(),
                        message: "gone".to_string(),
                    }),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                HostError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }
}
