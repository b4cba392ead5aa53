//! Mapping of relay errors onto HTTP responses

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use mediarelay_core::{RangeError, StreamError};
use serde_json::json;

/// Errors a request handler can fail with before any body is sent.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("invalid {name} header")]
    InvalidHeader { name: &'static str },

    #[error("failed to build response: {0}")]
    Response(#[from] axum::http::Error),
}

impl From<RangeError> for ApiError {
    fn from(error: RangeError) -> Self {
        ApiError::Stream(StreamError::InvalidRange(error))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Stream(error) => match error {
                StreamError::NotFound { .. } => StatusCode::NOT_FOUND,
                StreamError::MetadataLookup { .. } => StatusCode::BAD_GATEWAY,
                StreamError::InvalidRange(RangeError::Malformed { .. }) => StatusCode::BAD_REQUEST,
                StreamError::InvalidRange(RangeError::Unsatisfiable { .. }) => {
                    StatusCode::RANGE_NOT_SATISFIABLE
                }
                StreamError::UnknownWorker { .. } | StreamError::Cancelled => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            ApiError::InvalidHeader { .. } => StatusCode::BAD_REQUEST,
            ApiError::Response(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected with {}: {}", status, self);
        }

        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();

        if let ApiError::Stream(StreamError::InvalidRange(RangeError::Unsatisfiable { file_size })) =
            &self
        {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{file_size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }

        response
    }
}
