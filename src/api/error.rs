use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::StoryError;

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl StoryError {
    pub fn status(&self) -> StatusCode {
        match self {
            StoryError::Validation(_) => StatusCode::BAD_REQUEST,
            StoryError::NotFound(_) => StatusCode::NOT_FOUND,
            StoryError::Forbidden { .. } => StatusCode::FORBIDDEN,
            StoryError::Network(_) => StatusCode::BAD_GATEWAY,
            StoryError::InvalidTransition(_) | StoryError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for StoryError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
