use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::levels::QueryError;
use crate::store::StoreError;
use crate::web::query::InputError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    BadRequest(#[from] InputError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Query(QueryError::Store(StoreError::Unavailable(_))) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Query(QueryError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Query(QueryError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Query failed: {}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}
