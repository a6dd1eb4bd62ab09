use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::store::StoreError;
use crate::plan::PlanError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("plan {0} not found")]
    NotFound(String),

    #[error("plan {0} already exists")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl From<PlanError> for AppError {
    fn from(e: PlanError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(code) => AppError::Conflict(code),
            StoreError::Backend(message) => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            AppError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            AppError::NotFound(_) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            AppError::Conflict(code) => (
                StatusCode::CONFLICT,
                Json(json!({ "ok": false, "error": message, "code": code })),
            )
                .into_response(),
            AppError::Internal(_) => {
                error!(%message, "plan store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": message })),
                )
                    .into_response()
            }
        }
    }
}
