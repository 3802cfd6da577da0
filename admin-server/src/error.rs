use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::maintenance::MaintenanceError;
use crate::publish::PublishError;
use crate::store::StoreError;
use crate::uploads::UploadError;

/// Every failure a handler can return. Rendered as `{"error": message}`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),

    #[error("No file uploaded")]
    MissingFile,

    #[error("{0}")]
    BadRequest(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Store(StoreError::ItemNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::MissingFile | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let mut body = json!({ "error": self.to_string() });
        if let AppError::Publish(PublishError::ExternalServiceFailure { stderr, .. }) = &self {
            body["stderr"] = Value::String(stderr.clone());
        }

        (status, Json(body)).into_response()
    }
}
