use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifierError, Diagnosis};

pub const NO_IMAGE_MESSAGE: &str = "No image provided";

/// Body of a successful `POST /predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub label: String,
    /// Percentage with two decimals, e.g. `"97.53%"`
    pub confidence: String,
    /// Base64 JPEG, empty when the heatmap could not be produced
    pub heatmap_image: String,
}

impl From<Diagnosis> for PredictResponse {
    fn from(diagnosis: Diagnosis) -> Self {
        Self {
            confidence: diagnosis.prediction.confidence_percent(),
            label: diagnosis.prediction.label,
            heatmap_image: diagnosis.heatmap_image,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Failures a handler reports to the client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Failed to read upload: {}", .0.body_text())]
    Upload(MultipartError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upload(e) => e.status(),
            Self::Classifier(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}
