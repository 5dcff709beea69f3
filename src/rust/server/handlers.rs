use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::State;
use axum::Json;

use super::response::{ApiError, PredictResponse, NO_IMAGE_MESSAGE};
use super::state::AppState;

pub const IMAGE_FIELD: &str = "image";
pub const LIVENESS_MESSAGE: &str = "Rice leaf disease detection server is running";

/// `GET /`
pub async fn index() -> &'static str {
    LIVENESS_MESSAGE
}

/// Reads the bytes of the first uploaded file named `image`. Other fields, and plain
/// form values named `image`, are skipped.
async fn read_image_field(multipart: &mut Multipart) -> Result<Option<Vec<u8>>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(ApiError::Upload)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        if field.file_name().is_none() {
            log::debug!("Skipping '{}' form value without a file name", IMAGE_FIELD);
            continue;
        }
        let bytes = field.bytes().await.map_err(ApiError::Upload)?;
        return Ok(Some(bytes.to_vec()));
    }
    Ok(None)
}

/// `POST /predict`
pub async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    // A request that is not multipart has no image field either.
    let mut multipart = multipart.map_err(|e| {
        log::debug!("Rejected predict request: {}", e);
        ApiError::BadRequest(NO_IMAGE_MESSAGE.into())
    })?;
    let image = read_image_field(&mut multipart)
        .await?
        .ok_or_else(|| ApiError::BadRequest(NO_IMAGE_MESSAGE.into()))?;
    log::debug!("Received image of {} bytes", image.len());

    let predictor = state.models.get().await?;
    let diagnosis = tokio::task::spawn_blocking(move || predictor.diagnose(&image))
        .await
        .map_err(|e| ApiError::Internal(format!("Prediction task failed: {}", e)))??;

    log::info!(
        "Predicted '{}' with confidence {:.4} (heatmap: {})",
        diagnosis.prediction.label,
        diagnosis.prediction.confidence,
        if diagnosis.heatmap_image.is_empty() { "none" } else { "ok" }
    );
    Ok(Json(diagnosis.into()))
}
