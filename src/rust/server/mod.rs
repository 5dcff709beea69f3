//! HTTP surface: `GET /` for liveness and `POST /predict` for diagnoses.

pub mod handlers;
pub mod response;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use ort::session::builder::GraphOptimizationLevel;
use tower_http::cors::CorsLayer;

use crate::classifier::{Classifier, ClassifierError};
use crate::config::{LoadStrategy, ServerConfig};
use crate::runtime::RuntimeConfig;

pub use response::{ApiError, ErrorResponse, PredictResponse};
pub use state::{AppState, DiseasePredictor, ModelSlot, SharedPredictor};

/// Builds the application router around a model slot.
pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/predict", post(handlers::predict))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Loads and validates the classifier described by the configuration.
pub fn load_classifier(
    config: &ServerConfig,
    model_path: &Path,
    head_path: Option<&Path>,
) -> Result<Classifier, ClassifierError> {
    let runtime = RuntimeConfig {
        inter_threads: config.inter_threads,
        intra_threads: config.intra_threads,
        optimization_level: GraphOptimizationLevel::Level3,
    };

    let mut builder = Classifier::builder()
        .with_runtime_config(runtime)
        .with_input_size(config.input_size, config.input_size)?
        .with_layout(config.layout)
        .with_normalization(config.normalization)
        .with_prediction_kind(config.output_kind)
        .with_activation_output(Some(config.activation_output.as_str()).filter(|s| !s.is_empty()))
        .with_heatmap_alpha(config.heatmap_alpha)?;
    if let Some(name) = &config.predictions_output {
        builder = builder.with_predictions_output(name);
    }
    if let Some(head) = head_path {
        builder = builder.with_head_file(&head.to_string_lossy())?;
    }

    builder.with_model_file(&model_path.to_string_lossy())?.build()
}

/// Creates the model slot for the configured load strategy. In eager mode the model is
/// loaded before this returns; a failure is logged and left for requests to retry.
pub async fn model_slot(config: &ServerConfig, model_path: &Path, head_path: Option<&Path>) -> ModelSlot {
    let strategy = config.load_strategy;
    let config = config.clone();
    let model_path = model_path.to_path_buf();
    let head_path = head_path.map(Path::to_path_buf);
    let slot = ModelSlot::new(move || {
        log::info!("Loading model from {:?}", model_path);
        let classifier = load_classifier(&config, &model_path, head_path.as_deref())?;
        log::info!("Classifier ready: {:?}", classifier.info());
        Ok(Arc::new(classifier) as SharedPredictor)
    });

    match strategy {
        LoadStrategy::Eager => {
            if let Err(e) = slot.get().await {
                log::error!("Failed to load model: {}", e);
            }
        }
        LoadStrategy::Lazy => log::info!("Model will be loaded on the first request"),
    }
    slot
}

/// Serves the router until Ctrl-C.
pub async fn serve(config: &ServerConfig, state: AppState) -> std::io::Result<()> {
    let addr = config
        .socket_addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state, config.body_limit))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_load_classifier_missing_model() {
        let config = ServerConfig::parse_from(["rice-leaf-server"]);
        let result = load_classifier(&config, Path::new("/nonexistent/zambali.onnx"), None);
        assert!(matches!(result, Err(ClassifierError::BuildError(_))));
    }

    #[test]
    fn test_load_classifier_rejects_bad_alpha() {
        let config = ServerConfig::parse_from(["rice-leaf-server", "--heatmap-alpha", "2.0"]);
        let result = load_classifier(&config, Path::new("/nonexistent/zambali.onnx"), None);
        assert!(matches!(result, Err(ClassifierError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_eager_slot_survives_missing_model() {
        let config = ServerConfig::parse_from(["rice-leaf-server"]);
        let slot = model_slot(&config, Path::new("/nonexistent/zambali.onnx"), None).await;
        assert!(!slot.is_loaded());
        assert!(slot.get().await.is_err());
    }
}
