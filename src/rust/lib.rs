//! Rice leaf disease detection served over HTTP, with Grad-CAM heatmaps.
//!
//! An ONNX export of the disease classifier is run with ONNX Runtime. Each uploaded
//! image is squashed to the model's input size, classified into one of seven
//! labels, and the class activation map of the predicted class is blended over the
//! image and returned as a base64 JPEG.
//!
//! # Basic Usage
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use rice_leaf::Classifier;
//!
//! let classifier = Classifier::builder()
//!     .with_model_file("zambali_rice_efficientnet.onnx")?
//!     .with_head_file("head.json")?
//!     .build()?;
//!
//! let diagnosis = classifier.diagnose(&std::fs::read("leaf.jpg")?)?;
//! println!("{}: {}", diagnosis.prediction.label, diagnosis.prediction.confidence_percent());
//! # Ok(())
//! # }
//! ```
//!
//! # Serving
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use clap::Parser;
//! use rice_leaf::{server, AppState, ServerConfig};
//!
//! let config = ServerConfig::parse();
//! let slot = server::model_slot(&config, &config.model, config.head.as_deref()).await;
//! server::serve(&config, AppState::new(slot)).await?;
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod gradcam;
pub mod labels;
pub mod model_manager;
mod runtime;
pub mod server;

pub use classifier::{
    Classifier, ClassifierBuilder, ClassifierError, ClassifierHead, ClassifierInfo, Diagnosis,
    Normalization, Prediction, PredictionKind, TensorLayout,
};
pub use config::{LoadStrategy, ServerConfig};
pub use labels::LABELS;
pub use model_manager::{ModelError, ModelInfo, ModelManager};
pub use runtime::{create_session_builder, RuntimeConfig};
pub use server::{AppState, DiseasePredictor, ModelSlot};
