mod error;
mod inference;
mod model;
pub mod builder;
pub mod head;
pub mod preprocess;
mod utils;

pub use error::ClassifierError;
pub use head::ClassifierHead;
pub use inference::{ModelIo, PredictionKind, PreprocessConfig};
pub use model::Classifier;
pub use builder::ClassifierBuilder;
pub use preprocess::{Normalization, TensorLayout};

/// Information about the current state and configuration of a classifier
#[derive(Debug, Clone)]
pub struct ClassifierInfo {
    /// Path to the ONNX model file
    pub model_path: String,
    /// Path to the classifier head weights, if loaded from a file
    pub head_path: Option<String>,
    /// Number of classes the model predicts
    pub num_classes: usize,
    /// Labels of the classes, in model output order
    pub class_labels: Vec<String>,
    /// Width and height images are squashed to
    pub input_size: (u32, u32),
    /// Name of the tensor holding class scores
    pub predictions_output: String,
    /// Whether heatmaps can be produced
    pub gradcam_enabled: bool,
}

/// The predicted class of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub class_index: usize,
    /// Probability of the predicted class, in `[0, 1]`
    pub confidence: f32,
    /// Probability of every class, in label order
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Confidence as a percentage with two decimals, e.g. `"97.53%"`.
    pub fn confidence_percent(&self) -> String {
        format!("{:.2}%", self.confidence as f64 * 100.0)
    }
}

/// A prediction plus the Grad-CAM overlay for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub prediction: Prediction,
    /// Base64 JPEG of the heatmap blended over the input, empty when it could not be produced
    pub heatmap_image: String,
}
