use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use image::{Rgb, RgbImage};
use log::{error, info, warn};
use ort::session::Session;

use super::error::ClassifierError;
use super::head::ClassifierHead;
use super::inference::{resolve_io, ImageInference, ModelIo, PredictionKind, PreprocessConfig};
use super::model::Classifier;
use super::preprocess::{to_tensor, Normalization, TensorLayout};
use crate::gradcam::overlay::DEFAULT_ALPHA;
use crate::labels::default_labels;
use crate::runtime::{create_session_builder, RuntimeConfig};

/// Name of the last convolutional activation in Keras' EfficientNet family.
pub const DEFAULT_ACTIVATION_OUTPUT: &str = "top_activation";

/// A builder for constructing a Classifier with a fluent interface.
#[derive(Debug)]
pub struct ClassifierBuilder {
    model_path: Option<String>,
    head_path: Option<String>,
    session: Option<Session>,
    io: Option<ModelIo>,
    head: Option<ClassifierHead>,
    labels: Option<Vec<String>>,
    activation_output: Option<String>,
    predictions_output: Option<String>,
    prediction_kind: PredictionKind,
    preprocess: PreprocessConfig,
    heatmap_alpha: f32,
    runtime_config: RuntimeConfig,
}

impl Default for ClassifierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageInference for ClassifierBuilder {
    fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn model_io(&self) -> Option<&ModelIo> {
        self.io.as_ref()
    }

    fn preprocess_config(&self) -> &PreprocessConfig {
        &self.preprocess
    }
}

impl ClassifierBuilder {
    /// Creates a new empty ClassifierBuilder instance with default configuration
    ///
    /// # Example
    /// ```
    /// use rice_leaf::ClassifierBuilder;
    ///
    /// let builder = ClassifierBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self {
            model_path: None,
            head_path: None,
            session: None,
            io: None,
            head: None,
            labels: None,
            activation_output: Some(DEFAULT_ACTIVATION_OUTPUT.to_string()),
            predictions_output: None,
            prediction_kind: PredictionKind::default(),
            preprocess: PreprocessConfig::default(),
            heatmap_alpha: DEFAULT_ALPHA,
            runtime_config: RuntimeConfig::default(),
        }
    }

    /// Sets the runtime configuration for ONNX model execution
    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// Sets the size images are squashed to before inference
    pub fn with_input_size(mut self, width: u32, height: u32) -> Result<Self, ClassifierError> {
        if width == 0 || height == 0 {
            return Err(ClassifierError::ValidationError(format!(
                "Input size must be positive, got {}x{}", width, height
            )));
        }
        self.preprocess.input_width = width;
        self.preprocess.input_height = height;
        Ok(self)
    }

    /// Sets the tensor layout of the model input and activation
    pub fn with_layout(mut self, layout: TensorLayout) -> Self {
        self.preprocess.layout = layout;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.preprocess.normalization = normalization;
        self
    }

    pub fn with_prediction_kind(mut self, kind: PredictionKind) -> Self {
        self.prediction_kind = kind;
        self
    }

    /// Names the output holding the last convolutional activation. `None` disables Grad-CAM.
    pub fn with_activation_output(mut self, name: Option<&str>) -> Self {
        self.activation_output = name.map(str::to_string);
        self
    }

    /// Names the output holding class scores. By default the first output that is not the
    /// activation is used.
    pub fn with_predictions_output(mut self, name: &str) -> Self {
        self.predictions_output = Some(name.to_string());
        self
    }

    /// Sets the heatmap weight in the overlay blend
    pub fn with_heatmap_alpha(mut self, alpha: f32) -> Result<Self, ClassifierError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ClassifierError::ValidationError(format!(
                "Heatmap alpha must be within [0, 1], got {}", alpha
            )));
        }
        self.heatmap_alpha = alpha;
        Ok(self)
    }

    /// Replaces the built-in disease labels. Labels must be non-empty and unique, in the
    /// order of the model's output.
    pub fn with_labels(mut self, labels: Vec<impl Into<String>>) -> Result<Self, ClassifierError> {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        Self::validate_labels(&labels)?;
        self.labels = Some(labels);
        Ok(self)
    }

    /// Uses classifier head weights that are already in memory
    pub fn with_head(mut self, head: ClassifierHead) -> Self {
        self.head = Some(head);
        self
    }

    /// Loads the classifier head weights from a JSON file
    ///
    /// # Returns
    /// * `Result<Self, ClassifierError>` - The builder instance if successful, or an error if:
    ///   - The path is empty
    ///   - The file does not exist or cannot be parsed
    pub fn with_head_file(mut self, head_path: &str) -> Result<Self, ClassifierError> {
        if head_path.is_empty() {
            return Err(ClassifierError::BuildError("Classifier head path cannot be empty".to_string()));
        }
        if !Path::new(head_path).exists() {
            return Err(ClassifierError::BuildError(format!("Classifier head file not found: {}", head_path)));
        }
        let head = ClassifierHead::from_file(head_path)?;
        info!(
            "Classifier head loaded: {} channels, {} classes",
            head.channels(), head.num_classes()
        );
        self.head = Some(head);
        self.head_path = Some(head_path.to_string());
        Ok(self)
    }

    /// Loads the ONNX model the classifier runs
    ///
    /// # Returns
    /// * `Result<Self, ClassifierError>` - The builder instance if successful, or an error if:
    ///   - The model path is empty
    ///   - A model is already set
    ///   - The file doesn't exist
    ///   - ONNX Runtime fails to load the model
    pub fn with_model_file(mut self, model_path: &str) -> Result<Self, ClassifierError> {
        if model_path.is_empty() {
            return Err(ClassifierError::BuildError("Model path cannot be empty".to_string()));
        }
        if self.model_path.is_some() {
            return Err(ClassifierError::BuildError("Model path already set".to_string()));
        }
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::BuildError(format!("Model file not found: {}", model_path)));
        }

        // Create session using the singleton environment
        let session = create_session_builder(&self.runtime_config)?
            .commit_from_file(model_path)
            .map_err(|e| {
                error!("Failed to load model {}: {}", model_path, e);
                ClassifierError::BuildError(format!("Failed to load model: {}", e))
            })?;
        info!("Model loaded from {}", model_path);

        self.session = Some(session);
        self.model_path = Some(model_path.to_string());
        Ok(self)
    }

    fn validate_labels(labels: &[String]) -> Result<(), ClassifierError> {
        const MAX_LABELS: usize = 1000;

        if labels.is_empty() {
            return Err(ClassifierError::ValidationError("At least one label is required".into()));
        }
        if labels.len() > MAX_LABELS {
            return Err(ClassifierError::ValidationError(
                format!("Maximum number of labels ({}) exceeded", MAX_LABELS)
            ));
        }
        if let Some(pos) = labels.iter().position(|l| l.trim().is_empty()) {
            return Err(ClassifierError::ValidationError(format!("Label {} cannot be empty", pos + 1)));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = labels.iter().find(|l| !seen.insert(l.as_str())) {
            return Err(ClassifierError::ValidationError(format!("Duplicate label '{}'", dup)));
        }
        Ok(())
    }

    /// Builds and returns the final Classifier instance
    ///
    /// The model is probed with a blank image to check that its outputs agree with
    /// the labels and the classifier head.
    ///
    /// # Returns
    /// * `Result<Classifier, ClassifierError>` - The constructed Classifier if successful, or an error if:
    ///   - No model is set
    ///   - The model has no usable input or predictions output
    ///   - The number of class scores differs from the number of labels
    ///   - The classifier head does not match the labels
    pub fn build(mut self) -> Result<Classifier, ClassifierError> {
        let model_path = self.model_path.take()
            .ok_or_else(|| ClassifierError::BuildError("Model path must be set".to_string()))?;
        let labels = self.labels.take().unwrap_or_else(default_labels);

        let io = {
            let session = self.session.as_ref()
                .ok_or_else(|| ClassifierError::BuildError("No ONNX model loaded".into()))?;
            resolve_io(
                session,
                self.activation_output.as_deref(),
                self.predictions_output.as_deref(),
            )?
        };
        info!(
            "Model input '{}', predictions '{}', activation {:?}",
            io.input_name, io.predictions_output, io.activation_output
        );
        self.io = Some(io.clone());

        if let Some(head) = &self.head {
            if head.num_classes() != labels.len() {
                return Err(ClassifierError::BuildError(format!(
                    "Classifier head has {} classes but {} labels are configured",
                    head.num_classes(), labels.len()
                )));
            }
        }

        let probe = RgbImage::from_pixel(self.preprocess.input_width, self.preprocess.input_height, Rgb([0, 0, 0]));
        let tensor = to_tensor(&probe, self.preprocess.layout, self.preprocess.normalization);
        let outputs = self.run_model(tensor, io.activation_output.is_some())?;
        if outputs.predictions.len() != labels.len() {
            return Err(ClassifierError::BuildError(format!(
                "Model predicts {} classes but {} labels are configured",
                outputs.predictions.len(), labels.len()
            )));
        }
        info!("Model structure validated successfully ({} classes)", labels.len());

        let head = match (self.head.take(), &outputs.activation) {
            (Some(head), Some(activation)) => {
                let channel_axis = match self.preprocess.layout {
                    TensorLayout::Nhwc => activation.ndim().saturating_sub(1),
                    TensorLayout::Nchw => 1,
                };
                let channels = activation.shape().get(channel_axis).copied().unwrap_or(0);
                if activation.ndim() != 4 || channels != head.channels() {
                    return Err(ClassifierError::BuildError(format!(
                        "Activation shape {:?} does not match a classifier head with {} channels",
                        activation.shape(), head.channels()
                    )));
                }
                Some(head)
            }
            (Some(_), None) => {
                warn!("Classifier head loaded but the model exposes no activation, Grad-CAM is disabled");
                None
            }
            (None, _) => {
                warn!("No classifier head loaded, Grad-CAM is disabled");
                None
            }
        };

        let session = Arc::new(self.session.take()
            .ok_or_else(|| ClassifierError::BuildError("No ONNX model loaded".into()))?);

        Ok(Classifier {
            model_path,
            head_path: self.head_path.take(),
            session,
            io,
            labels: Arc::new(labels),
            head: head.map(Arc::new),
            prediction_kind: self.prediction_kind,
            preprocess: self.preprocess,
            heatmap_alpha: self.heatmap_alpha,
        })
    }
}
