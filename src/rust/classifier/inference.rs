use std::collections::HashMap;

use image::RgbImage;
use ndarray::{Array1, Array4, ArrayD};
use ort::session::Session;
use ort::value::Tensor;

use super::error::ClassifierError;
use super::preprocess::{decode_rgb, squash, to_tensor, Normalization, TensorLayout};

/// What the predictions output of the model holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PredictionKind {
    /// Softmax probabilities, as exported from a Keras model with a softmax head
    #[default]
    Probabilities,
    /// Raw class scores; softmax is applied after inference
    Logits,
}

/// Names of the tensors the server exchanges with the ONNX session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIo {
    pub input_name: String,
    /// Last convolutional activation, only needed for Grad-CAM
    pub activation_output: Option<String>,
    pub predictions_output: String,
}

/// Input geometry and scaling of the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub layout: TensorLayout,
    pub normalization: Normalization,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            input_width: 224,
            input_height: 224,
            layout: TensorLayout::Nhwc,
            normalization: Normalization::Raw,
        }
    }
}

/// A decoded upload: the squashed RGB image Grad-CAM draws on and the tensor fed to the model.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub image: RgbImage,
    pub tensor: Array4<f32>,
}

/// Everything one forward pass returns.
#[derive(Debug, Clone)]
pub struct RawOutputs {
    pub activation: Option<ArrayD<f32>>,
    /// Flattened scores of the single image in the batch
    pub predictions: Array1<f32>,
}

/// Runs images through an ONNX image classifier.
///
/// The ONNX model is expected to:
/// - Accept one float input of shape `[1, H, W, 3]` (NHWC) or `[1, 3, H, W]` (NCHW)
/// - Output class scores of shape `[1, classes]`
/// - Optionally expose the last convolutional activation as a second output
pub(crate) trait ImageInference {
    /// Returns the initialized ONNX session if available
    fn session(&self) -> Option<&Session>;

    /// Returns the tensor names resolved for the session if available
    fn model_io(&self) -> Option<&ModelIo>;

    fn preprocess_config(&self) -> &PreprocessConfig;

    /// Decodes, squashes and converts an uploaded image.
    ///
    /// # Errors
    /// - `ImageError` if the bytes are not a decodable image
    fn prepare(&self, bytes: &[u8]) -> Result<PreparedImage, ClassifierError> {
        let config = self.preprocess_config();
        let decoded = decode_rgb(bytes)?;
        let image = squash(&decoded, config.input_width, config.input_height);
        let tensor = to_tensor(&image, config.layout, config.normalization);
        Ok(PreparedImage { image, tensor })
    }

    /// Runs a forward pass over a prepared batch of one.
    ///
    /// # Errors
    /// - `ModelError` if the session is not initialized
    /// - `ModelError` if tensor creation, model execution or predictions extraction fails
    /// - `PredictionError` if the predictions output is not a batch of one
    ///
    /// An unreadable activation is logged and leaves `activation` empty.
    fn run_model(&self, tensor: Array4<f32>, with_activation: bool) -> Result<RawOutputs, ClassifierError> {
        let session = self.session()
            .ok_or_else(|| ClassifierError::ModelError("Session not initialized".into()))?;
        let io = self.model_io()
            .ok_or_else(|| ClassifierError::ModelError("Model inputs and outputs not resolved".into()))?;

        let mut input_tensors = HashMap::new();
        input_tensors.insert(io.input_name.as_str(), Tensor::from_array(tensor)
            .map_err(|e| ClassifierError::ModelError(format!("Failed to create input tensor: {}", e)))?);

        let outputs = session.run(input_tensors)
            .map_err(|e| ClassifierError::ModelError(format!("Failed to run model: {}", e)))?;

        let scores = outputs[io.predictions_output.as_str()].try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::ModelError(format!("Failed to extract predictions: {}", e)))?;
        let shape = scores.shape().to_vec();
        if shape.len() > 1 && shape[0] != 1 {
            return Err(ClassifierError::PredictionError(format!(
                "Expected predictions for a single image, got shape {:?}", shape
            )));
        }
        let predictions: Array1<f32> = scores.iter().cloned().collect();
        if predictions.is_empty() {
            return Err(ClassifierError::PredictionError("Model returned no class scores".into()));
        }

        let activation = match (&io.activation_output, with_activation) {
            // Only the heatmap needs the activation; the prediction stands without it.
            (Some(name), true) => match outputs[name.as_str()].try_extract_tensor::<f32>() {
                Ok(tensor) => Some(tensor.to_owned()),
                Err(e) => {
                    log::warn!("Failed to extract activation '{}': {}", name, e);
                    None
                }
            },
            _ => None,
        };

        Ok(RawOutputs { activation, predictions })
    }
}

/// Picks the input and output names out of the session metadata.
pub(crate) fn resolve_io(
    session: &Session,
    activation_output: Option<&str>,
    predictions_output: Option<&str>,
) -> Result<ModelIo, ClassifierError> {
    let input_name = session.inputs.first()
        .map(|input| input.name.clone())
        .ok_or_else(|| ClassifierError::ModelError("Model must have at least 1 input for the image".into()))?;

    let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
    select_outputs(input_name, &output_names, activation_output, predictions_output)
}

fn select_outputs(
    input_name: String,
    outputs: &[&str],
    activation_output: Option<&str>,
    predictions_output: Option<&str>,
) -> Result<ModelIo, ClassifierError> {
    if outputs.is_empty() {
        return Err(ClassifierError::ModelError("Model must have at least 1 output for predictions".into()));
    }

    let activation_output = match activation_output {
        Some(name) if outputs.contains(&name) => Some(name.to_string()),
        Some(name) => {
            log::warn!(
                "Model has no output named '{}' (outputs: {:?}), Grad-CAM is disabled",
                name, outputs
            );
            None
        }
        None => None,
    };

    let predictions_output = match predictions_output {
        Some(name) if outputs.contains(&name) => name.to_string(),
        Some(name) => {
            return Err(ClassifierError::ModelError(format!(
                "Model has no output named '{}' (outputs: {:?})", name, outputs
            )));
        }
        None => outputs.iter()
            .find(|o| Some(**o) != activation_output.as_deref())
            .map(|o| o.to_string())
            .ok_or_else(|| ClassifierError::ModelError(
                "Model must expose a predictions output besides the activation".into()
            ))?,
    };

    Ok(ModelIo { input_name, activation_output, predictions_output })
}
