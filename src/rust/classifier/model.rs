use std::sync::Arc;

use image::RgbImage;
use ndarray::Array1;
use ort::session::Session;

use super::error::ClassifierError;
use super::head::ClassifierHead;
use super::preprocess::TensorLayout;
use super::inference::{ImageInference, ModelIo, PredictionKind, PreparedImage, PreprocessConfig, RawOutputs};
use super::utils::{argmax, softmax};
use super::{ClassifierInfo, Diagnosis, Prediction};
use crate::gradcam::{self, encode_jpeg_base64, render_overlay};

/// A thread-safe rice leaf disease classifier backed by an ONNX model.
///
/// # Thread Safety
///
/// This type is automatically `Send + Sync`: the session, labels and head are shared
/// through `Arc`, and everything else is plain data. Wrap it in an `Arc` to share it
/// between request handlers.
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use rice_leaf::Classifier;
///
/// let classifier = Classifier::builder()
///     .with_model_file("zambali_rice_efficientnet.onnx")?
///     .with_head_file("head.json")?
///     .build()?;
///
/// let bytes = std::fs::read("leaf.jpg")?;
/// let diagnosis = classifier.diagnose(&bytes)?;
/// println!("{} ({})", diagnosis.prediction.label, diagnosis.prediction.confidence_percent());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Classifier {
    pub model_path: String,
    pub head_path: Option<String>,
    pub session: Arc<Session>,
    pub io: ModelIo,
    pub labels: Arc<Vec<String>>,
    pub head: Option<Arc<ClassifierHead>>,
    pub prediction_kind: PredictionKind,
    pub preprocess: PreprocessConfig,
    pub heatmap_alpha: f32,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<Classifier>();
    }
};

impl ImageInference for Classifier {
    fn session(&self) -> Option<&Session> {
        Some(&self.session)
    }

    fn model_io(&self) -> Option<&ModelIo> {
        Some(&self.io)
    }

    fn preprocess_config(&self) -> &PreprocessConfig {
        &self.preprocess
    }
}

/// Turns raw class scores into a labelled prediction.
pub(crate) fn summarize(
    scores: &Array1<f32>,
    kind: PredictionKind,
    labels: &[String],
) -> Result<Prediction, ClassifierError> {
    let probabilities = match kind {
        PredictionKind::Probabilities => scores.clone(),
        PredictionKind::Logits => softmax(scores.view()),
    };
    let class_index = argmax(probabilities.view())
        .ok_or_else(|| ClassifierError::PredictionError("Model returned no usable class scores".into()))?;
    let label = labels.get(class_index).cloned().ok_or_else(|| {
        ClassifierError::PredictionError(format!(
            "Predicted class {} has no label ({} labels configured)",
            class_index, labels.len()
        ))
    })?;

    Ok(Prediction {
        label,
        class_index,
        confidence: probabilities[class_index],
        probabilities: probabilities.to_vec(),
    })
}

impl Classifier {
    /// Creates a new ClassifierBuilder for fluent construction
    pub fn builder() -> super::builder::ClassifierBuilder {
        super::builder::ClassifierBuilder::new()
    }

    /// Returns information about the classifier's current state
    pub fn info(&self) -> ClassifierInfo {
        ClassifierInfo {
            model_path: self.model_path.clone(),
            head_path: self.head_path.clone(),
            num_classes: self.labels.len(),
            class_labels: self.labels.as_ref().clone(),
            input_size: (self.preprocess.input_width, self.preprocess.input_height),
            predictions_output: self.io.predictions_output.clone(),
            gradcam_enabled: self.gradcam_enabled(),
        }
    }

    /// Heatmaps need both the activation output and the head weights.
    pub fn gradcam_enabled(&self) -> bool {
        self.head.is_some() && self.io.activation_output.is_some()
    }

    /// Classifies an encoded image without producing a heatmap.
    pub fn predict(&self, image: &[u8]) -> Result<Prediction, ClassifierError> {
        let PreparedImage { tensor, .. } = self.prepare(image)?;
        let outputs = self.run_model(tensor, false)?;
        summarize(&outputs.predictions, self.prediction_kind, &self.labels)
    }

    /// Classifies an encoded image and renders the Grad-CAM overlay for the predicted class.
    ///
    /// Heatmap failures never fail the diagnosis; they are logged and leave
    /// `heatmap_image` empty.
    pub fn diagnose(&self, image: &[u8]) -> Result<Diagnosis, ClassifierError> {
        let PreparedImage { image, tensor } = self.prepare(image)?;
        let gradcam_enabled = self.gradcam_enabled();
        let outputs = self.run_model(tensor, gradcam_enabled)?;

        let overlay = OverlaySettings {
            head: self.head.as_deref().filter(|_| gradcam_enabled),
            kind: self.prediction_kind,
            layout: self.preprocess.layout,
            alpha: self.heatmap_alpha,
        };
        assemble_diagnosis(&image, &outputs, &self.labels, &overlay)
    }
}

/// How the heatmap of a diagnosis is drawn. Without a head no heatmap is drawn.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OverlaySettings<'a> {
    pub head: Option<&'a ClassifierHead>,
    pub kind: PredictionKind,
    pub layout: TensorLayout,
    pub alpha: f32,
}

/// Builds the diagnosis from one forward pass over `image`.
pub(crate) fn assemble_diagnosis(
    image: &RgbImage,
    outputs: &RawOutputs,
    labels: &[String],
    overlay: &OverlaySettings<'_>,
) -> Result<Diagnosis, ClassifierError> {
    let prediction = summarize(&outputs.predictions, overlay.kind, labels)?;

    let heatmap_image = match overlay.head {
        Some(head) => match render_heatmap(image, outputs, head, prediction.class_index, overlay) {
            Ok(encoded) => encoded,
            Err(e) => {
                log::warn!("Grad-CAM failed: {}", e);
                String::new()
            }
        },
        None => {
            log::debug!("Grad-CAM disabled, returning an empty heatmap");
            String::new()
        }
    };

    Ok(Diagnosis { prediction, heatmap_image })
}

fn render_heatmap(
    image: &RgbImage,
    outputs: &RawOutputs,
    head: &ClassifierHead,
    class_index: usize,
    overlay: &OverlaySettings<'_>,
) -> Result<String, ClassifierError> {
    let activation = outputs.activation.as_ref()
        .ok_or_else(|| ClassifierError::GradCamError("Model returned no activation".into()))?;

    let activation = gradcam::activation_hwc(activation.view(), overlay.layout)?;
    let map = gradcam::grad_cam(
        activation.view(),
        head,
        class_index,
        outputs.predictions.view(),
        overlay.kind,
    )?;
    let rendered = render_overlay(image, map.view(), overlay.alpha)?;
    encode_jpeg_base64(&rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::default_labels;
    use base64::{engine::general_purpose, Engine as _};
    use image::Rgb;
    use ndarray::{array, Array2, ArrayD, IxDyn};

    /// NHWC activation `[1, 7, 7, 3]`: channel 0 hot in the top-left corner, channel 1 elsewhere.
    fn outputs_with_activation(predictions: Array1<f32>) -> RawOutputs {
        let activation = ArrayD::from_shape_fn(IxDyn(&[1, 7, 7, 3]), |ix| {
            let (y, x, c) = (ix[1], ix[2], ix[3]);
            match c {
                0 if y < 2 && x < 2 => 4.0,
                1 if !(y < 2 && x < 2) => 1.0,
                _ => 0.0,
            }
        });
        RawOutputs { activation: Some(activation), predictions }
    }

    /// Seven-class head where class 4 reads channel 0 and every other class channel 1.
    fn seven_class_head(channels: usize) -> ClassifierHead {
        let kernel = Array2::from_shape_fn((channels, 7), |(k, j)| match (k, j) {
            (0, 4) => 2.0,
            (1, j) if j != 4 => 1.0,
            _ => 0.0,
        });
        ClassifierHead::new(kernel, Array1::zeros(7)).unwrap()
    }

    fn leaf() -> RgbImage {
        RgbImage::from_pixel(224, 224, Rgb([80, 150, 60]))
    }

    fn settings(head: Option<&ClassifierHead>) -> OverlaySettings<'_> {
        OverlaySettings {
            head,
            kind: PredictionKind::Probabilities,
            layout: TensorLayout::Nhwc,
            alpha: 0.75,
        }
    }

    #[test]
    fn test_summarize_probabilities() {
        let scores = array![0.01f32, 0.02, 0.9, 0.03, 0.01, 0.02, 0.01];
        let prediction = summarize(&scores, PredictionKind::Probabilities, &default_labels()).unwrap();
        assert_eq!(prediction.class_index, 2);
        assert_eq!(prediction.label, "Healthy Rice Leaf");
        assert_eq!(prediction.confidence, 0.9);
        assert_eq!(prediction.probabilities.len(), 7);
    }

    #[test]
    fn test_summarize_logits_applies_softmax() {
        let scores = array![0.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 5.0];
        let prediction = summarize(&scores, PredictionKind::Logits, &default_labels()).unwrap();
        assert_eq!(prediction.label, "Sheath Blight");
        let total: f32 = prediction.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(prediction.confidence > 0.9 && prediction.confidence < 1.0);
    }

    #[test]
    fn test_summarize_unlabelled_class() {
        let scores = array![0.1f32, 0.9];
        let labels = vec!["only".to_string()];
        let result = summarize(&scores, PredictionKind::Probabilities, &labels);
        assert!(matches!(result, Err(ClassifierError::PredictionError(_))));
    }

    #[test]
    fn test_assemble_diagnosis_with_heatmap() {
        let head = seven_class_head(3);
        let outputs = outputs_with_activation(array![0.02f32, 0.03, 0.05, 0.05, 0.8, 0.03, 0.02]);

        let diagnosis = assemble_diagnosis(&leaf(), &outputs, &default_labels(), &settings(Some(&head))).unwrap();
        assert_eq!(diagnosis.prediction.class_index, 4);
        assert_eq!(diagnosis.prediction.label, "Leaf Scald");
        assert_eq!(diagnosis.prediction.confidence_percent(), "80.00%");

        let jpeg = general_purpose::STANDARD.decode(&diagnosis.heatmap_image).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let overlay = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((overlay.width(), overlay.height()), (224, 224));
    }

    #[test]
    fn test_assemble_diagnosis_nchw_activation() {
        let head = seven_class_head(3);
        let mut outputs = outputs_with_activation(array![0.02f32, 0.03, 0.05, 0.05, 0.8, 0.03, 0.02]);
        outputs.activation = outputs.activation.map(|a| a.permuted_axes(IxDyn(&[0, 3, 1, 2])).as_standard_layout().into_owned());

        let mut overlay = settings(Some(&head));
        overlay.layout = TensorLayout::Nchw;
        let diagnosis = assemble_diagnosis(&leaf(), &outputs, &default_labels(), &overlay).unwrap();
        assert!(!diagnosis.heatmap_image.is_empty());
    }

    #[test]
    fn test_heatmap_failure_keeps_prediction() {
        // Head expects 5 channels, the activation has 3.
        let head = seven_class_head(5);
        let outputs = outputs_with_activation(array![0.02f32, 0.03, 0.05, 0.05, 0.8, 0.03, 0.02]);

        let diagnosis = assemble_diagnosis(&leaf(), &outputs, &default_labels(), &settings(Some(&head))).unwrap();
        assert_eq!(diagnosis.prediction.label, "Leaf Scald");
        assert_eq!(diagnosis.heatmap_image, "");
    }

    #[test]
    fn test_missing_activation_keeps_prediction() {
        let head = seven_class_head(3);
        let outputs = RawOutputs {
            activation: None,
            predictions: array![0.9f32, 0.02, 0.02, 0.02, 0.02, 0.01, 0.01],
        };

        let diagnosis = assemble_diagnosis(&leaf(), &outputs, &default_labels(), &settings(Some(&head))).unwrap();
        assert_eq!(diagnosis.prediction.class_index, 0);
        assert_eq!(diagnosis.heatmap_image, "");
    }

    #[test]
    fn test_no_head_skips_heatmap() {
        let outputs = outputs_with_activation(array![0.02f32, 0.03, 0.05, 0.05, 0.8, 0.03, 0.02]);
        let diagnosis = assemble_diagnosis(&leaf(), &outputs, &default_labels(), &settings(None)).unwrap();
        assert_eq!(diagnosis.prediction.class_index, 4);
        assert!(diagnosis.heatmap_image.is_empty());
    }
}
