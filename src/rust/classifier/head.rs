use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::Deserialize;

use super::error::ClassifierError;

/// Weights of the dense layer that follows global average pooling of the last
/// convolutional activation. Grad-CAM needs them to form the gradient of a class
/// score with respect to each activation channel.
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    /// `[channels, classes]`, Keras' kernel layout
    pub kernel: Array2<f32>,
    /// `[classes]`
    pub bias: Array1<f32>,
}

#[derive(Deserialize)]
struct HeadFile {
    kernel: Vec<Vec<f32>>,
    #[serde(default)]
    bias: Vec<f32>,
}

impl ClassifierHead {
    pub fn new(kernel: Array2<f32>, bias: Array1<f32>) -> Result<Self, ClassifierError> {
        if kernel.nrows() == 0 || kernel.ncols() == 0 {
            return Err(ClassifierError::ValidationError("Classifier head kernel is empty".into()));
        }
        if bias.len() != kernel.ncols() {
            return Err(ClassifierError::ValidationError(format!(
                "Classifier head bias has {} entries but the kernel has {} classes",
                bias.len(), kernel.ncols()
            )));
        }
        Ok(Self { kernel, bias })
    }

    /// Parses `{"kernel": [[..]; channels], "bias": [..]}`. A missing bias is taken as zeros.
    pub fn from_json(json: &str) -> Result<Self, ClassifierError> {
        let file: HeadFile = serde_json::from_str(json)
            .map_err(|e| ClassifierError::BuildError(format!("Failed to parse classifier head: {}", e)))?;

        let channels = file.kernel.len();
        let classes = file.kernel.first().map(Vec::len).unwrap_or(0);
        if let Some(row) = file.kernel.iter().position(|r| r.len() != classes) {
            return Err(ClassifierError::ValidationError(format!(
                "Classifier head kernel row {} has {} entries, expected {}",
                row, file.kernel[row].len(), classes
            )));
        }

        let flat: Vec<f32> = file.kernel.into_iter().flatten().collect();
        let kernel = Array2::from_shape_vec((channels, classes), flat)
            .map_err(|e| ClassifierError::BuildError(format!("Invalid classifier head kernel: {}", e)))?;
        let bias = if file.bias.is_empty() {
            Array1::zeros(classes)
        } else {
            Array1::from(file.bias)
        };

        Self::new(kernel, bias)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            ClassifierError::BuildError(format!("Failed to read classifier head {:?}: {}", path, e))
        })?;
        Self::from_json(&json)
    }

    pub fn channels(&self) -> usize {
        self.kernel.nrows()
    }

    pub fn num_classes(&self) -> usize {
        self.kernel.ncols()
    }
}
