//! Gradient-weighted class activation maps.
//!
//! The model's head is global average pooling followed by one dense layer, so
//! the gradient of a class score with respect to the last convolutional
//! activation is the same at every spatial position and has a closed form.
//! For a logit output `z_c` it is `W[k][c] / (H·W)`. For a softmax output
//! `p_c` the chain rule through the softmax gives
//! `p_c · (W[k][c] − Σ_j p_j · W[k][j]) / (H·W)`.

pub mod colormap;
pub mod overlay;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView3, ArrayViewD, Axis, Ix4};

use crate::classifier::{ClassifierError, ClassifierHead, PredictionKind, TensorLayout};

pub use overlay::{encode_jpeg_base64, render_overlay};

/// Spatially pooled gradient of the score for `class_index`, one weight per channel.
pub fn class_weights(
    head: &ClassifierHead,
    class_index: usize,
    predictions: ArrayView1<f32>,
    kind: PredictionKind,
    spatial: usize,
) -> Result<Array1<f32>, ClassifierError> {
    if class_index >= head.num_classes() {
        return Err(ClassifierError::GradCamError(format!(
            "Class {} is outside the classifier head ({} classes)",
            class_index, head.num_classes()
        )));
    }
    if predictions.len() != head.num_classes() {
        return Err(ClassifierError::GradCamError(format!(
            "Model produced {} scores but the classifier head has {} classes",
            predictions.len(), head.num_classes()
        )));
    }
    if spatial == 0 {
        return Err(ClassifierError::GradCamError("Activation has no spatial extent".into()));
    }

    let column = head.kernel.column(class_index);
    let weights = match kind {
        PredictionKind::Logits => column.to_owned(),
        PredictionKind::Probabilities => {
            let p_c = predictions[class_index];
            let expected = head.kernel.dot(&predictions);
            (&column - &expected) * p_c
        }
    };
    Ok(weights / spatial as f32)
}

/// Weighted sum of activation channels, rectified and scaled so the maximum is 1.
/// An activation map with no positive response gives an all-zero heatmap.
pub fn heatmap(activation: ArrayView3<f32>, weights: ArrayView1<f32>) -> Result<Array2<f32>, ClassifierError> {
    let channels = activation.len_of(Axis(2));
    if channels != weights.len() {
        return Err(ClassifierError::GradCamError(format!(
            "Activation has {} channels but {} channel weights were given",
            channels, weights.len()
        )));
    }

    let raw = activation.map_axis(Axis(2), |pixel| pixel.dot(&weights));
    let max = raw.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if !(max > 0.0 && max.is_finite()) {
        return Ok(Array2::zeros(raw.raw_dim()));
    }
    Ok(raw.mapv(|v| v.max(0.0) / max))
}

/// Drops the batch axis of a `[1, ...]` activation and returns it as `[H, W, C]`.
pub fn activation_hwc(raw: ArrayViewD<f32>, layout: TensorLayout) -> Result<Array3<f32>, ClassifierError> {
    let shape = raw.shape().to_vec();
    let four = raw.into_dimensionality::<Ix4>().map_err(|_| {
        ClassifierError::GradCamError(format!("Expected a 4-D activation, got shape {:?}", shape))
    })?;
    if four.len_of(Axis(0)) != 1 {
        return Err(ClassifierError::GradCamError(format!(
            "Expected a batch of one activation, got shape {:?}", shape
        )));
    }
    let single = four.index_axis_move(Axis(0), 0);
    let hwc = match layout {
        TensorLayout::Nhwc => single,
        TensorLayout::Nchw => single.permuted_axes([1, 2, 0]),
    };
    Ok(hwc.as_standard_layout().into_owned())
}

/// Full Grad-CAM for one image: channel weights from the head, then the normalised map.
pub fn grad_cam(
    activation: ArrayView3<f32>,
    head: &ClassifierHead,
    class_index: usize,
    predictions: ArrayView1<f32>,
    kind: PredictionKind,
) -> Result<Array2<f32>, ClassifierError> {
    let spatial = activation.len_of(Axis(0)) * activation.len_of(Axis(1));
    let weights = class_weights(head, class_index, predictions, kind, spatial)?;
    heatmap(activation, weights.view())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn head() -> ClassifierHead {
        // 2 channels, 2 classes
        ClassifierHead::new(array![[1.0f32, -1.0], [0.5, 2.0]], array![0.0f32, 0.0]).unwrap()
    }

    #[test]
    fn test_logit_weights_are_kernel_column() {
        let w = class_weights(&head(), 1, array![0.3f32, 0.7].view(), PredictionKind::Logits, 4).unwrap();
        assert_eq!(w, array![-0.25f32, 0.5]);
    }

    #[test]
    fn test_softmax_weights_match_chain_rule() {
        let p = array![0.25f32, 0.75];
        let w = class_weights(&head(), 0, p.view(), PredictionKind::Probabilities, 1).unwrap();
        // channel 0: 0.25 * (1.0 - (0.25*1.0 + 0.75*-1.0)) = 0.25 * 1.5
        assert!((w[0] - 0.375).abs() < 1e-6);
        // channel 1: 0.25 * (0.5 - (0.25*0.5 + 0.75*2.0)) = 0.25 * -1.125
        assert!((w[1] + 0.28125).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_weights_match_finite_difference() {
        // One spatial position so pooled activations equal the activations.
        let h = head();
        let a = array![0.4f32, -0.2];
        let score = |a: &Array1<f32>| {
            let z = a.dot(&h.kernel);
            let e = z.mapv(f32::exp);
            e[1] / e.sum()
        };
        let z = a.dot(&h.kernel);
        let e = z.mapv(f32::exp);
        let p = &e / e.sum();
        let w = class_weights(&h, 1, p.view(), PredictionKind::Probabilities, 1).unwrap();
        let eps = 1e-3f32;
        for k in 0..2 {
            let mut up = a.clone();
            up[k] += eps;
            let mut down = a.clone();
            down[k] -= eps;
            let numeric = (score(&up) - score(&down)) / (2.0 * eps);
            assert!((numeric - w[k]).abs() < 1e-3, "channel {}: {} vs {}", k, numeric, w[k]);
        }
    }

    #[test]
    fn test_weights_reject_mismatched_scores() {
        let result = class_weights(&head(), 0, array![1.0f32].view(), PredictionKind::Logits, 1);
        assert!(matches!(result, Err(ClassifierError::GradCamError(_))));
        let result = class_weights(&head(), 2, array![0.5f32, 0.5].view(), PredictionKind::Logits, 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_heatmap_normalised_to_one() {
        let activation = Array::from_shape_vec((1, 3, 1), vec![1.0f32, 4.0, -2.0]).unwrap();
        let map = heatmap(activation.view(), array![0.5f32].view()).unwrap();
        assert_eq!(map.shape(), &[1, 3]);
        assert_eq!(map[[0, 0]], 0.25);
        assert_eq!(map[[0, 1]], 1.0);
        assert_eq!(map[[0, 2]], 0.0);
    }

    #[test]
    fn test_heatmap_without_positive_response_is_zero() {
        let activation = Array::from_shape_vec((2, 2, 1), vec![-1.0f32, -4.0, -2.0, 0.0]).unwrap();
        let map = heatmap(activation.view(), array![1.0f32].view()).unwrap();
        assert!(map.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_activation_layouts_agree() {
        // [1, H=2, W=3, C=2]
        let nhwc = Array::from_shape_fn((1, 2, 3, 2), |(_, y, x, c)| (y * 100 + x * 10 + c) as f32);
        let nchw = nhwc.clone().permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned();
        let a = activation_hwc(nhwc.into_dyn().view(), TensorLayout::Nhwc).unwrap();
        let b = activation_hwc(nchw.into_dyn().view(), TensorLayout::Nchw).unwrap();
        assert_eq!(a.shape(), &[2, 3, 2]);
        assert_eq!(a, b);
        assert_eq!(a[[1, 2, 1]], 121.0);
    }

    #[test]
    fn test_activation_rejects_wrong_rank() {
        let flat = Array::<f32, _>::zeros((1, 5)).into_dyn();
        assert!(activation_hwc(flat.view(), TensorLayout::Nhwc).is_err());
    }
}
