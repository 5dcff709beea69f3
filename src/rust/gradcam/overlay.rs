use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use ndarray::ArrayView2;

use super::colormap::jet_lut;
use crate::classifier::ClassifierError;

pub const DEFAULT_ALPHA: f32 = 0.75;
pub const JPEG_QUALITY: u8 = 75;

/// Shifts values so the minimum is 0, scales so the maximum is 255, then truncates to bytes.
fn rescale_to_u8(values: &[f32]) -> Vec<u8> {
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().map(|v| v - min).fold(f32::NEG_INFINITY, f32::max);
    let scale = if max > 0.0 && max.is_finite() { 255.0 / max } else { 1.0 };
    values.iter()
        .map(|&v| ((v - min) * scale).clamp(0.0, 255.0) as u8)
        .collect()
}

/// Colours a `[0, 1]` heatmap with the jet colormap, stretches it over `base` and blends
/// the two with weight `alpha` on the heatmap.
pub fn render_overlay(base: &RgbImage, heatmap: ArrayView2<f32>, alpha: f32) -> Result<RgbImage, ClassifierError> {
    let (rows, cols) = heatmap.dim();
    if rows == 0 || cols == 0 {
        return Err(ClassifierError::GradCamError("Heatmap is empty".into()));
    }
    if !(0.0..=1.0).contains(&alpha) {
        return Err(ClassifierError::ValidationError(format!(
            "Heatmap alpha must be within [0, 1], got {}", alpha
        )));
    }

    let lut = jet_lut();
    let mut colored = Vec::with_capacity(rows * cols * 3);
    for &v in heatmap.iter() {
        // NaN casts to 0
        let level = (v * 255.0).clamp(0.0, 255.0) as u8;
        colored.extend_from_slice(&lut[level as usize]);
    }

    let jet_small = RgbImage::from_raw(cols as u32, rows as u32, rescale_to_u8(&colored))
        .ok_or_else(|| ClassifierError::GradCamError("Heatmap buffer has the wrong size".into()))?;
    let (width, height) = base.dimensions();
    let jet_full = imageops::resize(&jet_small, width, height, FilterType::CatmullRom);

    let blended: Vec<f32> = jet_full.as_raw().iter()
        .zip(base.as_raw().iter())
        .map(|(&h, &b)| h as f32 * alpha + b as f32 * (1.0 - alpha))
        .collect();

    RgbImage::from_raw(width, height, rescale_to_u8(&blended))
        .ok_or_else(|| ClassifierError::GradCamError("Overlay buffer has the wrong size".into()))
}

/// JPEG-encodes an RGB image and returns it as standard padded base64.
pub fn encode_jpeg_base64(img: &RgbImage) -> Result<String, ClassifierError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .map_err(|e| ClassifierError::GradCamError(format!("Failed to encode JPEG: {}", e)))?;
    Ok(general_purpose::STANDARD.encode(&jpeg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::Array2;

    #[test]
    fn test_rescale_stretches_range() {
        assert_eq!(rescale_to_u8(&[2.0, 3.0, 4.0]), vec![0, 127, 255]);
        assert_eq!(rescale_to_u8(&[5.0, 5.0]), vec![0, 0]);
    }

    #[test]
    fn test_overlay_matches_base_size() {
        let base = RgbImage::from_pixel(32, 24, Rgb([120, 160, 40]));
        let map = Array2::from_shape_fn((7, 7), |(y, x)| (x + y) as f32 / 12.0);
        let out = render_overlay(&base, map.view(), DEFAULT_ALPHA).unwrap();
        assert_eq!(out.dimensions(), (32, 24));
    }

    #[test]
    fn test_hot_spot_is_red() {
        let base = RgbImage::from_pixel(16, 16, Rgb([128, 128, 128]));
        let mut map = Array2::<f32>::zeros((2, 2));
        map[[0, 0]] = 1.0;
        let out = render_overlay(&base, map.view(), 1.0).unwrap();
        let hot = out.get_pixel(0, 0);
        let cold = out.get_pixel(15, 15);
        assert!(hot[0] > hot[2], "hot pixel {:?}", hot);
        assert!(cold[2] > cold[0], "cold pixel {:?}", cold);
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        let base = RgbImage::new(4, 4);
        let map = Array2::<f32>::zeros((2, 2));
        assert!(render_overlay(&base, map.view(), 1.5).is_err());
        assert!(render_overlay(&base, Array2::<f32>::zeros((0, 0)).view(), 0.5).is_err());
    }

    #[test]
    fn test_jpeg_base64_roundtrip_header() {
        let img = RgbImage::from_pixel(8, 8, Rgb([200, 10, 10]));
        let encoded = encode_jpeg_base64(&img).unwrap();
        let bytes = general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
    }
}
