use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

use super::error::ClassifierError;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Memory layout of image-shaped tensors exchanged with the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TensorLayout {
    /// `[batch, height, width, channels]`, the Keras default
    #[default]
    Nhwc,
    /// `[batch, channels, height, width]`
    Nchw,
}

/// How pixel values are scaled before they are fed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Normalization {
    /// Values in `[0, 255]`; the model rescales internally
    #[default]
    Raw,
    /// Values in `[0, 1]`
    Unit,
    /// `[0, 1]` then per-channel ImageNet mean/std
    Imagenet,
}

impl Normalization {
    fn apply(self, value: u8, channel: usize) -> f32 {
        let v = value as f32;
        match self {
            Self::Raw => v,
            Self::Unit => v / 255.0,
            Self::Imagenet => (v / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
        }
    }
}

/// Decodes an uploaded image of any supported format into RGB8.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, ClassifierError> {
    if bytes.is_empty() {
        return Err(ClassifierError::ImageError("Uploaded image is empty".into()));
    }
    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Resizes to exactly `width`x`height`, ignoring the aspect ratio.
pub fn squash(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, FilterType::CatmullRom)
}

/// Builds a batch of one from an RGB image.
pub fn to_tensor(img: &RgbImage, layout: TensorLayout, normalization: Normalization) -> Array4<f32> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut tensor = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
    };

    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = normalization.apply(pixel[c], c);
            match layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_and_squash() {
        let img = decode_rgb(&png_bytes(640, 120, [10, 200, 30])).unwrap();
        let squashed = squash(&img, 224, 224);
        assert_eq!(squashed.dimensions(), (224, 224));
        assert_eq!(squashed.get_pixel(100, 100), &Rgb([10, 200, 30]));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_rgb(b"definitely not an image"), Err(ClassifierError::ImageError(_))));
        assert!(matches!(decode_rgb(&[]), Err(ClassifierError::ImageError(_))));
    }

    #[test]
    fn test_raw_nhwc_tensor() {
        let mut img = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        img.put_pixel(3, 1, Rgb([255, 128, 1]));
        let t = to_tensor(&img, TensorLayout::Nhwc, Normalization::Raw);
        assert_eq!(t.shape(), &[1, 2, 4, 3]);
        assert_eq!(t[[0, 1, 3, 0]], 255.0);
        assert_eq!(t[[0, 1, 3, 1]], 128.0);
        assert_eq!(t[[0, 1, 3, 2]], 1.0);
        assert_eq!(t[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_nchw_moves_channels_first() {
        let mut img = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        img.put_pixel(3, 1, Rgb([255, 0, 0]));
        let t = to_tensor(&img, TensorLayout::Nchw, Normalization::Unit);
        assert_eq!(t.shape(), &[1, 3, 2, 4]);
        assert_eq!(t[[0, 0, 1, 3]], 1.0);
        assert_eq!(t[[0, 1, 1, 3]], 0.0);
    }

    #[test]
    fn test_imagenet_normalization() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        let t = to_tensor(&img, TensorLayout::Nhwc, Normalization::Imagenet);
        let expected = (1.0 - 0.485) / 0.229;
        assert!((t[[0, 0, 0, 0]] - expected).abs() < 1e-5);
    }
}
