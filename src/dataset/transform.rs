//! Image transforms applied before batching.
//!
//! - **Training**: resize, zero-pad, random crop, random horizontal flip
//! - **Validation/Test**: resize, center crop (no randomness)
//!
//! Both variants return CHW float data in `[0, 1]`; per-channel
//! normalization happens on the batched tensor in the batcher.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{DefectError, Result};

/// Configuration for the transform pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Exact square resize applied first (None keeps the source size)
    pub resize: Option<u32>,
    /// Side of the square crop fed to the network
    pub crop_size: u32,
    /// Zero padding added on each side before the random crop
    pub padding: u32,
    /// Probability of a horizontal flip (training only)
    pub horizontal_flip_prob: f32,
    /// Per-channel normalization mean
    pub mean: [f32; 3],
    /// Per-channel normalization standard deviation
    pub std: [f32; 3],
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            resize: Some(256),
            crop_size: 224,
            padding: 4,
            horizontal_flip_prob: 0.5,
            mean: [0.5071, 0.4867, 0.4408],
            std: [0.2675, 0.2565, 0.2761],
        }
    }
}

impl TransformConfig {
    /// Reject settings that would produce empty tensors or divide by zero
    pub fn validate(&self) -> Result<()> {
        if self.crop_size == 0 {
            return Err(DefectError::Config("crop_size must be greater than 0".to_string()));
        }
        if self.resize == Some(0) {
            return Err(DefectError::Config("resize must be greater than 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.horizontal_flip_prob) {
            return Err(DefectError::Config(format!(
                "horizontal_flip_prob must be in [0, 1], got {}",
                self.horizontal_flip_prob
            )));
        }
        if let Some(std) = self.std.iter().find(|s| s.is_nan() || **s <= 0.0) {
            return Err(DefectError::Config(format!("std entries must be positive, got {std}")));
        }
        Ok(())
    }
}

/// Which variant of the pipeline to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    Train,
    Eval,
}

/// Transform pipeline bound to a mode
#[derive(Debug, Clone)]
pub struct Transform {
    config: TransformConfig,
    mode: TransformMode,
}

impl Transform {
    pub fn new(config: TransformConfig, mode: TransformMode) -> Self {
        Self { config, mode }
    }

    /// Random crop + flip pipeline
    pub fn train(config: TransformConfig) -> Self {
        Self::new(config, TransformMode::Train)
    }

    /// Deterministic center-crop pipeline
    pub fn eval(config: TransformConfig) -> Self {
        Self::new(config, TransformMode::Eval)
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    /// Output side length
    pub fn output_size(&self) -> usize {
        self.config.crop_size as usize
    }

    /// Run the pipeline and return the transformed image
    pub fn apply_image(&self, img: DynamicImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let mut rgb = img.to_rgb8();

        if let Some(size) = self.config.resize {
            if rgb.dimensions() != (size, size) {
                rgb = imageops::resize(&rgb, size, size, FilterType::Triangle);
            }
        }

        match self.mode {
            TransformMode::Train => {
                if self.config.padding > 0 {
                    let p = self.config.padding;
                    let (w, h) = rgb.dimensions();
                    rgb = pad_to(&rgb, w + 2 * p, h + 2 * p);
                }
                rgb = pad_if_needed(rgb, self.config.crop_size);
                rgb = random_crop(&rgb, self.config.crop_size, rng);

                if rng.gen::<f32>() < self.config.horizontal_flip_prob {
                    rgb = imageops::flip_horizontal(&rgb);
                }
                rgb
            }
            TransformMode::Eval => {
                let rgb = pad_if_needed(rgb, self.config.crop_size);
                center_crop(&rgb, self.config.crop_size)
            }
        }
    }

    /// Run the pipeline and convert to CHW float data in `[0, 1]`
    pub fn apply(&self, img: DynamicImage, rng: &mut ChaCha8Rng) -> Vec<f32> {
        to_tensor_data(&self.apply_image(img, rng))
    }
}

/// Place `img` centered on a black canvas of `width` x `height`
fn pad_to(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let mut canvas = RgbImage::new(width, height);
    let x = (width.saturating_sub(w) / 2) as i64;
    let y = (height.saturating_sub(h) / 2) as i64;
    imageops::overlay(&mut canvas, img, x, y);
    canvas
}

/// Grow the image with zeros until both sides are at least `size`
fn pad_if_needed(img: RgbImage, size: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    if w >= size && h >= size {
        return img;
    }
    pad_to(&img, w.max(size), h.max(size))
}

fn random_crop(img: &RgbImage, size: u32, rng: &mut ChaCha8Rng) -> RgbImage {
    let (w, h) = img.dimensions();
    let x = rng.gen_range(0..=w - size);
    let y = rng.gen_range(0..=h - size);
    imageops::crop_imm(img, x, y, size, size).to_image()
}

fn center_crop(img: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let x = (w - size) / 2;
    let y = (h - size) / 2;
    imageops::crop_imm(img, x, y, size, size).to_image()
}

/// Convert to CHW float data in `[0, 1]`
pub fn to_tensor_data(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use rand::SeedableRng;

    fn create_test_image(w: u32, h: u32) -> DynamicImage {
        let img = ImageBuffer::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_validate_rejects_degenerate_settings() {
        assert!(TransformConfig::default().validate().is_ok());

        let zero_crop = TransformConfig { crop_size: 0, ..Default::default() };
        assert!(matches!(zero_crop.validate(), Err(DefectError::Config(_))));

        let zero_std = TransformConfig { std: [0.2, 0.0, 0.2], ..Default::default() };
        assert!(matches!(zero_std.validate(), Err(DefectError::Config(_))));

        let bad_flip = TransformConfig { horizontal_flip_prob: 1.5, ..Default::default() };
        assert!(bad_flip.validate().is_err());

        let zero_resize = TransformConfig { resize: Some(0), ..Default::default() };
        assert!(zero_resize.validate().is_err());
    }

    fn small_config() -> TransformConfig {
        TransformConfig {
            resize: None,
            crop_size: 8,
            padding: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = TransformConfig::default();
        assert_eq!(config.resize, Some(256));
        assert_eq!(config.crop_size, 224);
        assert_eq!(config.padding, 4);
        assert_eq!(config.mean, [0.5071, 0.4867, 0.4408]);
    }

    #[test]
    fn test_train_output_size() {
        let transform = Transform::train(small_config());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let out = transform.apply_image(create_test_image(12, 10), &mut rng);
        assert_eq!(out.dimensions(), (8, 8));

        let data = transform.apply(create_test_image(12, 10), &mut rng);
        assert_eq!(data.len(), 3 * 8 * 8);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_eval_center_crop_is_deterministic() {
        let transform = Transform::eval(small_config());
        let mut rng_a = ChaCha8Rng::seed_from_u64(1);
        let mut rng_b = ChaCha8Rng::seed_from_u64(99);

        let a = transform.apply_image(create_test_image(12, 12), &mut rng_a);
        let b = transform.apply_image(create_test_image(12, 12), &mut rng_b);
        assert_eq!(a, b);
        // Offset (2, 2) in the source
        assert_eq!(a.get_pixel(0, 0), &Rgb([2, 2, 128]));
    }

    #[test]
    fn test_small_image_is_padded_up() {
        let transform = Transform::eval(small_config());
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = transform.apply_image(create_test_image(4, 4), &mut rng);
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(2, 2), &Rgb([0, 0, 128]));
    }

    #[test]
    fn test_always_flip() {
        let config = TransformConfig {
            padding: 0,
            horizontal_flip_prob: 1.0,
            ..small_config()
        };
        let transform = Transform::train(config);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = transform.apply_image(create_test_image(8, 8), &mut rng);
        assert_eq!(out.get_pixel(0, 0), &Rgb([7, 0, 128]));
    }

    #[test]
    fn test_resize_applied_first() {
        let config = TransformConfig {
            resize: Some(16),
            ..small_config()
        };
        let transform = Transform::eval(config);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = transform.apply_image(create_test_image(40, 30), &mut rng);
        assert_eq!(out.dimensions(), (8, 8));
    }

    #[test]
    fn test_to_tensor_data_is_chw() {
        let img = ImageBuffer::from_fn(2, 1, |x, _| Rgb([255 * x as u8, 0, 255]));
        let data = to_tensor_data(&img);
        assert_eq!(data, vec![0.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
    }
}
