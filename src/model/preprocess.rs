//! Image preprocessing driven by the hub `preprocessor_config.json`.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use serde::Deserialize;
use std::path::Path;

use super::{ImagePreprocessor, PixelTensor};
use crate::error::{Result, SimilarityError};

// CLIP normalization constants (OpenAI stats)
const CLIP_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const CLIP_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];
const CLIP_INPUT_SIZE: u32 = 224;

/// `size` / `crop_size` appear as a bare integer or as an object depending
/// on the exporter version.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SizeSpec {
    Square(u32),
    ShortestEdge { shortest_edge: u32 },
    HeightWidth { height: u32, width: u32 },
}

impl SizeSpec {
    fn shortest_edge(&self) -> u32 {
        match *self {
            SizeSpec::Square(s) => s,
            SizeSpec::ShortestEdge { shortest_edge } => shortest_edge,
            SizeSpec::HeightWidth { height, width } => height.min(width),
        }
    }

    /// (width, height)
    fn dims(&self) -> (u32, u32) {
        match *self {
            SizeSpec::Square(s) => (s, s),
            SizeSpec::ShortestEdge { shortest_edge } => (shortest_edge, shortest_edge),
            SizeSpec::HeightWidth { height, width } => (width, height),
        }
    }
}

/// Subset of `preprocessor_config.json` the CLIP image processor uses.
#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessorConfig {
    #[serde(default = "default_true")]
    pub do_resize: bool,
    #[serde(default = "default_size")]
    pub size: SizeSpec,
    #[serde(default = "default_resample")]
    pub resample: u8,
    #[serde(default = "default_true")]
    pub do_center_crop: bool,
    #[serde(default = "default_size")]
    pub crop_size: SizeSpec,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_rescale_factor")]
    pub rescale_factor: f32,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default = "default_mean")]
    pub image_mean: [f32; 3],
    #[serde(default = "default_std")]
    pub image_std: [f32; 3],
}

fn default_true() -> bool {
    true
}

fn default_size() -> SizeSpec {
    SizeSpec::Square(CLIP_INPUT_SIZE)
}

fn default_resample() -> u8 {
    3 // PIL bicubic
}

fn default_rescale_factor() -> f32 {
    1.0 / 255.0
}

fn default_mean() -> [f32; 3] {
    CLIP_MEAN
}

fn default_std() -> [f32; 3] {
    CLIP_STD
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: default_size(),
            resample: default_resample(),
            do_center_crop: true,
            crop_size: default_size(),
            do_rescale: true,
            rescale_factor: default_rescale_factor(),
            do_normalize: true,
            image_mean: CLIP_MEAN,
            image_std: CLIP_STD,
        }
    }
}

/// Resize, center-crop and normalize images into NCHW float tensors.
#[derive(Debug, Clone, Default)]
pub struct ClipPreprocessor {
    config: PreprocessorConfig,
}

impl ClipPreprocessor {
    pub fn new(config: PreprocessorConfig) -> Self {
        Self { config }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SimilarityError::ModelLoad(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: PreprocessorConfig = serde_json::from_str(content).map_err(|e| {
            SimilarityError::ModelLoad(format!("invalid preprocessor config: {}", e))
        })?;
        if config.image_std.iter().any(|s| *s == 0.0) {
            return Err(SimilarityError::ModelLoad(
                "preprocessor image_std contains zero".into(),
            ));
        }
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    fn filter(&self) -> FilterType {
        match self.config.resample {
            0 => FilterType::Nearest,
            1 => FilterType::Lanczos3,
            2 => FilterType::Triangle,
            _ => FilterType::CatmullRom,
        }
    }
}

impl ImagePreprocessor for ClipPreprocessor {
    fn preprocess(&self, image: &DynamicImage) -> Result<PixelTensor> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(SimilarityError::EmptyInput("image has zero area".into()));
        }

        let mut resized = if self.config.do_resize {
            // Resize shortest edge to target while preserving aspect ratio
            let target = self.config.size.shortest_edge();
            let scale = target as f32 / w.min(h) as f32;
            let new_w = ((w as f32) * scale).round().max(1.0) as u32;
            let new_h = ((h as f32) * scale).round().max(1.0) as u32;
            image.resize_exact(new_w, new_h, self.filter())
        } else {
            image.clone()
        };

        let (out_w, out_h) = if self.config.do_center_crop {
            self.config.crop_size.dims()
        } else {
            resized.dimensions()
        };

        if resized.width() < out_w || resized.height() < out_h {
            resized = resized.resize_exact(out_w, out_h, self.filter());
        }

        let start_x = (resized.width() - out_w) / 2;
        let start_y = (resized.height() - out_h) / 2;
        let rgb = resized.crop_imm(start_x, start_y, out_w, out_h).to_rgb8();

        let scale = if self.config.do_rescale {
            self.config.rescale_factor
        } else {
            1.0
        };
        let (mean, std) = if self.config.do_normalize {
            (self.config.image_mean, self.config.image_std)
        } else {
            ([0.0; 3], [1.0; 3])
        };

        let mut array = Array4::<f32>::zeros((1, 3, out_h as usize, out_w as usize));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                array[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 * scale - mean[c]) / std[c];
            }
        }

        let (data, _offset) = array.into_raw_vec_and_offset();
        Ok(PixelTensor {
            shape: [1, 3, out_h as usize, out_w as usize],
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_parse_hub_config_forms() {
        let legacy = ClipPreprocessor::from_json(
            r#"{"crop_size": 224, "size": 224, "do_center_crop": true,
                "image_mean": [0.5, 0.5, 0.5], "image_std": [0.5, 0.5, 0.5]}"#,
        )
        .unwrap();
        assert_eq!(legacy.config().size, SizeSpec::Square(224));
        assert_eq!(legacy.config().image_mean, [0.5, 0.5, 0.5]);

        let modern = ClipPreprocessor::from_json(
            r#"{"crop_size": {"height": 256, "width": 256}, "size": {"shortest_edge": 256}}"#,
        )
        .unwrap();
        assert_eq!(modern.config().crop_size.dims(), (256, 256));
        assert_eq!(modern.config().size.shortest_edge(), 256);
        assert_eq!(modern.config().image_std, CLIP_STD);
    }

    #[test]
    fn test_rejects_zero_std() {
        let err = ClipPreprocessor::from_json(r#"{"image_std": [0.0, 1.0, 1.0]}"#).unwrap_err();
        assert!(matches!(err, SimilarityError::ModelLoad(_)));
    }

    #[test]
    fn test_output_shape_for_wide_image() {
        let pre = ClipPreprocessor::new(PreprocessorConfig {
            size: SizeSpec::Square(32),
            crop_size: SizeSpec::Square(32),
            ..Default::default()
        });
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 40, Rgb([255, 0, 0])));
        let tensor = pre.preprocess(&img).unwrap();
        assert_eq!(tensor.shape, [1, 3, 32, 32]);
        assert_eq!(tensor.data.len(), 3 * 32 * 32);
    }

    #[test]
    fn test_normalization_values() {
        let pre = ClipPreprocessor::new(PreprocessorConfig {
            size: SizeSpec::Square(4),
            crop_size: SizeSpec::Square(4),
            image_mean: [0.5, 0.5, 0.5],
            image_std: [0.5, 0.5, 0.5],
            ..Default::default()
        });
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 0, 255])));
        let tensor = pre.preprocess(&img).unwrap();
        let plane = 16;
        // R = (1.0 - 0.5) / 0.5, G = (0.0 - 0.5) / 0.5
        assert!((tensor.data[0] - 1.0).abs() < 1e-3);
        assert!((tensor.data[plane] + 1.0).abs() < 1e-3);
        assert!((tensor.data[2 * plane] - 1.0).abs() < 1e-3);
    }
}
