//! Decoding and normalization of query images.

use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat, RgbImage};

use crate::error::{AppError, Result};

/// Rules applied when turning an upload into a model input.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Canonical width fed to the embedding generator
    pub target_width: u32,
    /// Canonical height fed to the embedding generator
    pub target_height: u32,
    /// Smallest accepted side, in pixels
    pub min_side: u32,
    /// Largest accepted side, in pixels
    pub max_side: u32,
    /// Accepted encodings
    pub allowed_formats: Vec<ImageFormat>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            target_width: 224,
            target_height: 224,
            min_side: 50,
            max_side: 5000,
            allowed_formats: vec![ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP],
        }
    }
}

/// An RGB image resized to the canonical model input shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pixels: RgbImage,
}

impl NormalizedImage {
    /// Resize an already decoded image to the canonical shape.
    pub fn from_dynamic(image: &DynamicImage, config: &ImageConfig) -> Self {
        let resized = image.resize_exact(
            config.target_width,
            config.target_height,
            FilterType::Lanczos3,
        );
        Self {
            pixels: resized.to_rgb8(),
        }
    }

    /// Wrap an RGB buffer that already has the canonical shape.
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Underlying RGB buffer.
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Pixel values in `[0, 1]`, laid out channel-first (`3 x H x W`).
    pub fn to_chw(&self) -> Vec<f32> {
        let (width, height) = self.pixels.dimensions();
        let plane = (width * height) as usize;
        let mut data = vec![0f32; plane * 3];
        for (x, y, pixel) in self.pixels.enumerate_pixels() {
            let offset = (y * width + x) as usize;
            for c in 0..3 {
                data[c * plane + offset] = f32::from(pixel[c]) / 255.0;
            }
        }
        data
    }
}

/// Decode raw upload bytes, validate them and normalize to the model shape.
///
/// # Errors
///
/// Returns [`AppError::InvalidImage`] when the bytes are not a supported
/// image or the image is outside the accepted size range.
pub fn normalize_image(data: &[u8], config: &ImageConfig) -> Result<NormalizedImage> {
    let image = decode_image(data, config)?;
    log::debug!(
        "Normalizing {}x{} image to {}x{}",
        image.width(),
        image.height(),
        config.target_width,
        config.target_height
    );
    Ok(NormalizedImage::from_dynamic(&image, config))
}

/// Decode and validate an upload without resizing it.
pub fn decode_image(data: &[u8], config: &ImageConfig) -> Result<DynamicImage> {
    if data.is_empty() {
        return Err(AppError::InvalidImage("empty upload".to_string()));
    }

    let format = image::guess_format(data)
        .map_err(|_| AppError::InvalidImage("unrecognized image format".to_string()))?;
    if !config.allowed_formats.contains(&format) {
        return Err(AppError::InvalidImage(format!(
            "unsupported image format: {:?}",
            format
        )));
    }

    let image = image::io::Reader::with_format(Cursor::new(data), format)
        .decode()
        .map_err(|e| AppError::InvalidImage(e.to_string()))?;

    let (width, height) = image.dimensions();
    if width < config.min_side || height < config.min_side {
        return Err(AppError::InvalidImage(format!(
            "image is too small ({}x{}, minimum side {})",
            width, height, config.min_side
        )));
    }
    if width > config.max_side || height > config.max_side {
        return Err(AppError::InvalidImage(format!(
            "image is too large ({}x{}, maximum side {})",
            width, height, config.max_side
        )));
    }

    Ok(image)
}

#[cfg(test)]
pub(crate) fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
