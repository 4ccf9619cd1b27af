//! Embedding generators: turn a normalized image into an [`Embedding`].
//!
//! A generator is an explicitly constructed handle passed to whoever needs
//! it. There is no process-wide model instance.

use std::fmt;

use crate::{
    core::{embedding::Embedding, preprocess::NormalizedImage},
    error::{AppError, Result},
};

/// Something that produces fixed-dimension embeddings from images.
///
/// Implementations must be deterministic: the same pixels yield the same
/// embedding for a given model version.
pub trait EmbeddingGenerator: Send + Sync + fmt::Debug {
    /// Human-readable model name.
    fn model_name(&self) -> &str;

    /// Dimension of every embedding this generator returns.
    fn dimension(&self) -> usize;

    /// Whether the generator is ready to serve requests.
    fn is_ready(&self) -> bool {
        true
    }

    /// Compute the embedding of one image.
    fn generate(&self, image: &NormalizedImage) -> Result<Embedding>;

    /// Compute embeddings for several images, in order.
    fn generate_batch(&self, images: &[NormalizedImage]) -> Result<Vec<Embedding>> {
        images.iter().map(|image| self.generate(image)).collect()
    }
}

/// Verify a freshly generated embedding has the advertised dimension.
pub(crate) fn check_dimension(embedding: Embedding, expected: usize) -> Result<Embedding> {
    if embedding.dim() != expected {
        return Err(AppError::Model(format!(
            "generator produced {} values, expected {}",
            embedding.dim(),
            expected
        )));
    }
    Ok(embedding)
}

/// Colour-layout features computed directly from pixels.
///
/// Concatenates a per-channel intensity histogram with the mean colour of
/// each cell of a coarse grid. Needs no model files, which makes it the
/// generator used offline and in tests.
#[derive(Debug, Clone)]
pub struct HistogramGenerator {
    bins: usize,
    grid: u32,
}

impl Default for HistogramGenerator {
    fn default() -> Self {
        Self::new(16, 4)
    }
}

impl HistogramGenerator {
    /// Generator with `bins` histogram bins per channel and a `grid x grid` layout.
    pub fn new(bins: usize, grid: u32) -> Self {
        Self {
            bins: bins.clamp(1, 256),
            grid: grid.max(1),
        }
    }
}

impl EmbeddingGenerator for HistogramGenerator {
    fn model_name(&self) -> &str {
        "colour-histogram"
    }

    fn dimension(&self) -> usize {
        self.bins * 3 + (self.grid * self.grid) as usize * 3
    }

    fn generate(&self, image: &NormalizedImage) -> Result<Embedding> {
        let pixels = image.pixels();
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(AppError::InvalidImage("image has no pixels".to_string()));
        }

        let grid = self.grid as usize;
        let mut histogram = vec![0f32; self.bins * 3];
        let mut cell_sums = vec![0f32; grid * grid * 3];
        let mut cell_counts = vec![0u32; grid * grid];

        for (x, y, pixel) in pixels.enumerate_pixels() {
            let cx = (x as usize * grid) / width as usize;
            let cy = (y as usize * grid) / height as usize;
            let cell = cy * grid + cx;
            cell_counts[cell] += 1;
            for c in 0..3 {
                let value = pixel[c] as usize;
                histogram[c * self.bins + value * self.bins / 256] += 1.0;
                cell_sums[cell * 3 + c] += f32::from(pixel[c]) / 255.0;
            }
        }

        let total = (width * height) as f32;
        let mut values = Vec::with_capacity(self.dimension());
        values.extend(histogram.iter().map(|count| count / total));
        for (cell, count) in cell_counts.iter().enumerate() {
            let n = (*count).max(1) as f32;
            values.extend((0..3).map(|c| cell_sums[cell * 3 + c] / n));
        }

        check_dimension(Embedding::new(values), self.dimension())
    }
}

#[cfg(feature = "torch")]
pub use self::torch::TorchGenerator;

#[cfg(feature = "torch")]
mod torch {
    use std::path::Path;
    use std::sync::Mutex;

    use tch::{CModule, Device, Kind, Tensor};

    use super::{check_dimension, EmbeddingGenerator};
    use crate::{
        core::{embedding::Embedding, preprocess::NormalizedImage},
        error::{AppError, Result},
    };

    /// Generator backed by a TorchScript image model.
    ///
    /// The module is expected to return one pooled feature vector per image
    /// (for example a MobileNetV2 backbone with global average pooling,
    /// giving 1280 values).
    pub struct TorchGenerator {
        module: Mutex<CModule>,
        device: Device,
        dimension: usize,
        name: String,
    }

    impl std::fmt::Debug for TorchGenerator {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("TorchGenerator")
                .field("name", &self.name)
                .field("device", &self.device)
                .field("dimension", &self.dimension)
                .finish()
        }
    }

    impl TorchGenerator {
        /// Load a TorchScript module from `path`.
        pub fn load<P: AsRef<Path>>(path: P, dimension: usize) -> Result<Self> {
            let path = path.as_ref();
            let device = Device::cuda_if_available();
            log::info!("Loading TorchScript model from {} on {:?}", path.display(), device);

            let mut module = CModule::load_on_device(path, device)?;
            module.set_eval();

            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("torchscript")
                .to_string();

            Ok(Self {
                module: Mutex::new(module),
                device,
                dimension,
                name,
            })
        }

        fn to_input(&self, image: &NormalizedImage) -> Tensor {
            let (w, h) = (i64::from(image.width()), i64::from(image.height()));
            let tensor = Tensor::of_slice(&image.to_chw())
                .reshape(&[3, h, w])
                .to_kind(Kind::Float);

            // ImageNet statistics
            let mean = Tensor::of_slice(&[0.485f32, 0.456, 0.406]).view([3, 1, 1]);
            let std = Tensor::of_slice(&[0.229f32, 0.224, 0.225]).view([3, 1, 1]);

            ((tensor - &mean) / &std).unsqueeze(0).to(self.device)
        }
    }

    impl EmbeddingGenerator for TorchGenerator {
        fn model_name(&self) -> &str {
            &self.name
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn generate(&self, image: &NormalizedImage) -> Result<Embedding> {
            let input = self.to_input(image);
            let module = self
                .module
                .lock()
                .map_err(|_| AppError::Model("model lock poisoned".to_string()))?;
            let output = tch::no_grad(|| module.forward_ts(&[input]))?;
            let output = output
                .flatten(0, -1)
                .to_kind(Kind::Float)
                .to_device(Device::Cpu);
            let values = Vec::<f32>::try_from(output)?;

            check_dimension(Embedding::new(values), self.dimension)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn solid(r: u8, g: u8, b: u8) -> NormalizedImage {
        let mut buf = RgbImage::new(32, 32);
        for pixel in buf.pixels_mut() {
            *pixel = image::Rgb([r, g, b]);
        }
        NormalizedImage::from_rgb(buf)
    }

    #[test]
    fn test_histogram_dimension() {
        let generator = HistogramGenerator::default();
        assert_eq!(generator.dimension(), 96);
        let embedding = generator.generate(&solid(10, 200, 30)).unwrap();
        assert_eq!(embedding.dim(), 96);
        assert!(!embedding.is_zero());
    }

    #[test]
    fn test_histogram_deterministic() {
        let generator = HistogramGenerator::default();
        let a = generator.generate(&solid(90, 90, 90)).unwrap();
        let b = generator.generate(&solid(90, 90, 90)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_histogram_separates_colours() {
        use crate::core::similarity::cosine_similarity;

        let generator = HistogramGenerator::default();
        let red = generator.generate(&solid(250, 5, 5)).unwrap();
        let red2 = generator.generate(&solid(245, 10, 8)).unwrap();
        let blue = generator.generate(&solid(5, 5, 250)).unwrap();

        let close = cosine_similarity(&red, &red2).unwrap();
        let far = cosine_similarity(&red, &blue).unwrap();
        assert!(close > far, "close={close} far={far}");
    }

    #[test]
    fn test_generate_batch_keeps_order() {
        let generator = HistogramGenerator::new(8, 2);
        let images = vec![solid(0, 0, 0), solid(255, 255, 255)];
        let batch = generator.generate_batch(&images).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], generator.generate(&images[0]).unwrap());
        assert_eq!(batch[1], generator.generate(&images[1]).unwrap());
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(Embedding::new(vec![1.0, 2.0]), 2).is_ok());
        assert!(matches!(
            check_dimension(Embedding::new(vec![1.0]), 2),
            Err(AppError::Model(_))
        ));
    }
}
