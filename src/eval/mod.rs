//! Sample generation and Inception Score
//!
//! The trainer only sees the `Evaluator` trait. `InceptionEvaluator` backs it
//! with a TorchScript Inception classifier exported from any framework, and
//! `inception_score` is the pure score computation over class probabilities.

use std::path::Path;

use anyhow::Context;
use tch::{CModule, Device, Kind, Tensor};
use tracing::info;

use crate::model::{sample_c, sample_z, Generator, DEFAULT_CLIP};

/// Image generation and scoring used by periodic evaluation
pub trait Evaluator {
    /// Generate `n_images` images in batches of `batch_size`
    fn generate_images(
        &mut self,
        generator: &mut Generator,
        n_images: i64,
        batch_size: i64,
    ) -> anyhow::Result<Tensor>;

    /// Inception Score `(mean, std)` over `splits` equal parts of `images`
    fn inception_score(&mut self, images: &Tensor, splits: i64) -> anyhow::Result<(f64, f64)>;
}

/// Generate images with the generator in eval mode and without gradient
///
/// Labels are drawn uniformly for a conditional generator. The result holds
/// exactly `n_images` images, on the CPU.
pub fn generate_images(
    generator: &mut Generator,
    n_images: i64,
    batch_size: i64,
    device: Device,
) -> anyhow::Result<Tensor> {
    anyhow::ensure!(batch_size > 0, "Batch size must be > 0");

    let mut batches = Vec::new();
    let mut remaining = n_images;
    while remaining > 0 {
        let n = remaining.min(batch_size);
        let z = sample_z(n, false, DEFAULT_CLIP, device);
        let labels = sample_c(n, generator.n_classes(), device);
        let images = tch::no_grad(|| generator.forward_t(&z, &labels, false))?;
        batches.push(images.to_device(Device::Cpu));
        remaining -= n;
    }

    if batches.is_empty() {
        let size = generator.image_size();
        return Ok(Tensor::zeros([0, 3, size, size], (Kind::Float, Device::Cpu)));
    }
    Ok(Tensor::cat(&batches, 0))
}

/// Tile images `(N, 3, H, W)` in `[-1, 1]` into one `(3, rows·H, nrow·W)`
/// uint8 image, row-major, padding the last row with black
pub fn image_grid(images: &Tensor, nrow: i64) -> Tensor {
    let size = images.size();
    let (n, c, h, w) = (size[0], size[1], size[2], size[3]);
    let nrow = nrow.clamp(1, n.max(1));
    let rows = (n + nrow - 1) / nrow;

    let pixels = ((images.to_device(Device::Cpu) + 1.0) * 127.5)
        .clamp(0.0, 255.0)
        .to_kind(Kind::Uint8);
    let padding = Tensor::zeros([rows * nrow - n, c, h, w], (Kind::Uint8, Device::Cpu));

    Tensor::cat(&[pixels, padding], 0)
        .view([rows, nrow, c, h, w])
        .permute([2, 0, 3, 1, 4])
        .reshape([c, rows * h, nrow * w])
}

/// Inception Score from class probabilities `(N, K)`
///
/// For each of `splits` contiguous parts: `exp(mean_i KL(p_i || p̄))`.
/// Returns the mean and population standard deviation over parts.
pub fn inception_score(probs: &Tensor, splits: i64) -> (f64, f64) {
    let probs = probs.to_kind(Kind::Double).clamp_min(1e-12);

    let scores: Vec<f64> = probs
        .chunk(splits.max(1), 0)
        .iter()
        .map(|part| {
            let marginal = part.mean_dim([0i64].as_slice(), true, Kind::Double);
            let kl = (part * (part.log() - marginal.log()))
                .sum_dim_intlist([1i64].as_slice(), false, Kind::Double)
                .mean(Kind::Double);
            kl.exp().double_value(&[])
        })
        .collect();

    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Evaluator backed by a TorchScript Inception classifier
///
/// The module must take `(B, 3, 299, 299)` images in `[-1, 1]` and return
/// class logits `(B, K)`.
pub struct InceptionEvaluator {
    model: CModule,
    device: Device,
    batch_size: i64,
}

impl InceptionEvaluator {
    pub fn load(path: impl AsRef<Path>, device: Device) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let model = CModule::load_on_device(path, device)
            .with_context(|| format!("Failed to load Inception model from {}", path.display()))?;
        info!("Loaded Inception model from {}", path.display());

        Ok(Self {
            model,
            device,
            batch_size: 100,
        })
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Softmax class probabilities for `images`, on the CPU
    pub fn predict(&self, images: &Tensor) -> anyhow::Result<Tensor> {
        let n = images.size()[0];
        let mut probs = Vec::new();
        let mut start = 0;
        while start < n {
            let len = self.batch_size.min(n - start);
            let batch = images
                .narrow(0, start, len)
                .to_device(self.device)
                .upsample_bilinear2d([299, 299], false, None::<f64>, None::<f64>);
            let logits = tch::no_grad(|| self.model.forward_ts(&[batch]))?;
            probs.push(logits.softmax(-1, Kind::Float).to_device(Device::Cpu));
            start += len;
        }
        Ok(Tensor::cat(&probs, 0))
    }
}

impl Evaluator for InceptionEvaluator {
    fn generate_images(
        &mut self,
        generator: &mut Generator,
        n_images: i64,
        batch_size: i64,
    ) -> anyhow::Result<Tensor> {
        generate_images(generator, n_images, batch_size, self.device)
    }

    fn inception_score(&mut self, images: &Tensor, splits: i64) -> anyhow::Result<(f64, f64)> {
        let probs = self.predict(images)?;
        Ok(inception_score(&probs, splits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GeneratorConfig;
    use tch::nn::VarStore;

    #[test]
    fn test_uniform_predictions_score_one() {
        let probs = Tensor::full([20, 10], 0.1, (Kind::Float, Device::Cpu));
        let (mean, std) = inception_score(&probs, 1);
        assert!((mean - 1.0).abs() < 1e-6);
        assert!(std.abs() < 1e-9);
    }

    #[test]
    fn test_confident_balanced_predictions_score_class_count() {
        let labels = Tensor::arange(40, (Kind::Int64, Device::Cpu)).remainder(4);
        let probs = labels.one_hot(4).to_kind(Kind::Float);

        let (mean, _) = inception_score(&probs, 1);
        assert!((mean - 4.0).abs() < 1e-4);

        // each split of 10 still covers the classes evenly enough to stay above 1
        let (mean, std) = inception_score(&probs, 4);
        assert!(mean > 1.0);
        assert!(std >= 0.0);
    }

    #[test]
    fn test_image_grid_layout() {
        let images = Tensor::full([5, 3, 2, 2], -1.0, (Kind::Float, Device::Cpu));
        let _ = images.get(1).fill_(1.0);

        let grid = image_grid(&images, 3);
        assert_eq!(grid.size(), vec![3, 4, 6]);
        assert_eq!(grid.kind(), Kind::Uint8);
        // second tile of the first row is white, everything else black
        assert_eq!(grid.int64_value(&[0, 0, 2]), 255);
        assert_eq!(grid.int64_value(&[0, 0, 0]), 0);
        assert_eq!(grid.int64_value(&[2, 3, 5]), 0);
        assert_eq!(image_grid(&images, 5).size(), vec![3, 2, 10]);
    }

    #[test]
    fn test_generate_images_exact_count() {
        let vs = VarStore::new(Device::Cpu);
        let mut gen = Generator::new(
            &vs.root(),
            GeneratorConfig {
                channels: 8,
                n_classes: 10,
                ..Default::default()
            },
        );

        let images = generate_images(&mut gen, 7, 3, Device::Cpu).unwrap();
        assert_eq!(images.size(), vec![7, 3, 32, 32]);
        assert!(!images.requires_grad());

        let empty = generate_images(&mut gen, 0, 3, Device::Cpu).unwrap();
        assert_eq!(empty.size(), vec![0, 3, 32, 32]);
    }
}
