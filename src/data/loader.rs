//! In-memory image loader
//!
//! Serves fixed-size batches forever: every pass over the data uses a new
//! random order, and an incomplete trailing batch is dropped.

use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;
use tch::{Device, Kind, Tensor};
use tracing::info;

use super::BatchSource;

/// Infinite, reshuffling loader over images `(N, C, H, W)` and labels `(N,)`
pub struct ImageLoader {
    images: Tensor,
    labels: Tensor,
    n_classes: i64,
    batch_size: usize,
    device: Device,
    order: Vec<i64>,
    position: usize,
    epoch: usize,
    rng: StdRng,
}

impl ImageLoader {
    /// Create a new loader
    ///
    /// # Arguments
    ///
    /// * `images` - Images already scaled to the model's input range
    /// * `labels` - Integer class labels, one per image
    /// * `n_classes` - Number of classes in the dataset
    /// * `batch_size` - Images per batch; at most the dataset size
    /// * `device` - Device the batches are moved to
    pub fn new(
        images: Tensor,
        labels: Tensor,
        n_classes: i64,
        batch_size: usize,
        device: Device,
    ) -> anyhow::Result<Self> {
        let num_samples = images.size()[0];
        if labels.size() != [num_samples] {
            bail!(
                "Expected {} labels, got shape {:?}",
                num_samples,
                labels.size()
            );
        }
        if batch_size == 0 || batch_size as i64 > num_samples {
            bail!(
                "Batch size {} must be in 1..={}",
                batch_size,
                num_samples
            );
        }

        let mut loader = Self {
            images,
            labels: labels.to_kind(Kind::Int64),
            n_classes,
            batch_size,
            device,
            order: (0..num_samples).collect(),
            position: 0,
            epoch: 0,
            rng: StdRng::from_entropy(),
        };
        loader.order.shuffle(&mut loader.rng);
        Ok(loader)
    }

    /// Reseed the shuffling RNG and restart from a fresh order
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.reset();
        self
    }

    /// Keep a random `fraction` of the dataset, at least one batch
    pub fn subsample(mut self, fraction: f64) -> anyhow::Result<Self> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            bail!("Subsample fraction must be in (0, 1], got {}", fraction);
        }
        if fraction == 1.0 {
            return Ok(self);
        }

        let num_samples = self.num_samples();
        let keep = ((num_samples as f64 * fraction).round() as usize).max(self.batch_size);
        self.order.shuffle(&mut self.rng);
        let kept = Tensor::from_slice(&self.order[..keep]);
        self.images = self.images.index_select(0, &kept);
        self.labels = self.labels.index_select(0, &kept);

        info!("Subsampled dataset: kept {} of {} images", keep, num_samples);

        self.order = (0..keep as i64).collect();
        self.reset();
        Ok(self)
    }

    pub fn num_samples(&self) -> usize {
        self.order.len()
    }

    /// Batches per pass over the data
    pub fn num_batches(&self) -> usize {
        self.num_samples() / self.batch_size
    }

    /// Completed passes over the data
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    fn reset(&mut self) {
        self.position = 0;
        self.order.shuffle(&mut self.rng);
    }
}

impl BatchSource for ImageLoader {
    fn next_batch(&mut self) -> anyhow::Result<(Tensor, Option<Tensor>)> {
        if self.position + self.batch_size > self.order.len() {
            self.epoch += 1;
            self.reset();
        }

        let end = self.position + self.batch_size;
        let index = Tensor::from_slice(&self.order[self.position..end]);
        self.position = end;

        let images = self.images.index_select(0, &index).to_device(self.device);
        let labels = self.labels.index_select(0, &index).to_device(self.device);
        Ok((images, Some(labels)))
    }

    fn n_classes(&self) -> i64 {
        self.n_classes
    }
}

/// Load the CIFAR-10 training split from its binary batches directory,
/// with pixels scaled to `[-1, 1]`
pub fn from_cifar_dir(
    path: impl AsRef<Path>,
    batch_size: usize,
    device: Device,
) -> anyhow::Result<ImageLoader> {
    let path = path.as_ref();
    let dataset = tch::vision::cifar::load_dir(path)
        .with_context(|| format!("Failed to load CIFAR-10 from {}", path.display()))?;

    info!(
        "Loaded {} training images ({} classes) from {}",
        dataset.train_images.size()[0],
        dataset.labels,
        path.display()
    );

    let images = dataset.train_images * 2.0 - 1.0;
    ImageLoader::new(images, dataset.train_labels, dataset.labels, batch_size, device)
}
