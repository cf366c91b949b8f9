//! Data module feeding real image batches to the trainer
//!
//! This module provides:
//! - `BatchSource`, the infinite batch iterator the trainer consumes
//! - `ImageLoader`, an in-memory reshuffling implementation
//! - CIFAR-10 binary directory loading

mod loader;

pub use loader::{from_cifar_dir, ImageLoader};

use tch::Tensor;

/// Infinite source of `(images, labels)` batches
///
/// Images are `(B, 3, H, W)` in `[-1, 1]`; labels, when present, are `(B,)`
/// int64 class indices.
pub trait BatchSource {
    fn next_batch(&mut self) -> anyhow::Result<(Tensor, Option<Tensor>)>;

    /// Number of classes in the underlying dataset
    fn n_classes(&self) -> i64;
}
