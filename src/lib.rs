//! # SN-GAN for CIFAR-10
//!
//! This crate trains residual generative adversarial networks on 32x32 RGB
//! images, with spectrally normalized discriminators, optional class
//! conditioning and a choice of hinge, Wasserstein or standard GAN losses.
//!
//! ## Modules
//!
//! - `model`: Layers, residual blocks, Generator and Discriminator
//! - `training`: Training loop, losses, gradient penalty and monitoring
//! - `data`: Batch sources and CIFAR-10 loading
//! - `eval`: Image generation and Inception Score
//! - `utils`: Configuration and checkpoints

pub mod data;
pub mod error;
pub mod eval;
pub mod model;
pub mod training;
pub mod utils;

pub use data::{BatchSource, ImageLoader};
pub use error::{GanError, Result};
pub use eval::{inception_score, Evaluator, InceptionEvaluator};
pub use model::{Discriminator, Generator, Labels, SnGan};
pub use training::{LossType, Trainer, TrainingMetrics};
pub use utils::{Checkpointer, Config, DirCheckpointer};
