//! Model module containing the residual SN-GAN architecture
//!
//! This module provides:
//! - Spectrally normalized layers and normalization primitives
//! - Generator and discriminator residual blocks
//! - Generator and Discriminator networks for 32x32 images
//! - Latent and label sampling
//! - `SnGan` wrapper owning both networks and their variable stores

pub mod blocks;
pub mod layers;
pub mod norm;
pub mod sampling;
mod discriminator;
mod gan;
mod generator;

pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use gan::SnGan;
pub use generator::{Generator, GeneratorConfig};
pub use layers::{Regularizable, SpectralNorm, WeightNorm};
pub use sampling::{sample_c, sample_z, Labels, DEFAULT_CLIP, Z_DIM};
