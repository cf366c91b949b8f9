//! Generator network for 32x32 RGB images
//!
//! A linear projection of the latent vector to a `(channels, bw, bw)` map,
//! three upsampling residual blocks (4 → 8 → 16 → 32 with the default
//! bottom width), then batch norm, ReLU, a 3x3 convolution to RGB and tanh.

use tch::{nn, nn::ModuleT, Tensor};

use super::blocks::{GeneratorBlock, GeneratorBlockConfig};
use super::layers::{Conv2d, ConvSpec, Linear, WeightNorm};
use super::norm::batch_norm2d;
use super::sampling::{Labels, Z_DIM};
use crate::error::{GanError, Result};

/// Generator network configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Spatial size of the projected latent map
    pub bottom_width: i64,
    /// Channel width of every block
    pub channels: i64,
    /// Number of classes, 0 for an unconditional generator
    pub n_classes: i64,
    /// Spectrally normalize every linear and convolution layer
    pub spectral_norm: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            bottom_width: 4,
            channels: 256,
            n_classes: 0,
            spectral_norm: false,
        }
    }
}

/// Generator network
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    linear: Linear,
    blocks: Vec<GeneratorBlock>,
    bn: nn::BatchNorm,
    conv: Conv2d,
}

impl Generator {
    /// Create a new Generator network
    pub fn new(vs: &nn::Path, config: GeneratorConfig) -> Self {
        let ch = config.channels;
        let bw = config.bottom_width;
        let norm = if config.spectral_norm {
            WeightNorm::Spectral
        } else {
            WeightNorm::Plain
        };

        let linear = Linear::new(&(vs / "linear_1"), "linear_1", Z_DIM, bw * bw * ch, true, norm);

        let blocks = (1..=3)
            .map(|k| {
                let name = format!("block_{}", k);
                let block_config = GeneratorBlockConfig {
                    norm,
                    ..GeneratorBlockConfig::up(ch, ch, config.n_classes)
                };
                GeneratorBlock::new(&(vs / name.as_str()), &name, block_config)
            })
            .collect();

        let bn = batch_norm2d(&(vs / "batchnorm"), ch, true, 2e-5);
        let conv = Conv2d::new(&(vs / "conv"), "conv", ConvSpec::k3(ch, 3, 1.0, norm));

        Self {
            config,
            linear,
            blocks,
            bn,
            conv,
        }
    }

    /// Map latent vectors `(B, 128)` and labels to images `(B, 3, H, W)` in `[-1, 1]`
    ///
    /// # Arguments
    ///
    /// * `z` - Latent batch
    /// * `labels` - Must be `Conditional` with `B` entries iff `n_classes > 0`
    /// * `train` - Batch statistics and power-iteration updates when true
    pub fn forward_t(&mut self, z: &Tensor, labels: &Labels, train: bool) -> Result<Tensor> {
        let size = z.size();
        if size.len() != 2 || size[1] != Z_DIM {
            return Err(GanError::ShapeMismatch {
                layer: "Generator".to_string(),
                expected: Z_DIM,
                actual: size.last().copied().unwrap_or(0),
            });
        }
        let batch_size = size[0];
        labels.check(self.config.n_classes, batch_size)?;

        let bw = self.config.bottom_width;
        let mut x = self
            .linear
            .forward_t(z, train)
            .view([batch_size, -1, bw, bw]);

        for block in self.blocks.iter_mut() {
            x = block.forward_t(&x, labels, train)?;
        }

        let x = self.bn.forward_t(&x, train).relu();
        Ok(self.conv.forward_t(&x, train).tanh())
    }

    /// Spatial size of the generated images
    pub fn image_size(&self) -> i64 {
        self.config.bottom_width * 8
    }

    pub fn n_classes(&self) -> i64 {
        self.config.n_classes
    }

    /// Get configuration
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}
