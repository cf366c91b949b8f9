//! Residual blocks for the generator and discriminator
//!
//! Both blocks compute `residual(x) + shortcut(x)`. The shortcut is the
//! identity unless the channel count changes or the block resamples, in
//! which case it is a learnable 1x1 convolution.
//!
//! Resampling convention: upsampling is nearest-neighbour and exactly
//! doubles H and W (odd sizes included); downsampling is a 2x2 average pool
//! with stride 2 and floors odd sizes (5x5 becomes 2x2).

use tch::Tensor;

use super::layers::{Conv2d, ConvSpec, Regularizable, WeightNorm};
use super::norm::BlockNorm;
use super::sampling::Labels;
use crate::error::Result;

/// Xavier gain of the 3x3 convolutions inside both blocks
const RESIDUAL_GAIN: f64 = 1.41;

fn upsample2x(xs: &Tensor) -> Tensor {
    let size = xs.size();
    xs.upsample_nearest2d([size[2] * 2, size[3] * 2], 2.0, 2.0)
}

fn downsample2x(xs: &Tensor) -> Tensor {
    xs.avg_pool2d([2, 2], [2, 2], [0, 0], false, true, None::<i64>)
}

/// Generator block configuration
#[derive(Debug, Clone, Copy)]
pub struct GeneratorBlockConfig {
    pub in_channels: i64,
    pub out_channels: i64,
    /// Defaults to `out_channels`
    pub hidden_channels: Option<i64>,
    pub upsample: bool,
    /// 0 for an unconditional block
    pub n_classes: i64,
    /// Parametrization of every convolution in the block
    pub norm: WeightNorm,
}

impl GeneratorBlockConfig {
    /// Upsampling block with plain convolutions
    pub fn up(in_channels: i64, out_channels: i64, n_classes: i64) -> Self {
        Self {
            in_channels,
            out_channels,
            hidden_channels: None,
            upsample: true,
            n_classes,
            norm: WeightNorm::Plain,
        }
    }
}

/// Pre-activation residual block with optional 2x upsampling
///
/// Residual: norm → ReLU → [upsample] → conv3x3 → norm → ReLU → conv3x3.
/// Shortcut: [upsample] → conv1x1, when learnable.
#[derive(Debug)]
pub struct GeneratorBlock {
    b1: BlockNorm,
    conv1: Conv2d,
    b2: BlockNorm,
    conv2: Conv2d,
    shortcut: Option<Conv2d>,
    upsample: bool,
    n_classes: i64,
}

impl GeneratorBlock {
    pub fn new(path: &tch::nn::Path, name: &str, config: GeneratorBlockConfig) -> Self {
        let hidden = config.hidden_channels.unwrap_or(config.out_channels);
        let learnable_shortcut = config.in_channels != config.out_channels || config.upsample;

        let b1 = BlockNorm::new(&(path / "b1"), config.in_channels, config.n_classes);
        let conv1 = Conv2d::new(
            &(path / "conv1"),
            format!("{}.conv1", name),
            ConvSpec::k3(config.in_channels, hidden, RESIDUAL_GAIN, config.norm),
        );
        let b2 = BlockNorm::new(&(path / "b2"), hidden, config.n_classes);
        let conv2 = Conv2d::new(
            &(path / "conv2"),
            format!("{}.conv2", name),
            ConvSpec::k3(hidden, config.out_channels, RESIDUAL_GAIN, config.norm),
        );
        let shortcut = learnable_shortcut.then(|| {
            Conv2d::new(
                &(path / "shortcut"),
                format!("{}.shortcut", name),
                ConvSpec::k1(config.in_channels, config.out_channels, config.norm),
            )
        });

        Self {
            b1,
            conv1,
            b2,
            conv2,
            shortcut,
            upsample: config.upsample,
            n_classes: config.n_classes,
        }
    }

    pub fn forward_t(&mut self, xs: &Tensor, labels: &Labels, train: bool) -> Result<Tensor> {
        labels.check(self.n_classes, xs.size()[0])?;

        let r = self.b1.forward_t(xs, labels, train)?.relu();
        let r = if self.upsample { upsample2x(&r) } else { r };
        let r = self.conv1.forward_t(&r, train);
        let r = self.b2.forward_t(&r, labels, train)?.relu();
        let r = self.conv2.forward_t(&r, train);

        let shortcut = match &mut self.shortcut {
            Some(conv) if self.upsample => conv.forward_t(&upsample2x(xs), train),
            Some(conv) => conv.forward_t(xs, train),
            None => xs.shallow_clone(),
        };

        Ok(r + shortcut)
    }

    pub fn has_learnable_shortcut(&self) -> bool {
        self.shortcut.is_some()
    }
}

/// Discriminator block configuration
#[derive(Debug, Clone, Copy)]
pub struct DiscriminatorBlockConfig {
    pub in_channels: i64,
    pub out_channels: i64,
    /// Defaults to `out_channels` for optimized blocks, `in_channels` otherwise
    pub hidden_channels: Option<i64>,
    pub downsample: bool,
    /// First block of the network: no pre-activation on raw images
    pub optimized: bool,
    /// Learnable spectral gains on every convolution
    pub use_gamma: bool,
}

impl DiscriminatorBlockConfig {
    pub fn new(in_channels: i64, out_channels: i64, downsample: bool) -> Self {
        Self {
            in_channels,
            out_channels,
            hidden_channels: None,
            downsample,
            optimized: false,
            use_gamma: false,
        }
    }

    pub fn optimized(mut self) -> Self {
        self.optimized = true;
        self
    }

    pub fn with_gamma(mut self, use_gamma: bool) -> Self {
        self.use_gamma = use_gamma;
        self
    }
}

/// Residual block with spectrally normalized convolutions and optional
/// 2x average-pool downsampling
#[derive(Debug)]
pub struct DiscriminatorBlock {
    conv1: Conv2d,
    conv2: Conv2d,
    shortcut: Option<Conv2d>,
    downsample: bool,
    optimized: bool,
}

impl DiscriminatorBlock {
    pub fn new(path: &tch::nn::Path, name: &str, config: DiscriminatorBlockConfig) -> Self {
        let hidden = config.hidden_channels.unwrap_or(if config.optimized {
            config.out_channels
        } else {
            config.in_channels
        });
        let learnable_shortcut = config.in_channels != config.out_channels || config.downsample;
        let norm = WeightNorm::spectral(config.use_gamma);

        let conv1 = Conv2d::new(
            &(path / "conv1"),
            format!("{}.conv1", name),
            ConvSpec::k3(config.in_channels, hidden, RESIDUAL_GAIN, norm),
        );
        let conv2 = Conv2d::new(
            &(path / "conv2"),
            format!("{}.conv2", name),
            ConvSpec::k3(hidden, config.out_channels, RESIDUAL_GAIN, norm),
        );
        let shortcut = learnable_shortcut.then(|| {
            Conv2d::new(
                &(path / "shortcut"),
                format!("{}.shortcut", name),
                ConvSpec::k1(config.in_channels, config.out_channels, norm),
            )
        });

        Self {
            conv1,
            conv2,
            shortcut,
            downsample: config.downsample,
            optimized: config.optimized,
        }
    }

    pub fn forward_t(&mut self, xs: &Tensor, train: bool) -> Tensor {
        let r = if self.optimized {
            xs.shallow_clone()
        } else {
            xs.relu()
        };
        let r = self.conv1.forward_t(&r, train).relu();
        let r = self.conv2.forward_t(&r, train);
        let r = if self.downsample { downsample2x(&r) } else { r };

        let shortcut = match &mut self.shortcut {
            Some(conv) => {
                let s = conv.forward_t(xs, train);
                if self.downsample {
                    downsample2x(&s)
                } else {
                    s
                }
            }
            None => xs.shallow_clone(),
        };

        r + shortcut
    }

    /// conv1, conv2 and the learnable shortcut, in that order
    pub fn layers(&self) -> Vec<&dyn Regularizable> {
        let mut layers: Vec<&dyn Regularizable> = vec![&self.conv1, &self.conv2];
        if let Some(shortcut) = &self.shortcut {
            layers.push(shortcut);
        }
        layers
    }

    pub fn has_learnable_shortcut(&self) -> bool {
        self.shortcut.is_some()
    }
}
