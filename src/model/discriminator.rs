//! Discriminator network for 32x32 RGB images
//!
//! Four spectrally normalized residual blocks (the first one optimized for
//! raw images, the first two downsampling), ReLU, a spatial sum pool and a
//! bias-free linear projection to one score. A conditional discriminator
//! adds the projection term `<embed(y), h>`.

use tch::{nn, Kind, Tensor};

use super::blocks::{DiscriminatorBlock, DiscriminatorBlockConfig};
use super::layers::{Embedding, Linear, Regularizable, WeightNorm};
use super::sampling::Labels;
use crate::error::{GanError, Result};

/// Discriminator network configuration
#[derive(Debug, Clone)]
pub struct DiscriminatorConfig {
    /// Channel width of every block
    pub channels: i64,
    /// Number of classes, 0 for an unconditional discriminator
    pub n_classes: i64,
    /// Learnable spectral gains on every block convolution and the dense layer
    pub use_gamma: bool,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            channels: 128,
            n_classes: 0,
            use_gamma: false,
        }
    }
}

/// Discriminator network
#[derive(Debug)]
pub struct Discriminator {
    config: DiscriminatorConfig,
    blocks: Vec<DiscriminatorBlock>,
    dense: Linear,
    class_embedding: Option<Embedding>,
}

impl Discriminator {
    /// Create a new Discriminator network
    pub fn new(vs: &nn::Path, config: DiscriminatorConfig) -> Self {
        let ch = config.channels;
        let use_gamma = config.use_gamma;

        let block_configs = [
            DiscriminatorBlockConfig::new(3, ch, true).optimized(),
            DiscriminatorBlockConfig::new(ch, ch, true),
            DiscriminatorBlockConfig::new(ch, ch, false),
            DiscriminatorBlockConfig::new(ch, ch, false),
        ];
        let blocks = block_configs
            .into_iter()
            .enumerate()
            .map(|(i, block_config)| {
                let name = format!("block{}", i + 1);
                DiscriminatorBlock::new(
                    &(vs / name.as_str()),
                    &name,
                    block_config.with_gamma(use_gamma),
                )
            })
            .collect();

        let dense = Linear::new(
            &(vs / "dense"),
            "dense",
            ch,
            1,
            false,
            WeightNorm::spectral(use_gamma),
        );

        let class_embedding = (config.n_classes > 0).then(|| {
            Embedding::new(
                &(vs / "class_embedding"),
                config.n_classes,
                ch,
                WeightNorm::Spectral,
            )
        });

        Self {
            config,
            blocks,
            dense,
            class_embedding,
        }
    }

    /// Score images `(B, 3, H, W)`; returns `(B, 1)` unbounded logits
    pub fn forward_t(&mut self, xs: &Tensor, labels: &Labels, train: bool) -> Result<Tensor> {
        labels.check(self.config.n_classes, xs.size()[0])?;

        let mut h = xs.shallow_clone();
        for block in self.blocks.iter_mut() {
            h = block.forward_t(&h, train);
        }
        let h = h.relu().sum_dim_intlist([2i64, 3].as_slice(), false, Kind::Float);

        let output = self.dense.forward_t(&h, train);

        match (labels, self.class_embedding.as_mut()) {
            (Labels::Conditional(y), Some(embedding)) => {
                let label_weights = embedding.forward_t(y, train);
                let projection =
                    (label_weights * &h).sum_dim_intlist([1i64].as_slice(), true, Kind::Float);
                Ok(output + projection)
            }
            _ => Ok(output),
        }
    }

    /// Sum of every spectral gain in the network, as a differentiable scalar
    pub fn sum_gammas(&self) -> Result<Tensor> {
        if !self.config.use_gamma {
            return Err(GanError::NotReparametrized);
        }

        let gammas: Vec<&Tensor> = self
            .regularizable_layers()
            .into_iter()
            .filter_map(|layer| layer.gamma())
            .collect();
        Ok(Tensor::stack(&gammas, 0).sum(Kind::Float))
    }

    /// Block convolutions and shortcuts whose gradient spectra are monitored
    pub fn monitored_layers(&self) -> Vec<&dyn Regularizable> {
        self.blocks.iter().flat_map(|block| block.layers()).collect()
    }

    /// Monitored layers plus the final dense projection
    pub fn regularizable_layers(&self) -> Vec<&dyn Regularizable> {
        let mut layers = self.monitored_layers();
        layers.push(&self.dense);
        layers
    }

    pub fn n_classes(&self) -> i64 {
        self.config.n_classes
    }

    pub fn is_reparametrized(&self) -> bool {
        self.config.use_gamma
    }

    /// Get configuration
    pub fn config(&self) -> &DiscriminatorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device};

    fn small(n_classes: i64, use_gamma: bool) -> DiscriminatorConfig {
        DiscriminatorConfig {
            channels: 16,
            n_classes,
            use_gamma,
        }
    }

    #[test]
    fn test_discriminator_output_shape() {
        let vs = VarStore::new(Device::Cpu);
        let mut disc = Discriminator::new(&vs.root(), small(0, false));

        let input = Tensor::randn([4, 3, 32, 32], (Kind::Float, Device::Cpu));
        let output = disc.forward_t(&input, &Labels::Unconditional, true).unwrap();

        assert_eq!(output.size(), vec![4, 1]);
    }

    #[test]
    fn test_conditional_discriminator() {
        let vs = VarStore::new(Device::Cpu);
        let mut disc = Discriminator::new(&vs.root(), small(10, false));

        let input = Tensor::randn([3, 3, 32, 32], (Kind::Float, Device::Cpu));
        let y = Labels::Conditional(Tensor::from_slice(&[0i64, 4, 9]));
        assert_eq!(disc.forward_t(&input, &y, true).unwrap().size(), vec![3, 1]);

        assert!(matches!(
            disc.forward_t(&input, &Labels::Unconditional, true),
            Err(GanError::LabelArity { .. })
        ));
    }

    #[test]
    fn test_sum_gammas_requires_reparametrization() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&vs.root(), small(0, false));

        assert!(matches!(disc.sum_gammas(), Err(GanError::NotReparametrized)));
    }

    #[test]
    fn test_sum_gammas_matches_tracked_gains() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&vs.root(), small(0, true));

        let expected: f64 = vs
            .variables()
            .iter()
            .filter(|(name, _)| name.ends_with("gamma"))
            .map(|(_, gamma)| gamma.double_value(&[]))
            .sum();
        // 4 blocks x 2 convs, 2 learnable shortcuts, 1 dense
        assert_eq!(disc.regularizable_layers().len(), 11);

        let total = disc.sum_gammas().unwrap();
        assert_eq!(total.size(), Vec::<i64>::new());
        assert!((total.double_value(&[]) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_monitored_layer_names() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&vs.root(), small(0, false));

        let names: Vec<String> = disc
            .monitored_layers()
            .iter()
            .map(|layer| layer.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "block1.conv1",
                "block1.conv2",
                "block1.shortcut",
                "block2.conv1",
                "block2.conv2",
                "block2.shortcut",
                "block3.conv1",
                "block3.conv2",
                "block4.conv1",
                "block4.conv2",
            ]
        );
    }
}
