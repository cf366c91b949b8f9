//! SN-GAN wrapper combining Generator and Discriminator
//!
//! Owns one `VarStore` per network so each gets its own optimizer and the
//! discriminator can be frozen during generator updates.

use tch::{nn, nn::OptimizerConfig, nn::VarStore, Device, Kind, Tensor};

use super::discriminator::{Discriminator, DiscriminatorConfig};
use super::generator::{Generator, GeneratorConfig};
use super::sampling::{sample_c, sample_z, DEFAULT_CLIP};
use crate::error::Result;

/// Complete SN-GAN model
pub struct SnGan {
    /// Generator network
    pub generator: Generator,
    /// Discriminator network
    pub discriminator: Discriminator,
    /// Variable store for generator
    pub gen_vs: VarStore,
    /// Variable store for discriminator
    pub dis_vs: VarStore,
    /// Device (CPU/GPU)
    pub device: Device,
}

impl SnGan {
    /// Create a new SN-GAN model
    ///
    /// # Arguments
    ///
    /// * `gen_config` - Generator configuration
    /// * `dis_config` - Discriminator configuration
    /// * `device` - Device to create model on
    pub fn new(
        gen_config: GeneratorConfig,
        dis_config: DiscriminatorConfig,
        device: Device,
    ) -> Self {
        let gen_vs = VarStore::new(device);
        let dis_vs = VarStore::new(device);

        let generator = Generator::new(&gen_vs.root(), gen_config);
        let discriminator = Discriminator::new(&dis_vs.root(), dis_config);

        Self {
            generator,
            discriminator,
            gen_vs,
            dis_vs,
            device,
        }
    }

    /// CIFAR-10 defaults: 256-channel generator, 128-channel discriminator
    pub fn with_defaults(n_classes: i64, use_gamma: bool, device: Device) -> Self {
        let gen_config = GeneratorConfig {
            n_classes,
            ..Default::default()
        };
        let dis_config = DiscriminatorConfig {
            n_classes,
            use_gamma,
            ..Default::default()
        };
        Self::new(gen_config, dis_config, device)
    }

    /// Generate images in eval mode, with labels drawn uniformly when conditional
    pub fn generate(&mut self, num_samples: i64) -> Result<Tensor> {
        let z = sample_z(num_samples, false, DEFAULT_CLIP, self.device);
        let labels = sample_c(num_samples, self.n_classes(), self.device);
        tch::no_grad(|| self.generator.forward_t(&z, &labels, false))
    }

    /// Adam optimizer over the generator parameters
    pub fn gen_optimizer(&self, lr: f64, beta1: f64, beta2: f64) -> Result<nn::Optimizer> {
        Ok(adam(beta1, beta2).build(&self.gen_vs, lr)?)
    }

    /// Adam optimizer over the discriminator parameters
    pub fn dis_optimizer(&self, lr: f64, beta1: f64, beta2: f64) -> Result<nn::Optimizer> {
        Ok(adam(beta1, beta2).build(&self.dis_vs, lr)?)
    }

    /// Stop gradients from reaching discriminator parameters
    pub fn freeze_discriminator(&mut self) {
        self.dis_vs.freeze();
    }

    pub fn unfreeze_discriminator(&mut self) {
        self.dis_vs.unfreeze();
    }

    /// Save model checkpoints
    pub fn save(&self, gen_path: &str, dis_path: &str) -> anyhow::Result<()> {
        self.gen_vs.save(gen_path)?;
        self.dis_vs.save(dis_path)?;
        Ok(())
    }

    /// Load model checkpoints
    pub fn load(&mut self, gen_path: &str, dis_path: &str) -> anyhow::Result<()> {
        self.gen_vs.load(gen_path)?;
        self.dis_vs.load(dis_path)?;
        Ok(())
    }

    pub fn n_classes(&self) -> i64 {
        self.generator.n_classes()
    }

    /// Sum of all trainable parameters of both networks, for quick sanity checks
    pub fn checksum(&self) -> f64 {
        self.gen_vs
            .trainable_variables()
            .iter()
            .chain(self.dis_vs.trainable_variables().iter())
            .map(|t| t.sum(Kind::Double).double_value(&[]))
            .sum()
    }
}

fn adam(beta1: f64, beta2: f64) -> nn::Adam {
    nn::Adam {
        beta1,
        beta2,
        wd: 0.0,
        ..Default::default()
    }
}
