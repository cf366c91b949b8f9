//! Configuration management
//!
//! One file, two sections: `[model]` sizes the networks, `[training]` drives
//! the training loop. Missing keys fall back to the CIFAR-10 defaults.

use serde::{Deserialize, Serialize};

use crate::model::{DiscriminatorConfig, GeneratorConfig};
use crate::training::LossType;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model configuration
    pub model: ModelConfig,
    /// Training configuration
    pub training: TrainingConfig,
}

/// Network sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Channel width of the generator blocks
    pub gen_channels: i64,
    /// Channel width of the discriminator blocks
    pub dis_channels: i64,
    /// Spatial size of the generator's projected latent map
    pub bottom_width: i64,
    /// Spectrally normalize the generator too
    pub generator_sn: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            gen_channels: 256,
            dis_channels: 128,
            bottom_width: 4,
            generator_sn: false,
        }
    }
}

/// Training loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Real images per discriminator step
    pub data_batch_size: usize,
    /// Latent samples per generator step
    pub noise_batch_size: i64,
    /// Discriminator steps per outer iteration
    pub dis_iters: usize,
    /// Outer iterations
    pub max_iters: usize,
    /// Fraction of the training set kept by the loader
    pub subsample: f64,
    /// Train class-conditional networks
    pub conditional: bool,
    /// Weight of the squared gain sum
    pub lam1: f64,
    /// Weight of the gradient penalty
    pub lam2: f64,
    /// Accepted for compatibility, unused
    pub lam3: f64,
    /// `hinge`, `stdgan` or `wgan`
    pub loss_type: String,
    /// CIFAR-10 binary batches directory
    pub sn_gan_data_path: String,
    /// Logs, singular-value dumps, metrics and checkpoints go here
    pub results_path: String,
    /// CUDA device index, used when CUDA is available
    pub gpu: usize,
    /// Add `lam1 · (Σ gamma)²` to the discriminator loss
    pub reparametrize: bool,
    /// Add `lam2 · GP` to the discriminator loss
    pub use_gp: bool,
    /// Images generated per Inception Score evaluation
    pub n_is_imgs: i64,
    /// Generation batch size during evaluation
    pub eval_batch_size: i64,
    pub gen_lr: f64,
    pub dis_lr: f64,
    /// Adam beta1
    pub beta1: f64,
    /// Adam beta2
    pub beta2: f64,
    /// Linearly decay both learning rates to zero over `max_iters`
    pub lr_decay: bool,
    /// libtorch RNG seed
    pub seed: Option<i64>,
    pub show_progress: bool,
    /// TorchScript Inception classifier; evaluation is skipped without one
    pub inception_model: Option<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_batch_size: 64,
            noise_batch_size: 128,
            dis_iters: 5,
            max_iters: 50000,
            subsample: 1.0,
            conditional: false,
            lam1: 0.0,
            lam2: 10.0,
            lam3: 0.0,
            loss_type: "hinge".to_string(),
            sn_gan_data_path: "data/cifar-10-batches-bin".to_string(),
            results_path: "results".to_string(),
            gpu: 0,
            reparametrize: false,
            use_gp: false,
            n_is_imgs: 5000,
            eval_batch_size: 100,
            gen_lr: 2e-4,
            dis_lr: 2e-4,
            beta1: 0.0,
            beta2: 0.9,
            lr_decay: true,
            seed: None,
            show_progress: true,
            inception_model: None,
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `.toml` or JSON, picked by extension
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if path.ends_with(".toml") {
            Self::from_toml(path)
        } else {
            Self::from_json(path)
        }
    }

    /// Save as `.toml` or JSON, picked by extension
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        if path.ends_with(".toml") {
            self.save_toml(path)
        } else {
            self.save_json(path)
        }
    }

    /// Get device from configuration
    pub fn get_device(&self) -> tch::Device {
        if tch::Cuda::is_available() {
            tch::Device::Cuda(self.training.gpu)
        } else {
            tch::Device::Cpu
        }
    }

    /// Class count the networks are built with
    pub fn n_classes(&self, dataset_classes: i64) -> i64 {
        if self.training.conditional {
            dataset_classes
        } else {
            0
        }
    }

    pub fn generator_config(&self, n_classes: i64) -> GeneratorConfig {
        GeneratorConfig {
            bottom_width: self.model.bottom_width,
            channels: self.model.gen_channels,
            n_classes,
            spectral_norm: self.model.generator_sn,
        }
    }

    pub fn discriminator_config(&self, n_classes: i64) -> DiscriminatorConfig {
        DiscriminatorConfig {
            channels: self.model.dis_channels,
            n_classes,
            use_gamma: self.training.reparametrize,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let t = &self.training;
        t.loss_type.parse::<LossType>()?;
        if t.data_batch_size == 0 || t.noise_batch_size <= 0 {
            anyhow::bail!("Batch sizes must be > 0");
        }
        if t.dis_iters == 0 {
            anyhow::bail!("dis_iters must be > 0");
        }
        if !(t.subsample > 0.0 && t.subsample <= 1.0) {
            anyhow::bail!("subsample must be in (0, 1], got {}", t.subsample);
        }
        if t.n_is_imgs <= 0 || t.eval_batch_size <= 0 {
            anyhow::bail!("n_is_imgs and eval_batch_size must be > 0");
        }
        if t.gen_lr <= 0.0 || t.dis_lr <= 0.0 {
            anyhow::bail!("Learning rates must be > 0");
        }
        if self.model.gen_channels <= 0
            || self.model.dis_channels <= 0
            || self.model.bottom_width <= 0
        {
            anyhow::bail!("Model sizes must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.training.loss_type, "hinge");
        assert_eq!(config.model.gen_channels, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [training]
            loss_type = "wgan"
            use_gp = true
            conditional = true
            "#,
        )
        .unwrap();

        assert_eq!(config.training.loss_type, "wgan");
        assert!(config.training.use_gp);
        assert_eq!(config.training.dis_iters, 5);
        assert_eq!(config.model.dis_channels, 128);
        assert_eq!(config.n_classes(10), 10);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.training.seed = Some(3);
        config.training.max_iters = 10;

        for name in ["config.toml", "config.json"] {
            let path = dir.path().join(name);
            let path = path.to_str().unwrap();
            config.save(path).unwrap();

            let loaded = Config::load(path).unwrap();
            assert_eq!(loaded.training.seed, Some(3));
            assert_eq!(loaded.training.max_iters, 10);
            assert_eq!(loaded.training.inception_model, None);
        }
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.training.loss_type = "lsgan".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.training.subsample = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.training.dis_iters = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_configs() {
        let mut config = Config::default();
        config.training.reparametrize = true;
        config.model.generator_sn = true;

        assert!(config.discriminator_config(0).use_gamma);
        assert!(config.generator_config(10).spectral_norm);
        assert_eq!(config.generator_config(10).n_classes, 10);
    }
}
