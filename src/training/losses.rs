//! Adversarial loss functions
//!
//! Three interchangeable generator/discriminator objective pairs, selected
//! once per run by name:
//!
//! | name     | generator              | discriminator                                  |
//! |----------|------------------------|------------------------------------------------|
//! | `stdgan` | mean(softplus(-fake))  | mean(softplus(fake)) + mean(softplus(-real))   |
//! | `hinge`  | -mean(fake)            | mean(relu(1 + fake)) + mean(relu(1 - real))    |
//! | `wgan`   | -mean(fake)            | mean(fake) - mean(real)                        |

use std::fmt;
use std::str::FromStr;

use tch::{Kind, Tensor};

use crate::error::GanError;

/// Adversarial objective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossType {
    /// Non-saturating standard GAN loss
    StdGan,
    Hinge,
    /// Wasserstein critic loss
    Wgan,
}

impl FromStr for LossType {
    type Err = GanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdgan" => Ok(LossType::StdGan),
            "hinge" => Ok(LossType::Hinge),
            "wgan" => Ok(LossType::Wgan),
            other => Err(GanError::UnknownLoss(other.to_string())),
        }
    }
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LossType::StdGan => "stdgan",
            LossType::Hinge => "hinge",
            LossType::Wgan => "wgan",
        };
        f.write_str(name)
    }
}

impl LossType {
    /// Generator loss from the discriminator scores of generated samples
    pub fn generator_loss(&self, dis_fake: &Tensor) -> Tensor {
        match self {
            LossType::StdGan => (-dis_fake).softplus().mean(Kind::Float),
            LossType::Hinge | LossType::Wgan => -dis_fake.mean(Kind::Float),
        }
    }

    /// Discriminator loss from the scores of generated and real samples
    pub fn discriminator_loss(&self, dis_fake: &Tensor, dis_real: &Tensor) -> Tensor {
        match self {
            LossType::StdGan => {
                dis_fake.softplus().mean(Kind::Float) + (-dis_real).softplus().mean(Kind::Float)
            }
            LossType::Hinge => {
                (dis_fake + 1.0).relu().mean(Kind::Float)
                    + (-dis_real + 1.0).relu().mean(Kind::Float)
            }
            LossType::Wgan => dis_fake.mean(Kind::Float) - dis_real.mean(Kind::Float),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(values: &[f32]) -> Tensor {
        Tensor::from_slice(values).view([-1, 1])
    }

    #[test]
    fn test_parse_loss_type() {
        assert_eq!("hinge".parse::<LossType>().unwrap(), LossType::Hinge);
        assert_eq!("stdgan".parse::<LossType>().unwrap(), LossType::StdGan);
        assert_eq!("wgan".parse::<LossType>().unwrap(), LossType::Wgan);
        assert_eq!(LossType::Wgan.to_string(), "wgan");

        assert!(matches!(
            "lsgan".parse::<LossType>(),
            Err(GanError::UnknownLoss(name)) if name == "lsgan"
        ));
    }

    #[test]
    fn test_hinge_losses() {
        let gen = LossType::Hinge.generator_loss(&scores(&[2.0, -1.0]));
        assert_eq!(gen.size(), Vec::<i64>::new());
        assert!((gen.double_value(&[]) + 0.5).abs() < 1e-6);

        let dis = LossType::Hinge.discriminator_loss(&scores(&[0.0]), &scores(&[0.0]));
        assert!((dis.double_value(&[]) - 2.0).abs() < 1e-6);

        // confident and correct: both hinge terms vanish
        let dis = LossType::Hinge.discriminator_loss(&scores(&[-3.0]), &scores(&[3.0]));
        assert!(dis.double_value(&[]).abs() < 1e-6);
    }

    #[test]
    fn test_stdgan_losses() {
        let ln2 = std::f64::consts::LN_2;

        let gen = LossType::StdGan.generator_loss(&scores(&[0.0, 0.0]));
        assert!((gen.double_value(&[]) - ln2).abs() < 1e-6);

        let dis = LossType::StdGan.discriminator_loss(&scores(&[0.0]), &scores(&[0.0]));
        assert!((dis.double_value(&[]) - 2.0 * ln2).abs() < 1e-6);

        // perfect discriminator
        let dis = LossType::StdGan.discriminator_loss(&scores(&[-10.0]), &scores(&[10.0]));
        assert!(dis.double_value(&[]) < 1e-3);
    }

    #[test]
    fn test_wgan_losses() {
        let gen = LossType::Wgan.generator_loss(&scores(&[1.0, 3.0]));
        assert!((gen.double_value(&[]) + 2.0).abs() < 1e-6);

        let dis = LossType::Wgan.discriminator_loss(&scores(&[1.0, 3.0]), &scores(&[4.0, 6.0]));
        assert!((dis.double_value(&[]) + 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_losses_are_pure() {
        let fake = scores(&[0.3, -0.7, 1.2]);
        let real = scores(&[0.9, 0.1, -0.4]);
        for loss in [LossType::StdGan, LossType::Hinge, LossType::Wgan] {
            let a = loss.discriminator_loss(&fake, &real);
            let b = loss.discriminator_loss(&fake, &real);
            assert!(a.equal(&b));
        }
    }
}
