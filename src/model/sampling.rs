//! Latent noise and class label sampling
//!
//! The latent prior is a 128-dimensional standard normal, optionally
//! truncated to `[-clip, clip]`. Class labels are uniform over `[0, n_classes)`.

use std::f64::consts::SQRT_2;

use tch::{Device, Kind, Tensor};

use crate::error::{GanError, Result};

/// Size of the latent vector consumed by the generator
pub const Z_DIM: i64 = 128;

/// Default truncation bound for the truncated prior
pub const DEFAULT_CLIP: f64 = 1.5;

/// Class labels attached to a batch
///
/// `Conditional` is only legal for models built with `n_classes > 0`,
/// `Unconditional` only for models built with `n_classes == 0`.
#[derive(Debug)]
pub enum Labels {
    Unconditional,
    Conditional(Tensor),
}

impl Labels {
    /// Label tensor, if any
    pub fn tensor(&self) -> Option<&Tensor> {
        match self {
            Labels::Conditional(y) => Some(y),
            Labels::Unconditional => None,
        }
    }

    /// Cheap copy sharing the same storage
    pub fn shallow_clone(&self) -> Self {
        match self {
            Labels::Conditional(y) => Labels::Conditional(y.shallow_clone()),
            Labels::Unconditional => Labels::Unconditional,
        }
    }

    /// Check the labels against a model's class count and an input batch size
    pub fn check(&self, n_classes: i64, batch_size: i64) -> Result<()> {
        match self {
            Labels::Unconditional if n_classes > 0 => Err(GanError::LabelArity {
                n_classes,
                given: "absent",
            }),
            Labels::Unconditional => Ok(()),
            Labels::Conditional(_) if n_classes == 0 => Err(GanError::LabelArity {
                n_classes,
                given: "present",
            }),
            Labels::Conditional(y) => {
                let size = y.size();
                if size.len() != 1 {
                    return Err(GanError::ShapeMismatch {
                        layer: "labels".to_string(),
                        expected: 1,
                        actual: size.len() as i64,
                    });
                }
                if size[0] != batch_size {
                    return Err(GanError::BatchMismatch {
                        input: batch_size,
                        labels: size[0],
                    });
                }
                Ok(())
            }
        }
    }
}

/// Draw a `(batch_size, 128)` latent batch
///
/// With `truncate` set, samples come from the standard normal restricted to
/// `[-clip, clip]`, drawn by inverting the normal CDF on a uniform sample
/// from `[Φ(-clip), Φ(clip)]`.
pub fn sample_z(batch_size: i64, truncate: bool, clip: f64, device: Device) -> Tensor {
    if !truncate {
        return Tensor::randn([batch_size, Z_DIM], (Kind::Float, device));
    }

    let lo = normal_cdf(-clip);
    let hi = normal_cdf(clip);
    let u = Tensor::rand([batch_size, Z_DIM], (Kind::Float, device)) * (hi - lo) + lo;
    let z = (u * 2.0 - 1.0).erfinv() * SQRT_2;
    // float rounding near the bounds can step just outside
    z.clamp(-clip, clip)
}

/// Draw `batch_size` class labels, or `Unconditional` when `n_classes == 0`
pub fn sample_c(batch_size: i64, n_classes: i64, device: Device) -> Labels {
    if n_classes == 0 {
        Labels::Unconditional
    } else {
        Labels::Conditional(Tensor::randint(
            n_classes,
            [batch_size],
            (Kind::Int64, device),
        ))
    }
}

fn normal_cdf(x: f64) -> f64 {
    let erf = Tensor::from(x / SQRT_2).erf().double_value(&[]);
    0.5 * (1.0 + erf)
}
