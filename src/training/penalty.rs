//! Gradient penalty on real/fake interpolates
//!
//! `mean((||∇ₓ D(x_mid)||₂ - 1)²)` with `x_mid = ε·x_real + (1-ε)·x_fake`,
//! one `ε ~ U(0, 1)` per sample and the norm taken over channels and pixels.

use tch::{Kind, Tensor};

use crate::error::Result;
use crate::model::{Discriminator, Labels};

/// `ε·x_real + (1-ε)·x_fake`, written so identical inputs come back unchanged
pub fn interpolate(x_real: &Tensor, x_fake: &Tensor, eps: &Tensor) -> Tensor {
    x_fake + eps * (x_real - x_fake)
}

/// Gradient penalty at random interpolates of `x_real` and `x_fake`
///
/// The returned scalar is differentiable with respect to the discriminator
/// parameters, so it can be added to the discriminator loss.
pub fn gradient_penalty(
    discriminator: &mut Discriminator,
    x_real: &Tensor,
    x_fake: &Tensor,
    labels: &Labels,
    train: bool,
) -> Result<Tensor> {
    let batch_size = x_real.size()[0];
    let eps = Tensor::rand([batch_size, 1, 1, 1], (Kind::Float, x_real.device()));
    let x_mid = interpolate(&x_real.detach(), &x_fake.detach(), &eps);
    penalty_at(discriminator, &x_mid, labels, train)
}

/// Gradient penalty at fixed points `x_mid`
pub fn penalty_at(
    discriminator: &mut Discriminator,
    x_mid: &Tensor,
    labels: &Labels,
    train: bool,
) -> Result<Tensor> {
    let x_mid = x_mid.detach().set_requires_grad(true);
    let dis_mid = discriminator.forward_t(&x_mid, labels, train)?;

    let grads = Tensor::run_backward(&[dis_mid.sum(Kind::Float)], &[&x_mid], true, true);
    let norms = grads[0]
        .square()
        .sum_dim_intlist([1i64, 2, 3].as_slice(), false, Kind::Float)
        .sqrt();

    Ok((norms - 1.0).square().mean(Kind::Float))
}
