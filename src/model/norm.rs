//! Batch normalization and its class-conditional variant

use tch::{nn, nn::ModuleT, Kind, Tensor};

use super::sampling::Labels;
use crate::error::{GanError, Result};

/// `nn::batch_norm2d` with a chosen epsilon
///
/// `affine = false` drops the learnable scale and shift. When present, the
/// scale starts at one and the shift at zero.
pub fn batch_norm2d(path: &nn::Path, num_features: i64, affine: bool, eps: f64) -> nn::BatchNorm {
    nn::batch_norm2d(
        path,
        num_features,
        nn::BatchNormConfig {
            eps,
            affine,
            ws_init: nn::Init::Const(1.0),
            bs_init: nn::Init::Const(0.0),
            ..Default::default()
        },
    )
}

/// Affine-free batch norm followed by a per-class affine transform
///
/// The embedding row for class `k` holds `[gamma_k | beta_k]`, each of
/// width `num_features`, initialised to ones and zeros so the layer starts
/// as plain normalization.
#[derive(Debug)]
pub struct ConditionalBatchNorm2d {
    bn: nn::BatchNorm,
    embed: Tensor,
    num_features: i64,
    num_classes: i64,
}

impl ConditionalBatchNorm2d {
    pub fn new(path: &nn::Path, num_features: i64, num_classes: i64) -> Self {
        let bn = batch_norm2d(&(path / "bn"), num_features, false, 1e-5);
        let options = (Kind::Float, path.device());
        let init = Tensor::cat(
            &[
                Tensor::ones([num_classes, num_features], options),
                Tensor::zeros([num_classes, num_features], options),
            ],
            1,
        );
        let embed = path.var_copy("embed", &init);

        Self {
            bn,
            embed,
            num_features,
            num_classes,
        }
    }

    pub fn forward_t(&self, xs: &Tensor, labels: &Tensor, train: bool) -> Result<Tensor> {
        let channels = xs.size()[1];
        if channels != self.num_features {
            return Err(GanError::ShapeMismatch {
                layer: "ConditionalBatchNorm2d".to_string(),
                expected: self.num_features,
                actual: channels,
            });
        }

        let out = self.bn.forward_t(xs, train);
        let affine = self.embed.index_select(0, labels).chunk(2, 1);
        let gamma = affine[0].view([-1, self.num_features, 1, 1]);
        let beta = affine[1].view([-1, self.num_features, 1, 1]);
        Ok(out * gamma + beta)
    }

    pub fn num_classes(&self) -> i64 {
        self.num_classes
    }
}

/// Normalization used inside a generator block
#[derive(Debug)]
pub enum BlockNorm {
    Batch(nn::BatchNorm),
    Conditional(ConditionalBatchNorm2d),
}

impl BlockNorm {
    /// Plain batch norm for `n_classes == 0`, conditional otherwise
    pub fn new(path: &nn::Path, num_features: i64, n_classes: i64) -> Self {
        if n_classes == 0 {
            BlockNorm::Batch(batch_norm2d(path, num_features, true, 1e-5))
        } else {
            BlockNorm::Conditional(ConditionalBatchNorm2d::new(path, num_features, n_classes))
        }
    }

    pub fn forward_t(&self, xs: &Tensor, labels: &Labels, train: bool) -> Result<Tensor> {
        match (self, labels) {
            (BlockNorm::Batch(bn), Labels::Unconditional) => Ok(bn.forward_t(xs, train)),
            (BlockNorm::Conditional(cbn), Labels::Conditional(y)) => cbn.forward_t(xs, y, train),
            (BlockNorm::Batch(_), Labels::Conditional(_)) => Err(GanError::LabelArity {
                n_classes: 0,
                given: "present",
            }),
            (BlockNorm::Conditional(cbn), Labels::Unconditional) => Err(GanError::LabelArity {
                n_classes: cbn.num_classes(),
                given: "absent",
            }),
        }
    }
}
