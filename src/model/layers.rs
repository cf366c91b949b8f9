//! Weight-carrying layers with optional spectral normalization
//!
//! `Conv2d`, `Linear` and `Embedding` own their parameters in a `VarStore`
//! path and, when spectrally normalized, a `SpectralNorm` state whose power
//! iteration vector is updated by every training-mode forward call. That is
//! why the forward methods take `&mut self`.

use tch::{nn, nn::Init, Kind, Tensor};

const EPS: f64 = 1e-12;

/// How a layer's weight is parametrized at forward time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightNorm {
    /// Raw weight
    Plain,
    /// `W / σ(W)`
    Spectral,
    /// `γ · W / σ(W)` with a learnable scalar gain `γ`
    SpectralGamma,
}

impl WeightNorm {
    /// Spectral normalization, with or without gain reparametrization
    pub fn spectral(use_gamma: bool) -> Self {
        if use_gamma {
            WeightNorm::SpectralGamma
        } else {
            WeightNorm::Spectral
        }
    }
}

/// Xavier/Glorot uniform initializer
pub fn xavier_uniform(fan_in: i64, fan_out: i64, gain: f64) -> Init {
    let bound = gain * (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

fn default_bias(fan_in: i64) -> Init {
    let bound = 1.0 / (fan_in as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

fn l2_normalize(x: &Tensor) -> Tensor {
    x / (x.norm() + EPS)
}

/// Largest singular value of `weight` reshaped to `(rows, -1)`
pub fn largest_singular_value(weight: &Tensor) -> f64 {
    let rows = weight.size()[0];
    let matrix = weight.detach().reshape([rows, -1]).to_kind(Kind::Double);
    let (_, s, _) = matrix.svd(true, false);
    s.max().double_value(&[])
}

/// Power-iteration state of one spectrally normalized weight
#[derive(Debug)]
pub struct SpectralNorm {
    /// Left singular vector estimate, `(rows,)`, unit norm
    u: Tensor,
    /// Learnable gain, present under gain reparametrization
    gamma: Option<Tensor>,
    /// σ from the most recent forward call, detached
    sigma: Tensor,
}

impl SpectralNorm {
    /// Register the state for `weight` under `path`
    ///
    /// `u` is stored as a non-trainable variable so it travels with
    /// checkpoints. The gain starts at the largest singular value of the
    /// initial weight, leaving the layer's initial function unchanged.
    pub fn new(path: &nn::Path, weight: &Tensor, use_gamma: bool) -> Self {
        let rows = weight.size()[0];
        let mut u = path.zeros_no_train("weight_u", &[rows]);
        tch::no_grad(|| {
            let init = Tensor::randn([rows], (Kind::Float, path.device()));
            u.copy_(&l2_normalize(&init));
        });

        let gamma = if use_gamma {
            let sigma0 = largest_singular_value(weight);
            Some(path.var("gamma", &[], Init::Const(sigma0)))
        } else {
            None
        };

        Self {
            u,
            gamma,
            sigma: Tensor::ones([], (Kind::Float, path.device())),
        }
    }

    /// Weight to use in the forward computation
    ///
    /// In training mode one power-iteration step updates `u` in place.
    /// σ is differentiable with respect to `weight`; `u` and `v` are not.
    pub fn normalize(&mut self, weight: &Tensor, train: bool) -> Tensor {
        let rows = weight.size()[0];
        let matrix = weight.reshape([rows, -1]);

        let (u, v) = tch::no_grad(|| {
            let w = matrix.detach();
            let v = l2_normalize(&w.transpose(0, 1).mv(&self.u));
            if train {
                let u = l2_normalize(&w.mv(&v));
                self.u.copy_(&u);
            }
            // the stored vector keeps changing, the graph needs a snapshot
            (self.u.copy(), v)
        });

        let sigma = u.dot(&matrix.mv(&v));
        self.sigma = sigma.detach();

        let normalized = weight / sigma;
        match &self.gamma {
            Some(gamma) => normalized * gamma,
            None => normalized,
        }
    }

    /// σ estimated by the last forward call
    pub fn sigma(&self) -> f64 {
        self.sigma.double_value(&[])
    }

    pub fn gamma(&self) -> Option<&Tensor> {
        self.gamma.as_ref()
    }
}

/// A layer that takes part in discriminator regularization and monitoring
pub trait Regularizable {
    /// Dotted layer name, e.g. `block2.shortcut`
    fn name(&self) -> &str;

    /// Learnable spectral gain, if the layer is gain-reparametrized
    fn gamma(&self) -> Option<&Tensor>;

    /// Singular values (descending) of the weight gradient reshaped to
    /// `(out, -1)`; `None` before any backward pass has reached the weight
    fn grad_singular_values(&self) -> Option<Vec<f64>>;
}

fn gradient_spectrum(weight: &Tensor) -> Option<Vec<f64>> {
    let grad = weight.grad();
    if !grad.defined() {
        return None;
    }
    let rows = grad.size()[0];
    let (_, s, _) = tch::no_grad(|| {
        grad.reshape([rows, -1])
            .to_kind(Kind::Double)
            .svd(true, false)
    });
    Vec::<f64>::try_from(&s).ok()
}

fn spectral_state(path: &nn::Path, weight: &Tensor, norm: WeightNorm) -> Option<SpectralNorm> {
    match norm {
        WeightNorm::Plain => None,
        WeightNorm::Spectral => Some(SpectralNorm::new(path, weight, false)),
        WeightNorm::SpectralGamma => Some(SpectralNorm::new(path, weight, true)),
    }
}

/// Convolution hyperparameters
#[derive(Debug, Clone, Copy)]
pub struct ConvSpec {
    pub in_channels: i64,
    pub out_channels: i64,
    pub kernel_size: i64,
    pub padding: i64,
    /// Xavier gain for the weight
    pub gain: f64,
    pub norm: WeightNorm,
}

impl ConvSpec {
    /// 3x3 convolution with padding 1
    pub fn k3(in_channels: i64, out_channels: i64, gain: f64, norm: WeightNorm) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: 3,
            padding: 1,
            gain,
            norm,
        }
    }

    /// 1x1 convolution, Xavier gain 1
    pub fn k1(in_channels: i64, out_channels: i64, norm: WeightNorm) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: 1,
            padding: 0,
            gain: 1.0,
            norm,
        }
    }
}

/// 2D convolution, stride 1
#[derive(Debug)]
pub struct Conv2d {
    name: String,
    weight: Tensor,
    bias: Tensor,
    padding: i64,
    sn: Option<SpectralNorm>,
}

impl Conv2d {
    pub fn new(path: &nn::Path, name: impl Into<String>, spec: ConvSpec) -> Self {
        let k = spec.kernel_size;
        let fan_in = spec.in_channels * k * k;
        let fan_out = spec.out_channels * k * k;

        let weight = path.var(
            "weight",
            &[spec.out_channels, spec.in_channels, k, k],
            xavier_uniform(fan_in, fan_out, spec.gain),
        );
        let bias = path.var("bias", &[spec.out_channels], default_bias(fan_in));
        let sn = spectral_state(path, &weight, spec.norm);

        Self {
            name: name.into(),
            weight,
            bias,
            padding: spec.padding,
            sn,
        }
    }

    pub fn forward_t(&mut self, xs: &Tensor, train: bool) -> Tensor {
        let weight = match &mut self.sn {
            Some(sn) => sn.normalize(&self.weight, train),
            None => self.weight.shallow_clone(),
        };
        xs.conv2d(
            &weight,
            Some(&self.bias),
            [1, 1],
            [self.padding, self.padding],
            [1, 1],
            1,
        )
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }
}

impl Regularizable for Conv2d {
    fn name(&self) -> &str {
        &self.name
    }

    fn gamma(&self) -> Option<&Tensor> {
        self.sn.as_ref().and_then(SpectralNorm::gamma)
    }

    fn grad_singular_values(&self) -> Option<Vec<f64>> {
        gradient_spectrum(&self.weight)
    }
}

/// Fully connected layer
#[derive(Debug)]
pub struct Linear {
    name: String,
    weight: Tensor,
    bias: Option<Tensor>,
    sn: Option<SpectralNorm>,
}

impl Linear {
    /// Xavier-initialized (gain 1) linear layer
    pub fn new(
        path: &nn::Path,
        name: impl Into<String>,
        in_features: i64,
        out_features: i64,
        bias: bool,
        norm: WeightNorm,
    ) -> Self {
        let weight = path.var(
            "weight",
            &[out_features, in_features],
            xavier_uniform(in_features, out_features, 1.0),
        );
        let bias = bias.then(|| path.var("bias", &[out_features], default_bias(in_features)));
        let sn = spectral_state(path, &weight, norm);

        Self {
            name: name.into(),
            weight,
            bias,
            sn,
        }
    }

    pub fn forward_t(&mut self, xs: &Tensor, train: bool) -> Tensor {
        let weight = match &mut self.sn {
            Some(sn) => sn.normalize(&self.weight, train),
            None => self.weight.shallow_clone(),
        };
        xs.linear(&weight, self.bias.as_ref())
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }
}

impl Regularizable for Linear {
    fn name(&self) -> &str {
        &self.name
    }

    fn gamma(&self) -> Option<&Tensor> {
        self.sn.as_ref().and_then(SpectralNorm::gamma)
    }

    fn grad_singular_values(&self) -> Option<Vec<f64>> {
        gradient_spectrum(&self.weight)
    }
}

/// Class embedding table, `(n_classes, dim)`
#[derive(Debug)]
pub struct Embedding {
    weight: Tensor,
    sn: Option<SpectralNorm>,
}

impl Embedding {
    pub fn new(path: &nn::Path, n_classes: i64, dim: i64, norm: WeightNorm) -> Self {
        let weight = path.var(
            "weight",
            &[n_classes, dim],
            xavier_uniform(dim, n_classes, 1.0),
        );
        let sn = spectral_state(path, &weight, norm);
        Self { weight, sn }
    }

    /// Rows of the (normalized) table selected by int64 `labels`
    pub fn forward_t(&mut self, labels: &Tensor, train: bool) -> Tensor {
        let weight = match &mut self.sn {
            Some(sn) => sn.normalize(&self.weight, train),
            None => self.weight.shallow_clone(),
        };
        weight.index_select(0, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device};

    #[test]
    fn test_sigma_converges_to_largest_singular_value() {
        let vs = VarStore::new(Device::Cpu);
        let weight = Tensor::from_slice(&[
            3.0f32, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0,
        ])
        .view([4, 3]);
        let truth = largest_singular_value(&weight);
        let mut sn = SpectralNorm::new(&vs.root(), &weight, false);

        for _ in 0..50 {
            let _ = sn.normalize(&weight, true);
        }

        assert!((sn.sigma() - truth).abs() < 1e-3, "sigma {} vs {}", sn.sigma(), truth);
    }

    #[test]
    fn test_normalized_weight_has_unit_spectral_norm() {
        let vs = VarStore::new(Device::Cpu);
        let weight = Tensor::randn([16, 8, 3, 3], (Kind::Float, Device::Cpu));
        let mut sn = SpectralNorm::new(&vs.root(), &weight, false);

        let mut normalized = sn.normalize(&weight, true);
        for _ in 0..30 {
            normalized = sn.normalize(&weight, true);
        }

        let top = largest_singular_value(&normalized);
        assert!((top - 1.0).abs() < 1e-2, "top singular value {}", top);
    }

    #[test]
    fn test_sigma_is_detached_from_the_graph() {
        let vs = VarStore::new(Device::Cpu);
        let weight = vs.root().randn_standard("w", &[6, 5]);
        let mut sn = SpectralNorm::new(&vs.root(), &weight, false);

        let normalized = sn.normalize(&weight, true);
        assert!(normalized.requires_grad());
        assert!(!sn.sigma.requires_grad());
        assert_eq!(sn.sigma.size(), Vec::<i64>::new());
        assert!(sn.sigma() > 0.0);
    }

    #[test]
    fn test_eval_mode_leaves_u_untouched() {
        let vs = VarStore::new(Device::Cpu);
        let weight = Tensor::randn([6, 5], (Kind::Float, Device::Cpu));
        let mut sn = SpectralNorm::new(&vs.root(), &weight, false);

        let before = sn.u.copy();
        let _ = sn.normalize(&weight, false);
        assert!(sn.u.equal(&before));

        let _ = sn.normalize(&weight, true);
        assert!(!sn.u.equal(&before));
    }

    #[test]
    fn test_gamma_starts_at_initial_sigma() {
        let vs = VarStore::new(Device::Cpu);
        let mut layer = Linear::new(&vs.root(), "dense", 12, 4, false, WeightNorm::SpectralGamma);

        let gamma = layer.gamma().unwrap().double_value(&[]);
        assert!((gamma - largest_singular_value(layer.weight())).abs() < 1e-4);

        // with converged σ the reparametrized weight equals the raw weight
        let x = Tensor::randn([2, 12], (Kind::Float, Device::Cpu));
        let mut y = layer.forward_t(&x, true);
        for _ in 0..50 {
            y = layer.forward_t(&x, true);
        }
        let raw = x.linear::<Tensor>(layer.weight(), None);
        assert!(y.allclose(&raw, 1e-3, 1e-3, false));
    }

    #[test]
    fn test_conv_output_shape() {
        let vs = VarStore::new(Device::Cpu);
        let spec = ConvSpec::k3(3, 8, 1.41, WeightNorm::Spectral);
        let mut conv = Conv2d::new(&vs.root(), "conv", spec);

        let x = Tensor::randn([2, 3, 10, 10], (Kind::Float, Device::Cpu));
        assert_eq!(conv.forward_t(&x, true).size(), vec![2, 8, 10, 10]);

        let spec = ConvSpec::k1(3, 8, WeightNorm::Plain);
        let mut shortcut = Conv2d::new(&(vs.root() / "sc"), "sc", spec);
        assert_eq!(shortcut.forward_t(&x, true).size(), vec![2, 8, 10, 10]);
    }

    #[test]
    fn test_grad_singular_values() {
        let vs = VarStore::new(Device::Cpu);
        let spec = ConvSpec::k3(2, 4, 1.0, WeightNorm::Spectral);
        let mut conv = Conv2d::new(&vs.root(), "block1.conv1", spec);
        assert_eq!(conv.name(), "block1.conv1");
        assert!(conv.grad_singular_values().is_none());

        let x = Tensor::randn([3, 2, 6, 6], (Kind::Float, Device::Cpu));
        conv.forward_t(&x, true).sum(Kind::Float).backward();

        let values = conv.grad_singular_values().unwrap();
        assert_eq!(values.len(), 4);
        assert!(values.windows(2).all(|w| w[0] >= w[1]));
        assert!(values.iter().all(|&v| v >= 0.0));
    }
}
