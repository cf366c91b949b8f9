//! Error types for the SN-GAN library

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, GanError>;

/// Failures raised by the models, losses and trainer configuration
#[derive(Error, Debug)]
pub enum GanError {
    /// Loss name not one of `hinge`, `stdgan`, `wgan`
    #[error("Loss type not implemented: {0}")]
    UnknownLoss(String),

    /// Labels given to an unconditional model or missing for a conditional one
    #[error("Label arity mismatch: model has n_classes={n_classes}, labels {given}")]
    LabelArity { n_classes: i64, given: &'static str },

    /// Input and label batches disagree
    #[error("Batch size mismatch: input has {input}, labels have {labels}")]
    BatchMismatch { input: i64, labels: i64 },

    /// Tensor shape incompatible with a layer
    #[error("Shape mismatch in {layer}: expected {expected}, got {actual}")]
    ShapeMismatch {
        layer: String,
        expected: i64,
        actual: i64,
    },

    /// `sum_gammas` on a model built without gain reparametrization
    #[error("The model is not reparametrized; there are no gammas to sum")]
    NotReparametrized,

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error bubbled up from libtorch
    #[error(transparent)]
    Torch(#[from] tch::TchError),
}
