//! Training module for SN-GAN
//!
//! This module provides:
//! - Training loop implementation
//! - Adversarial losses and the gradient penalty
//! - Gradient singular-value monitoring
//! - Learning-rate scheduling and metrics

mod losses;
mod metrics;
mod monitor;
mod penalty;
mod scheduler;
mod trainer;

pub use losses::LossType;
pub use metrics::{EvalRecord, TrainingMetrics};
pub use monitor::SingularValueMonitor;
pub use penalty::{gradient_penalty, interpolate, penalty_at};
pub use scheduler::LinearDecay;
pub use trainer::{Trainer, EVAL_INTERVAL, FULL_EVAL_ITER, SV_INTERVAL};
