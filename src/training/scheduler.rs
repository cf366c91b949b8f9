//! Linear learning-rate decay
//!
//! `lr = base_lr · (1 - step / total_steps)`, advanced once per outer
//! iteration, floored at zero. A disabled scheduler keeps `base_lr`.

use serde::{Deserialize, Serialize};
use tch::nn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearDecay {
    base_lr: f64,
    total_steps: usize,
    step: usize,
    enabled: bool,
}

impl LinearDecay {
    pub fn new(base_lr: f64, total_steps: usize, enabled: bool) -> Self {
        Self {
            base_lr,
            total_steps,
            step: 0,
            enabled,
        }
    }

    /// Scheduler positioned at `step`, for resumed runs
    pub fn starting_at(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn multiplier(&self) -> f64 {
        if !self.enabled || self.total_steps == 0 {
            return 1.0;
        }
        (1.0 - self.step as f64 / self.total_steps as f64).max(0.0)
    }

    pub fn current_lr(&self) -> f64 {
        self.base_lr * self.multiplier()
    }

    /// Advance one step and push the new rate into the optimizer
    pub fn step(&mut self, optimizer: &mut nn::Optimizer) {
        self.step += 1;
        optimizer.set_lr(self.current_lr());
    }

    pub fn steps_taken(&self) -> usize {
        self.step
    }
}
