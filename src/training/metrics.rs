//! Training metrics for monitoring GAN progress
//!
//! Loss buffers filled once per outer iteration and drained at every
//! evaluation, plus the history of evaluation records written to CSV.

use serde::{Deserialize, Serialize};

/// One evaluation point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub iteration: usize,
    pub gen_loss: f64,
    pub dis_loss: f64,
    /// Inception score mean and std, absent when no evaluator ran
    pub is_mean: Option<f64>,
    pub is_std: Option<f64>,
}

/// Metrics collected during training
#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    gen_losses: Vec<f64>,
    dis_losses: Vec<f64>,
    /// Evaluation history
    pub evaluations: Vec<EvalRecord>,
}

impl TrainingMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer the last losses of an outer iteration
    pub fn push_losses(&mut self, gen_loss: f64, dis_loss: f64) {
        self.gen_losses.push(gen_loss);
        self.dis_losses.push(dis_loss);
    }

    /// Number of buffered iterations since the last reset
    pub fn buffered(&self) -> usize {
        self.gen_losses.len()
    }

    pub fn mean_gen_loss(&self) -> f64 {
        mean(&self.gen_losses)
    }

    pub fn mean_dis_loss(&self) -> f64 {
        mean(&self.dis_losses)
    }

    pub fn reset_buffers(&mut self) {
        self.gen_losses.clear();
        self.dis_losses.clear();
    }

    pub fn record_evaluation(&mut self, record: EvalRecord) {
        self.evaluations.push(record);
    }

    pub fn latest_evaluation(&self) -> Option<&EvalRecord> {
        self.evaluations.last()
    }

    /// Save evaluation history to CSV file
    pub fn save_csv(&self, path: &str) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.evaluations {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load evaluation history from CSV file
    pub fn load_csv(path: &str) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut metrics = Self::new();
        for record in reader.deserialize() {
            metrics.evaluations.push(record?);
        }
        Ok(metrics)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
