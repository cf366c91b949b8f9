//! Gradient singular-value monitor
//!
//! Accumulates, per named layer, the singular-value spectrum of the weight
//! gradient at every recording step and dumps the whole history as JSON
//! (`{"block1.conv1": [[s0, s1, ...], ...], ...}`).

use std::collections::BTreeMap;
use std::path::Path;

use crate::model::Regularizable;

/// History of gradient spectra keyed by layer name
#[derive(Debug, Clone, Default)]
pub struct SingularValueMonitor {
    history: BTreeMap<String, Vec<Vec<f64>>>,
}

impl SingularValueMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monitor pre-registered with the given layers, so they show up in the
    /// dump even before their first gradient
    pub fn for_layers(layers: &[&dyn Regularizable]) -> Self {
        let mut monitor = Self::new();
        for layer in layers {
            monitor.register(layer.name());
        }
        monitor
    }

    pub fn register(&mut self, name: &str) {
        self.history.entry(name.to_string()).or_default();
    }

    /// Append one spectrum to a layer's history
    pub fn record(&mut self, name: &str, values: Vec<f64>) {
        self.history.entry(name.to_string()).or_default().push(values);
    }

    /// Record the current gradient spectrum of every layer that has a gradient
    ///
    /// Returns the number of layers recorded.
    pub fn record_layers(&mut self, layers: &[&dyn Regularizable]) -> usize {
        let mut recorded = 0;
        for layer in layers {
            if let Some(values) = layer.grad_singular_values() {
                self.record(layer.name(), values);
                recorded += 1;
            }
        }
        recorded
    }

    pub fn history(&self, name: &str) -> Option<&[Vec<f64>]> {
        self.history.get(name).map(Vec::as_slice)
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.history.keys().map(String::as_str)
    }

    /// Overwrite `path` with the full history
    pub fn flush(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_json::to_string(&self.history)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
