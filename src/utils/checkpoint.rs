//! Checkpoint save/load utilities
//!
//! A checkpoint is a directory `checkpoint_iter_NNNNNN/` holding both
//! variable stores, a JSON metadata file and the evaluation history.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::SnGan;
use crate::training::{LinearDecay, TrainingMetrics};

const CHECKPOINT_PREFIX: &str = "checkpoint_iter_";

/// Everything the trainer hands over at a checkpoint
pub struct TrainingState<'a> {
    /// Outer iteration just completed
    pub iteration: usize,
    pub gan: &'a SnGan,
    pub metrics: &'a TrainingMetrics,
    pub gen_scheduler: &'a LinearDecay,
    pub dis_scheduler: &'a LinearDecay,
}

/// Persists training state
pub trait Checkpointer {
    fn save_checkpoint(&mut self, state: &TrainingState<'_>) -> anyhow::Result<()>;
}

/// Checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub iteration: usize,
    /// Mean losses of the evaluation window that triggered the checkpoint
    pub gen_loss: f64,
    pub dis_loss: f64,
    pub inception_score: Option<f64>,
    pub gen_lr: f64,
    pub dis_lr: f64,
    /// Timestamp of checkpoint
    pub timestamp: String,
}

/// Writes checkpoints as subdirectories of a root directory
pub struct DirCheckpointer {
    root: PathBuf,
    last_saved: Option<PathBuf>,
}

impl DirCheckpointer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_saved: None,
        }
    }

    pub fn last_saved(&self) -> Option<&Path> {
        self.last_saved.as_deref()
    }
}

impl Checkpointer for DirCheckpointer {
    fn save_checkpoint(&mut self, state: &TrainingState<'_>) -> anyhow::Result<()> {
        let checkpoint_dir = self
            .root
            .join(format!("{}{:06}", CHECKPOINT_PREFIX, state.iteration));
        std::fs::create_dir_all(&checkpoint_dir)?;

        let gen_path = checkpoint_dir.join("generator.ot");
        let dis_path = checkpoint_dir.join("discriminator.ot");
        state.gan.save(&path_str(&gen_path)?, &path_str(&dis_path)?)?;

        let latest = state.metrics.latest_evaluation();
        let meta = CheckpointMeta {
            iteration: state.iteration,
            gen_loss: latest.map_or(0.0, |r| r.gen_loss),
            dis_loss: latest.map_or(0.0, |r| r.dis_loss),
            inception_score: latest.and_then(|r| r.is_mean),
            gen_lr: state.gen_scheduler.current_lr(),
            dis_lr: state.dis_scheduler.current_lr(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)?;
        std::fs::write(checkpoint_dir.join("meta.json"), meta_json)?;

        state
            .metrics
            .save_csv(&path_str(&checkpoint_dir.join("metrics.csv"))?)?;

        tracing::info!("Saved checkpoint to {}", checkpoint_dir.display());
        self.last_saved = Some(checkpoint_dir);
        Ok(())
    }
}

fn path_str(path: &Path) -> anyhow::Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Non UTF-8 path: {}", path.display()))
}

/// Load checkpoint metadata
pub fn load_checkpoint_meta(checkpoint_dir: &Path) -> anyhow::Result<CheckpointMeta> {
    let content = std::fs::read_to_string(checkpoint_dir.join("meta.json"))?;
    let meta: CheckpointMeta = serde_json::from_str(&content)?;
    Ok(meta)
}

/// Load weights into `gan` and return the metadata and evaluation history
pub fn load_checkpoint(
    gan: &mut SnGan,
    checkpoint_dir: &Path,
) -> anyhow::Result<(CheckpointMeta, TrainingMetrics)> {
    let gen_path = checkpoint_dir.join("generator.ot");
    let dis_path = checkpoint_dir.join("discriminator.ot");
    gan.load(&path_str(&gen_path)?, &path_str(&dis_path)?)?;

    let meta = load_checkpoint_meta(checkpoint_dir)?;

    let metrics_path = checkpoint_dir.join("metrics.csv");
    let metrics = if metrics_path.exists() {
        TrainingMetrics::load_csv(&path_str(&metrics_path)?)?
    } else {
        TrainingMetrics::new()
    };

    tracing::info!(
        "Loaded checkpoint from {} (iteration {})",
        checkpoint_dir.display(),
        meta.iteration
    );
    Ok((meta, metrics))
}

/// Find the checkpoint with the highest iteration number in a directory
pub fn find_latest_checkpoint(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name();
            let iteration = name
                .to_str()?
                .strip_prefix(CHECKPOINT_PREFIX)?
                .parse::<usize>()
                .ok()?;
            Some((iteration, e.path()))
        })
        .max_by_key(|(iteration, _)| *iteration)
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiscriminatorConfig, GeneratorConfig};
    use crate::training::EvalRecord;
    use tch::Device;

    fn small_gan() -> SnGan {
        SnGan::new(
            GeneratorConfig {
                channels: 8,
                ..Default::default()
            },
            DiscriminatorConfig {
                channels: 8,
                ..Default::default()
            },
            Device::Cpu,
        )
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let gan = small_gan();
        let mut metrics = TrainingMetrics::new();
        metrics.record_evaluation(EvalRecord {
            iteration: 5000,
            gen_loss: 0.4,
            dis_loss: 1.2,
            is_mean: Some(5.5),
            is_std: Some(0.0),
        });
        let gen_sched = LinearDecay::new(2e-4, 10000, true).starting_at(5000);
        let dis_sched = LinearDecay::new(2e-4, 10000, true).starting_at(5000);

        let mut checkpointer = DirCheckpointer::new(dir.path());
        checkpointer
            .save_checkpoint(&TrainingState {
                iteration: 5000,
                gan: &gan,
                metrics: &metrics,
                gen_scheduler: &gen_sched,
                dis_scheduler: &dis_sched,
            })
            .unwrap();

        let saved = checkpointer.last_saved().unwrap().to_path_buf();
        assert!(saved.ends_with("checkpoint_iter_005000"));

        let mut restored = small_gan();
        let (meta, loaded) = load_checkpoint(&mut restored, &saved).unwrap();
        assert_eq!(meta.iteration, 5000);
        assert_eq!(meta.inception_score, Some(5.5));
        assert!((meta.gen_lr - 1e-4).abs() < 1e-12);
        assert_eq!(loaded.evaluations, metrics.evaluations);
        assert!((gan.checksum() - restored.checksum()).abs() < 1e-6);
    }

    #[test]
    fn test_find_latest_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_latest_checkpoint(dir.path()).is_none());

        let names = [
            "checkpoint_iter_005000",
            "checkpoint_iter_050000",
            "checkpoint_iter_010000",
            "checkpoint_iter_notanumber",
            "other",
        ];
        for name in names {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }

        let latest = find_latest_checkpoint(dir.path()).unwrap();
        assert!(latest.ends_with("checkpoint_iter_050000"));

        // past six digits the names no longer sort by iteration
        std::fs::create_dir(dir.path().join("checkpoint_iter_1000000")).unwrap();
        std::fs::create_dir(dir.path().join("checkpoint_iter_995000")).unwrap();
        let latest = find_latest_checkpoint(dir.path()).unwrap();
        assert!(latest.ends_with("checkpoint_iter_1000000"));
        assert!(find_latest_checkpoint(&dir.path().join("missing")).is_none());
    }
}
