//! Utility module with helper functions
//!
//! This module provides:
//! - Configuration handling
//! - Checkpoint save/load utilities

mod checkpoint;
mod config;

pub use checkpoint::{
    find_latest_checkpoint, load_checkpoint, load_checkpoint_meta, CheckpointMeta, Checkpointer,
    DirCheckpointer, TrainingState,
};
pub use config::{Config, ModelConfig, TrainingConfig};
