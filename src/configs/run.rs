use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::{ModelConfig, OptimizerConfig};
use crate::error::{OrchestraErr, Result};

/// Everything a pretraining run needs, as read from the JSON config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub model_name: String,
    pub vocab_path: PathBuf,
    pub data_path: PathBuf,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    pub model: ModelConfig,
    pub epoch: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    /// Fraction of the total step budget spent warming up.
    pub warmup_iter: f64,
    pub weight_decay: f32,
    pub num_stages: usize,
    /// Micro-batches accumulated per pipelined step.
    #[serde(default = "default_micro_batches")]
    pub micro_batches: NonZeroUsize,
    /// Fraction of the dataset held out for evaluation.
    #[serde(default = "default_eval_split")]
    pub eval_split: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Rank of the worker that hosts stage 0.
    #[serde(default)]
    pub first_worker: usize,
    #[serde(default)]
    pub do_lower_case: bool,
    pub optimizer: OptimizerConfig,
}

impl RunConfig {
    /// Reads and validates a config file.
    ///
    /// # Errors
    /// Returns `Io` if the file can't be read, `Json` if it doesn't describe a `RunConfig`
    /// (unknown optimizer types included) and `InvalidConfig` if a value is out of range.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parses and validates a config from its JSON text.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every knob is in range.
    ///
    /// # Errors
    /// Returns `OrchestraErr::InvalidConfig` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.optimizer.validate()?;

        if !(0.0..=1.0).contains(&self.warmup_iter) {
            return Err(OrchestraErr::InvalidConfig(format!(
                "warmup_iter must lie in [0, 1], got {}",
                self.warmup_iter
            )));
        }

        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(OrchestraErr::InvalidConfig(format!(
                "weight_decay must be a non-negative number, got {}",
                self.weight_decay
            )));
        }

        if !(self.eval_split > 0.0 && self.eval_split < 1.0) {
            return Err(OrchestraErr::InvalidConfig(format!(
                "eval_split must lie in (0, 1), got {}",
                self.eval_split
            )));
        }

        if self.micro_batches > self.batch_size {
            return Err(OrchestraErr::InvalidConfig(format!(
                "micro_batches ({}) cannot exceed batch_size ({})",
                self.micro_batches, self.batch_size
            )));
        }

        Ok(())
    }
}

fn default_micro_batches() -> NonZeroUsize {
    NonZeroUsize::MIN
}

fn default_eval_split() -> f64 {
    0.1
}

fn default_seed() -> u64 {
    9
}
