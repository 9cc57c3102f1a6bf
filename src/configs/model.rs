use serde::{Deserialize, Serialize};

use crate::error::{OrchestraErr, Result};

/// Hyperparameters of the GPT-X layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub dim: usize,
    pub depth: usize,
    pub n_head: usize,
    pub max_seq_len: usize,
}

impl ModelConfig {
    /// Number of layers in the flattened sequence: embedding, `depth` blocks, final norm and head.
    pub fn num_layers(&self) -> usize {
        self.depth + 3
    }

    /// Checks the hyperparameters describe a buildable model.
    ///
    /// # Errors
    /// Returns `OrchestraErr::InvalidConfig` if any dimension is zero or `dim` is not a
    /// multiple of `n_head`.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("vocab_size", self.vocab_size),
            ("dim", self.dim),
            ("depth", self.depth),
            ("n_head", self.n_head),
            ("max_seq_len", self.max_seq_len),
        ];

        if let Some((name, _)) = fields.iter().find(|(_, v)| *v == 0) {
            return Err(OrchestraErr::InvalidConfig(format!(
                "model.{name} must be greater than 0"
            )));
        }

        if self.dim % self.n_head != 0 {
            return Err(OrchestraErr::InvalidConfig(format!(
                "model.dim ({}) must be divisible by model.n_head ({})",
                self.dim, self.n_head
            )));
        }

        Ok(())
    }
}
