use serde::{Deserialize, Serialize};

use crate::error::{OrchestraErr, Result};

/// The optimizer selected for the run.
///
/// Deserializes from `{"type": "cpu_adam" | "adam", "params": {...}}`. Any other tag fails
/// while parsing the config, before a pipeline is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum OptimizerConfig {
    /// Adam with its per-tensor updates spread over the rayon pool.
    CpuAdam(AdamParams),
    /// Adam with a single fused pass over every tensor of the stage.
    #[serde(rename = "adam")]
    FusedAdam(AdamParams),
}

impl OptimizerConfig {
    pub fn params(&self) -> &AdamParams {
        match self {
            Self::CpuAdam(params) | Self::FusedAdam(params) => params,
        }
    }

    /// Returns a stable identifier for the optimizer kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CpuAdam(_) => "cpu_adam",
            Self::FusedAdam(_) => "adam",
        }
    }

    /// Checks the hyperparameters are usable.
    ///
    /// # Errors
    /// Returns `OrchestraErr::InvalidConfig` naming the offending hyperparameter.
    pub fn validate(&self) -> Result<()> {
        let p = self.params();

        if !(p.lr.is_finite() && p.lr > 0.0) {
            return Err(invalid(format!("optimizer.params.lr must be positive, got {}", p.lr)));
        }

        let (b1, b2) = p.betas;
        if !((0.0..1.0).contains(&b1) && (0.0..1.0).contains(&b2)) {
            return Err(invalid(format!(
                "optimizer.params.betas must lie in [0, 1), got ({b1}, {b2})"
            )));
        }

        if !(p.eps.is_finite() && p.eps > 0.0) {
            return Err(invalid(format!(
                "optimizer.params.eps must be positive, got {}",
                p.eps
            )));
        }

        Ok(())
    }
}

fn invalid(msg: String) -> OrchestraErr {
    OrchestraErr::InvalidConfig(msg)
}

/// Adam hyperparameters. Weight decay is not set here: it comes from each parameter group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdamParams {
    pub lr: f32,
    #[serde(default = "default_betas")]
    pub betas: (f32, f32),
    #[serde(default = "default_eps")]
    pub eps: f32,
    /// Decoupled (AdamW) decay when set, classic L2 decay folded into the gradient otherwise.
    #[serde(default = "default_true")]
    pub adam_w_mode: bool,
    #[serde(default = "default_true")]
    pub bias_correction: bool,
}

impl AdamParams {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            betas: default_betas(),
            eps: default_eps(),
            adam_w_mode: true,
            bias_correction: true,
        }
    }
}

fn default_betas() -> (f32, f32) {
    (0.9, 0.999)
}

fn default_eps() -> f32 {
    1e-8
}

fn default_true() -> bool {
    true
}
