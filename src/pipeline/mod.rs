//! Pipeline plumbing: the stage topology, the assembled plan and the runtime contract the
//! training and evaluation drivers step through.

mod guard;
mod local;
mod plan;
mod topology;

use ndarray::Array2;

pub use guard::EvalGuard;
pub use local::LocalPipeline;
pub use plan::{PipelineAssembler, PipelinePlan, PlannedLayer};
pub use topology::{StageAssignment, Topology, partition};

use crate::{data::Batch, error::StageErr};

/// Whether the pipeline tracks gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// The result of one pipelined training step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Logits of the last micro-batch, when the runtime exposes them.
    pub logits: Option<Array2<f32>>,
    pub loss: f32,
}

/// An assembled pipeline, as seen by the loop drivers.
///
/// Each call is one atomic pipelined step across every stage: it blocks until all stages
/// have exchanged their activations and gradients.
pub trait Pipeline {
    /// Runs forward, backward and the optimizer update for `batch`, scaling the learning rate
    /// by `lr_multiplier`.
    ///
    /// # Errors
    /// Returns the `StageErr` of the first stage that failed. Gradient state is undefined
    /// afterwards.
    fn train_batch(&mut self, batch: &Batch, lr_multiplier: f64) -> Result<StepOutput, StageErr>;

    /// Runs a forward-only pass for `batch` and returns its loss. Never mutates parameters.
    ///
    /// # Errors
    /// Returns the `StageErr` of the first stage that failed.
    fn eval_batch(&mut self, batch: &Batch) -> Result<f32, StageErr>;

    fn mode(&self) -> Mode;

    fn set_mode(&mut self, mode: Mode);
}

impl<P: Pipeline + ?Sized> Pipeline for &mut P {
    fn train_batch(&mut self, batch: &Batch, lr_multiplier: f64) -> Result<StepOutput, StageErr> {
        (**self).train_batch(batch, lr_multiplier)
    }

    fn eval_batch(&mut self, batch: &Batch) -> Result<f32, StageErr> {
        (**self).eval_batch(batch)
    }

    fn mode(&self) -> Mode {
        (**self).mode()
    }

    fn set_mode(&mut self, mode: Mode) {
        (**self).set_mode(mode)
    }
}
