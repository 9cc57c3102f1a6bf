//! In-process pipeline runtime. Every stage runs on the calling thread and hands its
//! activations, and later its gradients, to the next stage by value.

mod layers;
mod stage;

use log::debug;
use ndarray::{Array2, ArrayView2, Axis};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

use self::{
    layers::{Cache, Signal},
    stage::{Stage, StageLayer},
};
use super::{Mode, Pipeline, PipelinePlan, StepOutput};
use crate::{
    arch::{ModuleKind, TensorMeta},
    configs::OptimizerConfig,
    data::Batch,
    error::{OrchestraErr, Result, StageErr},
    optimization::ParamGroup,
};

const INIT_STD: f32 = 0.02;

type StepResult<T> = std::result::Result<T, StageErr>;

/// A GPT-X pipeline whose stages run sequentially in the current process.
///
/// Each training step splits the batch into micro-batches, runs forward and backward for
/// each of them through every stage, and then steps every stage's optimizer once.
#[derive(Debug)]
pub struct LocalPipeline {
    stages: Vec<Stage>,
    micro_batches: usize,
    mode: Mode,
}

impl LocalPipeline {
    /// Creates a new `LocalPipeline`.
    ///
    /// Weights are drawn from `N(0, 0.02)`, norm gains start at one and biases at zero. The
    /// draw follows tensor id order, so a seed yields the same model for any stage count.
    ///
    /// # Arguments
    /// * `plan` - The partitioned layer sequence.
    /// * `groups` - The parameter groups covering the plan's tensors.
    /// * `optimizer` - The optimizer every stage steps with.
    /// * `micro_batches` - The amount of micro-batches accumulated per step.
    /// * `seed` - The seed of the parameter initialization.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `micro_batches` is zero.
    pub fn new(
        plan: &PipelinePlan,
        groups: &[ParamGroup],
        optimizer: &OptimizerConfig,
        micro_batches: usize,
        seed: u64,
    ) -> Result<Self> {
        if micro_batches == 0 {
            return Err(OrchestraErr::InvalidConfig(
                "micro batches must be greater than 0".into(),
            ));
        }

        let mut params = init_params(plan.tensors(), seed)?.into_iter();
        let mut stages = Vec::with_capacity(plan.topology().num_stages());

        for assignment in plan.topology().stages() {
            let mut layers = Vec::new();
            let mut tensors = Vec::new();

            for layer in plan.stage_layers(assignment.stage) {
                let start = tensors.len();
                tensors.extend_from_slice(layer.tensors);
                layers.push(StageLayer {
                    kind: layer.desc.kind,
                    tensors: start..tensors.len(),
                });
            }

            let stage_params: Vec<_> = params.by_ref().take(tensors.len()).collect();
            debug!(
                stage = assignment.stage,
                layers = layers.len(),
                tensors = tensors.len(),
                params = stage_params.iter().map(Array2::len).sum::<usize>();
                "stage instantiated"
            );

            stages.push(Stage::new(
                assignment.stage,
                layers,
                stage_params,
                &tensors,
                optimizer,
                groups,
            ));
        }

        Ok(Self {
            stages,
            micro_batches,
            mode: Mode::Train,
        })
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Iterates over every parameter tensor, in tensor id order.
    pub fn parameters(&self) -> impl Iterator<Item = &Array2<f32>> {
        self.stages.iter().flat_map(|stage| stage.params())
    }

    fn last_stage(&self) -> usize {
        self.stages.len().saturating_sub(1)
    }

    fn forward(&self, inputs: Array2<u32>) -> StepResult<(Array2<f32>, Vec<Vec<Cache>>)> {
        let mut signal = Signal::Tokens(inputs);
        let mut caches = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let (out, stage_caches) = stage.forward(signal)?;
            signal = out;
            caches.push(stage_caches);
        }

        match signal {
            Signal::Hidden(logits) => Ok((logits, caches)),
            Signal::Tokens(_) => Err(StageErr::new(self.last_stage(), "pipeline produced no logits")),
        }
    }

    fn backward(&mut self, caches: Vec<Vec<Cache>>, dlogits: Array2<f32>) -> StepResult<()> {
        let mut grad = Some(dlogits);

        for (stage, caches) in self.stages.iter_mut().zip(caches).rev() {
            let Some(dy) = grad.take() else {
                return Err(StageErr::new(stage.index(), "no gradient reached the stage"));
            };
            grad = stage.backward(caches, dy)?;
        }

        Ok(())
    }

    fn loss(&self, logits: &Array2<f32>, labels: ArrayView2<u32>) -> StepResult<(f32, Array2<f32>)> {
        let last = self.last_stage();
        let (loss, grad) =
            layers::cross_entropy(logits, labels).map_err(|reason| StageErr::new(last, reason))?;

        if !loss.is_finite() {
            return Err(StageErr::new(last, "non-finite loss"));
        }

        Ok((loss, grad))
    }
}

impl Pipeline for LocalPipeline {
    fn train_batch(&mut self, batch: &Batch, lr_multiplier: f64) -> StepResult<StepOutput> {
        if self.mode == Mode::Eval {
            return Err(StageErr::new(0, "training step requested in eval mode"));
        }

        let rows = batch.rows();
        if rows == 0 {
            return Err(StageErr::new(0, "empty batch"));
        }

        let chunk = rows.div_ceil(self.micro_batches);
        let n_micro = rows.div_ceil(chunk);
        let scale = 1. / n_micro as f32;

        self.stages.iter_mut().for_each(Stage::zero_grad);

        let mut loss = 0.;
        let mut logits = None;

        let micro = batch
            .inputs
            .axis_chunks_iter(Axis(0), chunk)
            .zip(batch.labels.axis_chunks_iter(Axis(0), chunk));

        for (inputs, labels) in micro {
            let (out, caches) = self.forward(inputs.to_owned())?;
            let (micro_loss, mut dlogits) = self.loss(&out, labels)?;

            dlogits *= scale;
            self.backward(caches, dlogits)?;

            loss += micro_loss * scale;
            logits = Some(out);
        }

        for stage in &mut self.stages {
            stage.step(lr_multiplier)?;
        }

        Ok(StepOutput { logits, loss })
    }

    fn eval_batch(&mut self, batch: &Batch) -> StepResult<f32> {
        if batch.rows() == 0 {
            return Err(StageErr::new(0, "empty batch"));
        }

        let (logits, _) = self.forward(batch.inputs.clone())?;
        let (loss, _) = self.loss(&logits, batch.labels.view())?;
        Ok(loss)
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}

fn init_params(tensors: &[TensorMeta], seed: u64) -> Result<Vec<Array2<f32>>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0., INIT_STD)
        .map_err(|e| OrchestraErr::InvalidConfig(format!("initialization: {e}")))?;

    let params = tensors
        .iter()
        .map(|meta| {
            if meta.is_bias {
                Array2::zeros(meta.shape)
            } else if meta.owner == ModuleKind::Norm {
                Array2::ones(meta.shape)
            } else {
                Array2::from_shape_simple_fn(meta.shape, || normal.sample(&mut rng))
            }
        })
        .collect();

    Ok(params)
}
