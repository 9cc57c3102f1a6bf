use std::ops::Range;

use ndarray::Array2;

use super::layers::{self, Cache, Signal};
use crate::{
    arch::{LayerKind, TensorMeta},
    configs::OptimizerConfig,
    error::StageErr,
    optimization::{Adam, Optimizer, ParamGroup},
};

/// A layer hosted by a stage, with the range of the stage's tensors it owns.
#[derive(Debug, Clone)]
pub(super) struct StageLayer {
    pub kind: LayerKind,
    pub tensors: Range<usize>,
}

/// One pipeline stage: a contiguous run of layers, their parameters, their accumulated
/// gradients and the optimizer that steps them.
#[derive(Debug)]
pub(super) struct Stage {
    index: usize,
    layers: Vec<StageLayer>,
    params: Vec<Array2<f32>>,
    grads: Vec<Array2<f32>>,
    optimizer: Adam,
}

impl Stage {
    /// Creates a new `Stage`.
    ///
    /// # Arguments
    /// * `index` - The stage's position in the pipeline.
    /// * `layers` - The layers the stage hosts, in sequence order.
    /// * `params` - The initial value of every tensor of the stage.
    /// * `tensors` - The metadata of those tensors, in the same order.
    /// * `optimizer` - The optimizer selected for the run.
    /// * `groups` - The run's parameter groups.
    pub fn new(
        index: usize,
        layers: Vec<StageLayer>,
        params: Vec<Array2<f32>>,
        tensors: &[TensorMeta],
        optimizer: &OptimizerConfig,
        groups: &[ParamGroup],
    ) -> Self {
        let grads = params.iter().map(|p| Array2::zeros(p.dim())).collect();

        Self {
            index,
            layers,
            params,
            grads,
            optimizer: Adam::new(optimizer, tensors, groups),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn params(&self) -> &[Array2<f32>] {
        &self.params
    }

    /// Runs every layer of the stage over `input`.
    ///
    /// # Returns
    /// The stage's output and one cache per layer, or an error if a layer failed or the
    /// output holds non-finite values.
    pub fn forward(&self, input: Signal) -> Result<(Signal, Vec<Cache>), StageErr> {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut signal = input;

        for layer in &self.layers {
            let params = &self.params[layer.tensors.clone()];
            let (out, cache) =
                layers::forward(layer.kind, params, signal).map_err(|reason| self.err(reason))?;

            signal = out;
            caches.push(cache);
        }

        if let Signal::Hidden(x) = &signal {
            if x.iter().any(|v| !v.is_finite()) {
                return Err(self.err("non-finite activations"));
            }
        }

        Ok((signal, caches))
    }

    /// Backpropagates `dy` through the stage, accumulating into its gradients.
    ///
    /// # Returns
    /// The gradient to hand to the previous stage, `None` once the embedding is reached.
    pub fn backward(
        &mut self,
        caches: Vec<Cache>,
        dy: Array2<f32>,
    ) -> Result<Option<Array2<f32>>, StageErr> {
        let index = self.index;
        let mut grad = Some(dy);

        for (layer, cache) in self.layers.iter().zip(caches).rev() {
            let Some(dy) = grad.take() else {
                return Err(StageErr::new(index, "gradient stopped inside the stage"));
            };

            let range = layer.tensors.clone();
            grad = layers::backward(&self.params[range.clone()], &mut self.grads[range], cache, dy)
                .map_err(|reason| StageErr::new(index, reason))?;
        }

        Ok(grad)
    }

    pub fn zero_grad(&mut self) {
        self.grads.iter_mut().for_each(|g| g.fill(0.));
    }

    /// Applies the optimizer to the accumulated gradients.
    pub fn step(&mut self, lr_multiplier: f64) -> Result<(), StageErr> {
        if self.grads.iter().flatten().any(|g| !g.is_finite()) {
            return Err(self.err("non-finite gradients"));
        }

        self.optimizer
            .step(&mut self.params, &self.grads, lr_multiplier)
            .map_err(|e| StageErr::new(self.index, e.to_string()))
    }

    fn err(&self, reason: impl Into<String>) -> StageErr {
        StageErr::new(self.index, reason)
    }
}
