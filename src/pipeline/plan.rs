use log::{debug, info};

use super::{LocalPipeline, Topology};
use crate::{
    arch::{LayerDesc, TensorId, TensorMeta, gptx_layers},
    configs::{ModelConfig, OptimizerConfig},
    error::{OrchestraErr, Result},
    optimization::ParamGroup,
};

/// A layer of the plan together with its placement and its tensors.
#[derive(Debug, Clone, Copy)]
pub struct PlannedLayer<'p> {
    pub index: usize,
    pub stage: usize,
    pub desc: &'p LayerDesc,
    pub tensors: &'p [TensorMeta],
}

/// A layer sequence partitioned into stages, with its tensor table.
///
/// Tensor ids are dense (`0..num_tensors`) and assigned in layer order, so the tensors of a
/// layer, and of a stage, are contiguous.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    layers: Vec<LayerDesc>,
    topology: Topology,
    tensors: Vec<TensorMeta>,
    offsets: Vec<usize>,
}

impl PipelinePlan {
    /// Places `layers` on `topology` and computes the metadata of every tensor.
    ///
    /// # Errors
    /// Returns `OrchestraErr::InvalidTopology` if the topology doesn't cover exactly the
    /// given layers.
    pub fn new(layers: Vec<LayerDesc>, topology: Topology) -> Result<Self> {
        let covered = topology.stages().last().map_or(0, |s| s.layers.end);
        if covered != layers.len() {
            return Err(OrchestraErr::InvalidTopology {
                stages: topology.num_stages(),
                layers: layers.len(),
            });
        }

        let mut tensors = Vec::new();
        let mut offsets = Vec::with_capacity(layers.len() + 1);
        offsets.push(0);

        for assignment in topology.stages() {
            for index in assignment.layers.clone() {
                for param in &layers[index].params {
                    let id = TensorId(tensors.len());
                    tensors.push(TensorMeta::new(
                        id,
                        index,
                        assignment.stage,
                        param.name,
                        param.owner,
                        param.shape,
                    ));
                }
                offsets.push(tensors.len());
            }
        }

        Ok(Self {
            layers,
            topology,
            tensors,
            offsets,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// The full tensor table, ordered by id.
    pub fn tensors(&self) -> &[TensorMeta] {
        &self.tensors
    }

    /// Iterates over the layers in sequence order.
    pub fn layers(&self) -> impl Iterator<Item = PlannedLayer<'_>> {
        self.topology.stages().iter().flat_map(move |assignment| {
            assignment.layers.clone().map(move |index| PlannedLayer {
                index,
                stage: assignment.stage,
                desc: &self.layers[index],
                tensors: &self.tensors[self.offsets[index]..self.offsets[index + 1]],
            })
        })
    }

    /// Iterates over the layers hosted by `stage`.
    pub fn stage_layers(&self, stage: usize) -> impl Iterator<Item = PlannedLayer<'_>> {
        self.layers().filter(move |layer| layer.stage == stage)
    }
}

/// Builds GPT-X pipelines from model hyperparameters and a stage count.
#[derive(Debug, Clone)]
pub struct PipelineAssembler {
    model: ModelConfig,
    num_stages: usize,
    first_worker: usize,
    seed: u64,
}

impl PipelineAssembler {
    /// Creates a new `PipelineAssembler`.
    ///
    /// # Arguments
    /// * `model` - The hyperparameters of the layer stack.
    /// * `num_stages` - The amount of pipeline stages to partition the stack into.
    pub fn new(model: ModelConfig, num_stages: usize) -> Self {
        Self {
            model,
            num_stages,
            first_worker: 0,
            seed: 0,
        }
    }

    /// Sets the rank of the worker hosting stage 0.
    pub fn first_worker(mut self, rank: usize) -> Self {
        self.first_worker = rank;
        self
    }

    /// Sets the seed used to initialize parameters.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builds the layer sequence and partitions it.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for unusable hyperparameters and `InvalidTopology` if the
    /// stage count doesn't fit the layer count.
    pub fn plan(&self) -> Result<PipelinePlan> {
        self.model.validate()?;

        let layers = gptx_layers(&self.model);
        let topology = Topology::new(layers.len(), self.num_stages, self.first_worker)?;

        for assignment in topology.stages() {
            debug!(
                stage = assignment.stage,
                worker = assignment.worker,
                first_layer = assignment.layers.start,
                num_layers = assignment.len();
                "stage assigned"
            );
        }

        let plan = PipelinePlan::new(layers, topology)?;
        info!(
            layers = plan.num_layers(),
            stages = plan.topology().num_stages(),
            tensors = plan.tensors().len();
            "pipeline planned"
        );

        Ok(plan)
    }

    /// Instantiates the in-process runtime for `plan`.
    ///
    /// # Arguments
    /// * `plan` - A plan produced by this assembler.
    /// * `groups` - The parameter groups covering the plan's tensors.
    /// * `optimizer` - The optimizer each stage steps with.
    /// * `micro_batches` - The amount of micro-batches accumulated per step.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the plan's layers can't be instantiated.
    pub fn assemble(
        &self,
        plan: &PipelinePlan,
        groups: &[ParamGroup],
        optimizer: &OptimizerConfig,
        micro_batches: usize,
    ) -> Result<LocalPipeline> {
        LocalPipeline::new(plan, groups, optimizer, micro_batches, self.seed)
    }
}
