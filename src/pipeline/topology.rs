use std::ops::Range;

use crate::error::{OrchestraErr, Result};

/// A contiguous range of layers hosted by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageAssignment {
    pub stage: usize,
    pub layers: Range<usize>,
    pub worker: usize,
}

impl StageAssignment {
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Splits `num_layers` into `num_stages` contiguous ranges whose sizes differ by at most one.
/// The remainder goes to the leading stages.
///
/// # Errors
/// Returns `OrchestraErr::InvalidTopology` if `num_stages` is zero or exceeds `num_layers`.
pub fn partition(num_layers: usize, num_stages: usize) -> Result<Vec<Range<usize>>> {
    if num_stages == 0 || num_stages > num_layers {
        return Err(OrchestraErr::InvalidTopology {
            stages: num_stages,
            layers: num_layers,
        });
    }

    let base = num_layers / num_stages;
    let rem = num_layers % num_stages;

    let mut start = 0;
    let ranges = (0..num_stages)
        .map(|stage| {
            let len = base + usize::from(stage < rem);
            let range = start..start + len;
            start = range.end;
            range
        })
        .collect();

    Ok(ranges)
}

/// Stage → layer range → worker mapping. Pure data, no runtime attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    stages: Vec<StageAssignment>,
}

impl Topology {
    /// Builds the topology for a sequence of `num_layers`, placing stage `i` on worker
    /// `first_worker + i`.
    ///
    /// # Errors
    /// Returns `OrchestraErr::InvalidTopology` if the stage count doesn't fit the layers.
    pub fn new(num_layers: usize, num_stages: usize, first_worker: usize) -> Result<Self> {
        let stages = partition(num_layers, num_stages)?
            .into_iter()
            .enumerate()
            .map(|(stage, layers)| StageAssignment {
                stage,
                layers,
                worker: first_worker + stage,
            })
            .collect();

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[StageAssignment] {
        &self.stages
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Returns the stage hosting `layer`, if it is part of the sequence.
    pub fn stage_of(&self, layer: usize) -> Option<usize> {
        self.stages
            .iter()
            .position(|assignment| assignment.layers.contains(&layer))
    }
}
