use std::collections::{BTreeSet, HashMap};

use log::info;

use crate::{
    arch::{ModuleKind, TensorId, TensorMeta},
    error::{OrchestraErr, Result},
    pipeline::PipelinePlan,
};

pub const DECAY: &str = "decay";
pub const NO_DECAY: &str = "no_decay";

/// A bucket of tensors sharing one weight decay coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroup {
    pub name: &'static str,
    pub tensors: BTreeSet<TensorId>,
    pub weight_decay: f32,
}

impl ParamGroup {
    fn new(name: &'static str, weight_decay: f32) -> Self {
        Self {
            name,
            tensors: BTreeSet::new(),
            weight_decay,
        }
    }

    pub fn contains(&self, id: TensorId) -> bool {
        self.tensors.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// Whether `meta` is exempt from weight decay: biases and anything a norm owns.
pub fn is_decay_exempt(meta: &TensorMeta) -> bool {
    meta.is_bias || meta.owner == ModuleKind::Norm
}

/// Groups every tensor of `plan` for the optimizer.
///
/// # Errors
/// Returns `OrchestraErr::Grouping` if the layer walk doesn't account for every tensor of the
/// plan exactly once, and `InvalidConfig` for a negative or non-finite `weight_decay`.
pub fn group_parameters(plan: &PipelinePlan, weight_decay: f32) -> Result<Vec<ParamGroup>> {
    let walk = plan.layers().flat_map(|layer| layer.tensors.iter());
    let groups = group_tensors(walk, plan.tensors(), weight_decay)?;

    for group in &groups {
        info!(
            group = group.name,
            tensors = group.len(),
            weight_decay = group.weight_decay;
            "parameter group built"
        );
    }

    Ok(groups)
}

/// Groups the tensors met while walking the layers and checks the result against `table`,
/// the full set of trainable tensors.
///
/// With `weight_decay == 0.0` a single `no_decay` group holds everything. Otherwise biases and
/// norm-owned tensors go to `no_decay` and the rest to `decay`.
///
/// # Errors
/// Returns `OrchestraErr::Grouping` naming the first tensor of `table` that was grouped zero
/// or several times, or the first walked tensor that isn't in `table`.
pub fn group_tensors<'a, I>(
    walk: I,
    table: &[TensorMeta],
    weight_decay: f32,
) -> Result<Vec<ParamGroup>>
where
    I: IntoIterator<Item = &'a TensorMeta>,
{
    if !(weight_decay.is_finite() && weight_decay >= 0.0) {
        return Err(OrchestraErr::InvalidConfig(format!(
            "weight decay must be a non-negative number, got {weight_decay}"
        )));
    }

    let mut decay = ParamGroup::new(DECAY, weight_decay);
    let mut no_decay = ParamGroup::new(NO_DECAY, 0.0);
    let mut occurrences: HashMap<TensorId, (usize, &TensorMeta)> = HashMap::new();

    for meta in walk {
        occurrences.entry(meta.id).or_insert((0, meta)).0 += 1;

        if weight_decay == 0.0 || is_decay_exempt(meta) {
            no_decay.tensors.insert(meta.id);
        } else {
            decay.tensors.insert(meta.id);
        }
    }

    for meta in table {
        let seen = occurrences.remove(&meta.id).map_or(0, |(n, _)| n);
        if seen != 1 {
            return Err(grouping_err(meta, seen, 1));
        }
    }

    if let Some((seen, meta)) = occurrences.into_values().min_by_key(|(_, meta)| meta.id) {
        return Err(grouping_err(meta, seen, 0));
    }

    if weight_decay == 0.0 {
        return Ok(vec![no_decay]);
    }

    Ok(vec![decay, no_decay])
}

fn grouping_err(meta: &TensorMeta, occurrences: usize, expected: usize) -> OrchestraErr {
    OrchestraErr::Grouping {
        tensor: meta.name.clone(),
        layer: meta.layer,
        stage: meta.stage,
        occurrences,
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{configs::ModelConfig, pipeline::PipelineAssembler};

    fn plan() -> PipelinePlan {
        let model = ModelConfig {
            vocab_size: 16,
            dim: 4,
            depth: 3,
            n_head: 2,
            max_seq_len: 8,
        };
        PipelineAssembler::new(model, 2).plan().unwrap()
    }

    fn all_ids(plan: &PipelinePlan) -> BTreeSet<TensorId> {
        plan.tensors().iter().map(|t| t.id).collect()
    }

    #[test]
    fn zero_decay_yields_a_single_group_with_everything() {
        let plan = plan();
        let groups = group_parameters(&plan, 0.0).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, NO_DECAY);
        assert_eq!(groups[0].weight_decay, 0.0);
        assert_eq!(groups[0].tensors, all_ids(&plan));
    }

    #[test]
    fn positive_decay_partitions_the_tensors() {
        let plan = plan();
        let groups = group_parameters(&plan, 0.01).unwrap();

        assert_eq!(groups.len(), 2);
        let (decay, no_decay) = (&groups[0], &groups[1]);
        assert_eq!(decay.weight_decay, 0.01);
        assert_eq!(no_decay.weight_decay, 0.0);

        assert!(decay.tensors.is_disjoint(&no_decay.tensors));
        let union: BTreeSet<_> = decay.tensors.union(&no_decay.tensors).copied().collect();
        assert_eq!(union, all_ids(&plan));
    }

    #[test]
    fn biases_and_norms_are_never_decayed() {
        let plan = plan();
        let groups = group_parameters(&plan, 0.1).unwrap();
        let no_decay = &groups[1];

        for meta in plan.tensors() {
            let exempt = meta.is_bias || meta.owner == ModuleKind::Norm;
            assert_eq!(no_decay.contains(meta.id), exempt, "{}", meta.name);
        }

        // Norm gains are exempt even though they are not named `bias`.
        let gain = plan
            .tensors()
            .iter()
            .find(|t| t.name.ends_with("norm.weight"))
            .unwrap();
        assert!(no_decay.contains(gain.id));
    }

    #[test]
    fn a_tensor_missing_from_the_walk_is_fatal() {
        let plan = plan();
        let walk = plan.tensors().iter().filter(|t| t.id != TensorId(3));

        let err = group_tensors(walk, plan.tensors(), 0.1).unwrap_err();
        assert!(matches!(
            err,
            OrchestraErr::Grouping { occurrences: 0, expected: 1, .. }
        ));
    }

    #[test]
    fn a_tensor_walked_twice_is_fatal() {
        let plan = plan();
        let tensors = plan.tensors();
        let walk = tensors.iter().chain(std::iter::once(&tensors[5]));

        let err = group_tensors(walk, tensors, 0.1).unwrap_err();
        let OrchestraErr::Grouping {
            tensor,
            occurrences,
            ..
        } = err
        else {
            panic!("expected a grouping error, got {err:?}");
        };
        assert_eq!(tensor, tensors[5].name);
        assert_eq!(occurrences, 2);
    }

    #[test]
    fn a_tensor_outside_the_table_is_fatal() {
        let plan = plan();
        let (table, stray) = plan.tensors().split_at(plan.tensors().len() - 1);

        let err = group_tensors(plan.tensors(), table, 0.0).unwrap_err();
        let OrchestraErr::Grouping {
            tensor, expected, ..
        } = err
        else {
            panic!("expected a grouping error, got {err:?}");
        };
        assert_eq!(tensor, stray[0].name);
        assert_eq!(expected, 0);
    }

    #[test]
    fn negative_decay_is_rejected() {
        let plan = plan();
        assert!(matches!(
            group_parameters(&plan, -0.1),
            Err(OrchestraErr::InvalidConfig(_))
        ));
    }
}
