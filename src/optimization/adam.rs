use ndarray::{Array2, Zip};
use rayon::prelude::*;

use super::{Optimizer, ParamGroup, SizeMismatchErr};
use crate::{
    arch::TensorMeta,
    configs::{AdamParams, OptimizerConfig},
};

#[derive(Debug)]
struct Moments {
    weight_decay: f32,
    m: Array2<f32>,
    v: Array2<f32>,
}

/// Adam over the tensors of one stage, with the weight decay of each tensor taken from its
/// parameter group.
#[derive(Debug)]
pub struct Adam {
    params: AdamParams,
    parallel: bool,
    beta1_t: f32,
    beta2_t: f32,
    slots: Vec<Moments>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `config` - The optimizer selected for the run. `cpu_adam` spreads the tensors over
    ///   the rayon pool, `adam` updates them in a single sequential pass.
    /// * `tensors` - The tensors this instance updates, in the order `step` receives them.
    /// * `groups` - The parameter groups; tensors outside every group aren't decayed.
    ///
    /// # Returns
    /// A new `Adam` instance with zeroed moments.
    pub fn new(config: &OptimizerConfig, tensors: &[TensorMeta], groups: &[ParamGroup]) -> Self {
        let slots = tensors
            .iter()
            .map(|meta| Moments {
                weight_decay: groups
                    .iter()
                    .find(|group| group.contains(meta.id))
                    .map_or(0.0, |group| group.weight_decay),
                m: Array2::zeros(meta.shape),
                v: Array2::zeros(meta.shape),
            })
            .collect();

        Self {
            params: *config.params(),
            parallel: matches!(config, OptimizerConfig::CpuAdam(_)),
            beta1_t: 1.,
            beta2_t: 1.,
            slots,
        }
    }

    /// Amount of tensors this instance updates.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Optimizer for Adam {
    fn step(
        &mut self,
        params: &mut [Array2<f32>],
        grads: &[Array2<f32>],
        lr_multiplier: f64,
    ) -> Result<(), SizeMismatchErr> {
        if params.len() != self.slots.len() || grads.len() != self.slots.len() {
            return Err(SizeMismatchErr {
                tensor: params.len().min(grads.len()),
            });
        }

        for (tensor, ((p, g), slot)) in params.iter().zip(grads).zip(&self.slots).enumerate() {
            if p.dim() != g.dim() || p.dim() != slot.m.dim() {
                return Err(SizeMismatchErr { tensor });
            }
        }

        let AdamParams {
            lr,
            betas: (b1, b2),
            eps,
            adam_w_mode,
            bias_correction,
        } = self.params;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let (bc1, bc2) = if bias_correction {
            (1. - self.beta1_t, 1. - self.beta2_t)
        } else {
            (1., 1.)
        };

        let update = Update {
            lr: (lr as f64 * lr_multiplier) as f32,
            b1,
            b2,
            eps,
            adam_w_mode,
            bc1,
            bc2_sqrt: bc2.sqrt(),
        };

        if self.parallel {
            params
                .par_iter_mut()
                .zip(grads.par_iter())
                .zip(self.slots.par_iter_mut())
                .for_each(|((p, g), slot)| update.apply(p, g, slot));
        } else {
            params
                .iter_mut()
                .zip(grads)
                .zip(self.slots.iter_mut())
                .for_each(|((p, g), slot)| update.apply(p, g, slot));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Update {
    lr: f32,
    b1: f32,
    b2: f32,
    eps: f32,
    adam_w_mode: bool,
    bc1: f32,
    bc2_sqrt: f32,
}

impl Update {
    fn apply(&self, p: &mut Array2<f32>, g: &Array2<f32>, slot: &mut Moments) {
        let Self {
            lr,
            b1,
            b2,
            eps,
            adam_w_mode,
            bc1,
            bc2_sqrt,
        } = *self;
        let wd = slot.weight_decay;
        let step_size = lr / bc1;

        Zip::from(p)
            .and(g)
            .and(&mut slot.m)
            .and(&mut slot.v)
            .for_each(|p, &g, m, v| {
                let g = if !adam_w_mode && wd > 0. { g + wd * *p } else { g };

                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g * g;

                if adam_w_mode && wd > 0. {
                    *p -= lr * wd * *p;
                }

                *p -= step_size * *m / (v.sqrt() / bc2_sqrt + eps);
            });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use ndarray::array;

    use super::*;
    use crate::arch::{ModuleKind, TensorId};

    fn meta(id: usize, shape: (usize, usize)) -> TensorMeta {
        TensorMeta::new(TensorId(id), 0, 0, "weight", ModuleKind::Linear, shape)
    }

    fn decay_group(ids: &[usize], weight_decay: f32) -> ParamGroup {
        ParamGroup {
            name: "decay",
            tensors: ids.iter().copied().map(TensorId).collect::<BTreeSet<_>>(),
            weight_decay,
        }
    }

    fn adam(params: AdamParams, parallel: bool, tensors: &[TensorMeta], groups: &[ParamGroup]) -> Adam {
        let config = if parallel {
            OptimizerConfig::CpuAdam(params)
        } else {
            OptimizerConfig::FusedAdam(params)
        };
        Adam::new(&config, tensors, groups)
    }

    #[test]
    fn first_step_moves_by_the_learning_rate() {
        let tensors = [meta(0, (1, 3))];
        let mut opt = adam(AdamParams::new(0.1), false, &tensors, &[]);

        let mut params = [array![[1.0f32, 1.0, 1.0]]];
        let grads = [array![[0.5f32, -2.0, 0.0]]];
        opt.step(&mut params, &grads, 1.0).unwrap();

        // With bias correction the first update is lr * sign(g).
        let expected = [0.9f32, 1.1, 1.0];
        for (p, e) in params[0].iter().zip(expected) {
            assert!((p - e).abs() < 1e-4, "{p} != {e}");
        }
    }

    #[test]
    fn multiplier_scales_the_learning_rate() {
        let tensors = [meta(0, (1, 1))];
        let mut opt = adam(AdamParams::new(0.1), false, &tensors, &[]);

        let mut params = [array![[1.0f32]]];
        opt.step(&mut params, &[array![[1.0f32]]], 0.5).unwrap();
        assert!((params[0][[0, 0]] - 0.95).abs() < 1e-4);

        let mut frozen = adam(AdamParams::new(0.1), false, &tensors, &[]);
        let mut params = [array![[1.0f32]]];
        frozen.step(&mut params, &[array![[1.0f32]]], 0.0).unwrap();
        assert_eq!(params[0][[0, 0]], 1.0);
    }

    #[test]
    fn decoupled_decay_only_hits_grouped_tensors() {
        let tensors = [meta(0, (1, 1)), meta(1, (1, 1))];
        let groups = [decay_group(&[0], 0.5)];
        let mut opt = adam(AdamParams::new(0.1), false, &tensors, &groups);

        let mut params = [array![[2.0f32]], array![[2.0f32]]];
        let grads = [array![[0.0f32]], array![[0.0f32]]];
        opt.step(&mut params, &grads, 1.0).unwrap();

        // p -= lr * wd * p with a zero gradient.
        assert!((params[0][[0, 0]] - 1.9).abs() < 1e-6);
        assert_eq!(params[1][[0, 0]], 2.0);
    }

    #[test]
    fn l2_mode_folds_decay_into_the_gradient() {
        let tensors = [meta(0, (1, 1))];
        let groups = [decay_group(&[0], 0.5)];
        let params_cfg = AdamParams {
            adam_w_mode: false,
            ..AdamParams::new(0.1)
        };
        let mut opt = adam(params_cfg, false, &tensors, &groups);

        let mut params = [array![[2.0f32]]];
        opt.step(&mut params, &[array![[0.0f32]]], 1.0).unwrap();

        // The folded gradient is positive, so the first step is a full lr downwards.
        assert!((params[0][[0, 0]] - 1.9).abs() < 1e-4);
    }

    #[test]
    fn cpu_and_fused_variants_agree() {
        let tensors = [meta(0, (2, 2)), meta(1, (1, 3)), meta(2, (3, 1))];
        let groups = [decay_group(&[0, 2], 0.01)];
        let mut cpu = adam(AdamParams::new(1e-2), true, &tensors, &groups);
        let mut fused = adam(AdamParams::new(1e-2), false, &tensors, &groups);

        let init = || {
            [
                array![[0.1f32, -0.2], [0.3, 0.4]],
                array![[1.0f32, 0.5, -0.5]],
                array![[0.0f32], [2.0], [-1.0]],
            ]
        };
        let grads = [
            array![[0.01f32, 0.2], [-0.3, 0.0]],
            array![[-1.0f32, 0.25, 0.5]],
            array![[0.7f32], [-0.1], [0.05]],
        ];

        let (mut a, mut b) = (init(), init());
        for step in 0..5 {
            let mult = 1.0 - step as f64 * 0.1;
            cpu.step(&mut a, &grads, mult).unwrap();
            fused.step(&mut b, &grads, mult).unwrap();
        }

        assert_eq!(a, b);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let tensors = [meta(0, (1, 2))];
        let mut opt = adam(AdamParams::new(0.1), true, &tensors, &[]);

        let mut params = [array![[1.0f32, 2.0]]];
        let res = opt.step(&mut params, &[array![[1.0f32]]], 1.0);
        assert_eq!(res, Err(SizeMismatchErr { tensor: 0 }));

        let res = opt.step(&mut [], &[], 1.0);
        assert_eq!(res, Err(SizeMismatchErr { tensor: 0 }));
    }
}
