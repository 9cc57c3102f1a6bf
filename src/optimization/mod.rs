mod adam;
mod optimizer;
mod param_groups;

pub use adam::Adam;
pub use optimizer::{Optimizer, SizeMismatchErr};
pub use param_groups::{
    DECAY, NO_DECAY, ParamGroup, group_parameters, group_tensors, is_decay_exempt,
};
