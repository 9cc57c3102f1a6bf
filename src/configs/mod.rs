mod model;
mod optimizer;
mod run;

pub use model::ModelConfig;
pub use optimizer::{AdamParams, OptimizerConfig};
pub use run::RunConfig;
