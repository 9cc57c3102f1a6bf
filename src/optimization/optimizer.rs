use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::Array2;

/// Error returned by an `Optimizer` whenever the gradients don't match the parameters it was
/// built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMismatchErr {
    /// Position of the offending tensor within the stage.
    pub tensor: usize,
}

impl Display for SizeMismatchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "optimizer error: tensor {} doesn't match the shape the optimizer was built for",
            self.tensor
        )
    }
}

impl Error for SizeMismatchErr {}

/// Defines the strategy for updating the parameters of a stage based on its gradients.
pub trait Optimizer {
    /// Updates every tensor of `params` using the matching tensor of `grads`.
    ///
    /// # Arguments
    /// * `params` - The stage's parameters, in tensor id order.
    /// * `grads` - The accumulated gradients, in the same order.
    /// * `lr_multiplier` - The scheduler's multiplier for the configured learning rate.
    ///
    /// # Returns
    /// An error if there's a mismatch between `params`, `grads` and the optimizer's state.
    fn step(
        &mut self,
        params: &mut [Array2<f32>],
        grads: &[Array2<f32>],
        lr_multiplier: f64,
    ) -> Result<(), SizeMismatchErr>;
}
