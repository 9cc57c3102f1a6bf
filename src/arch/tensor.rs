/// Index of a trainable tensor in the pipeline's tensor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TensorId(pub usize);

/// The kind of sub-module that owns a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Embedding,
    Linear,
    Norm,
}

/// Metadata for one trainable tensor, computed once when the plan is built.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorMeta {
    pub id: TensorId,
    /// Position of the owning layer in the sequence.
    pub layer: usize,
    /// Pipeline stage hosting the owning layer.
    pub stage: usize,
    /// Qualified name, `<layer>.<param>`.
    pub name: String,
    pub owner: ModuleKind,
    pub is_bias: bool,
    pub shape: (usize, usize),
}

impl TensorMeta {
    /// Creates the metadata record for a parameter of layer `layer`.
    ///
    /// `is_bias` is derived from the leaf of `param`, so both `bias` and `ff.bias` are biases.
    pub fn new(
        id: TensorId,
        layer: usize,
        stage: usize,
        param: &str,
        owner: ModuleKind,
        shape: (usize, usize),
    ) -> Self {
        let leaf = param.rsplit('.').next().unwrap_or(param);

        Self {
            id,
            layer,
            stage,
            name: format!("{layer}.{param}"),
            owner,
            is_bias: leaf == "bias",
            shape,
        }
    }

    /// Amount of scalars in the tensor.
    pub fn numel(&self) -> usize {
        self.shape.0 * self.shape.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bias_is_detected_from_the_leaf_name() {
        let nested = TensorMeta::new(TensorId(0), 2, 0, "ff.bias", ModuleKind::Linear, (1, 4));
        let plain = TensorMeta::new(TensorId(1), 5, 1, "bias", ModuleKind::Linear, (1, 4));
        let weight = TensorMeta::new(TensorId(2), 5, 1, "weight", ModuleKind::Linear, (4, 4));
        let lookalike = TensorMeta::new(TensorId(3), 5, 1, "bias_proj", ModuleKind::Linear, (4, 4));

        assert!(nested.is_bias);
        assert!(plain.is_bias);
        assert!(!weight.is_bias);
        assert!(!lookalike.is_bias);
        assert_eq!(nested.name, "2.ff.bias");
        assert_eq!(weight.numel(), 16);
    }
}
