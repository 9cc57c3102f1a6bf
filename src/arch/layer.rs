use super::ModuleKind;
use crate::configs::ModelConfig;

/// The kinds of layers a GPT-X sequence is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Token and positional embeddings.
    Embedding,
    /// Pre-norm residual block.
    Block,
    /// Final normalization.
    LayerNorm,
    /// Projection to vocabulary logits.
    Head,
}

/// A trainable tensor declared by a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamDesc {
    pub name: &'static str,
    pub owner: ModuleKind,
    pub shape: (usize, usize),
}

impl ParamDesc {
    const fn new(name: &'static str, owner: ModuleKind, shape: (usize, usize)) -> Self {
        Self { name, owner, shape }
    }
}

/// An opaque layer of the sequence: its kind and the tensors it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDesc {
    pub kind: LayerKind,
    pub params: Vec<ParamDesc>,
}

impl LayerDesc {
    pub fn embedding(vocab_size: usize, max_seq_len: usize, dim: usize) -> Self {
        Self {
            kind: LayerKind::Embedding,
            params: vec![
                ParamDesc::new("tok.weight", ModuleKind::Embedding, (vocab_size, dim)),
                ParamDesc::new("pos.weight", ModuleKind::Embedding, (max_seq_len, dim)),
            ],
        }
    }

    pub fn block(dim: usize) -> Self {
        Self {
            kind: LayerKind::Block,
            params: vec![
                ParamDesc::new("norm.weight", ModuleKind::Norm, (1, dim)),
                ParamDesc::new("norm.bias", ModuleKind::Norm, (1, dim)),
                ParamDesc::new("ff.weight", ModuleKind::Linear, (dim, dim)),
                ParamDesc::new("ff.bias", ModuleKind::Linear, (1, dim)),
            ],
        }
    }

    pub fn layer_norm(dim: usize) -> Self {
        Self {
            kind: LayerKind::LayerNorm,
            params: vec![
                ParamDesc::new("weight", ModuleKind::Norm, (1, dim)),
                ParamDesc::new("bias", ModuleKind::Norm, (1, dim)),
            ],
        }
    }

    pub fn head(dim: usize, vocab_size: usize) -> Self {
        Self {
            kind: LayerKind::Head,
            params: vec![
                ParamDesc::new("weight", ModuleKind::Linear, (dim, vocab_size)),
                ParamDesc::new("bias", ModuleKind::Linear, (1, vocab_size)),
            ],
        }
    }
}

/// Flattens the GPT-X hyperparameters into its ordered layer sequence:
/// `[Embedding, Block × depth, LayerNorm, Head]`.
pub fn gptx_layers(model: &ModelConfig) -> Vec<LayerDesc> {
    let &ModelConfig {
        vocab_size,
        dim,
        depth,
        max_seq_len,
        ..
    } = model;

    let mut layers = Vec::with_capacity(model.num_layers());
    layers.push(LayerDesc::embedding(vocab_size, max_seq_len, dim));
    layers.extend((0..depth).map(|_| LayerDesc::block(dim)));
    layers.push(LayerDesc::layer_norm(dim));
    layers.push(LayerDesc::head(dim, vocab_size));
    layers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_embedding_blocks_norm_head() {
        let model = ModelConfig {
            vocab_size: 10,
            dim: 4,
            depth: 3,
            n_head: 2,
            max_seq_len: 6,
        };

        let kinds: Vec<_> = gptx_layers(&model).iter().map(|l| l.kind).collect();

        assert_eq!(
            kinds,
            [
                LayerKind::Embedding,
                LayerKind::Block,
                LayerKind::Block,
                LayerKind::Block,
                LayerKind::LayerNorm,
                LayerKind::Head,
            ]
        );
        assert_eq!(kinds.len(), model.num_layers());
    }
}
