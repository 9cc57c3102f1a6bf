mod layer;
mod tensor;

pub use layer::{LayerDesc, LayerKind, ParamDesc, gptx_layers};
pub use tensor::{ModuleKind, TensorId, TensorMeta};
