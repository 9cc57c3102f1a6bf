mod dataloader;
mod dataset;
mod tokenizer;

use ndarray::Array2;

pub use dataloader::{Batches, DataLoader, build_dataloaders};
pub use dataset::TokenWindows;
pub use tokenizer::{Tokenizer, UNK_TOKEN, WordPieceTokenizer};

/// A batch of fixed-length windows: `labels` is `inputs` shifted one token ahead.
///
/// Both arrays are shaped `(rows, seq_len)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Array2<u32>,
    pub labels: Array2<u32>,
}

impl Batch {
    pub fn rows(&self) -> usize {
        self.inputs.nrows()
    }
}

/// A finite, restartable sequence of batches. The orchestrator only iterates it.
pub trait BatchSource {
    type Iter<'a>: Iterator<Item = Batch>
    where
        Self: 'a;

    /// Amount of batches yielded by one full pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a pass over the source. Sources that shuffle use `epoch` to pick the order, so
    /// the same epoch always yields the same batches.
    fn batches(&self, epoch: usize) -> Self::Iter<'_>;
}

impl BatchSource for Vec<Batch> {
    type Iter<'a> = std::iter::Cloned<std::slice::Iter<'a, Batch>>;

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn batches(&self, _epoch: usize) -> Self::Iter<'_> {
        self.iter().cloned()
    }
}
