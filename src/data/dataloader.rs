use std::{num::NonZeroUsize, sync::Arc};

use log::info;
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{Batch, BatchSource, TokenWindows};
use crate::error::{OrchestraErr, Result};

/// Batches a subset of a `TokenWindows` dataset.
///
/// The last batch is kept even when it holds fewer than `batch_size` rows.
#[derive(Debug, Clone)]
pub struct DataLoader {
    windows: Arc<TokenWindows>,
    indices: Vec<usize>,
    batch_size: NonZeroUsize,
    shuffle: Option<u64>,
}

impl DataLoader {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `windows` - The dataset.
    /// * `indices` - The windows of the dataset this loader yields.
    /// * `batch_size` - The maximum amount of windows per batch.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if an index is past the end of `windows`.
    pub fn new(
        windows: Arc<TokenWindows>,
        indices: Vec<usize>,
        batch_size: NonZeroUsize,
    ) -> Result<Self> {
        if let Some(&index) = indices.iter().find(|&&i| i >= windows.len()) {
            return Err(OrchestraErr::InvalidConfig(format!(
                "window {index} is out of range for a dataset of {} windows",
                windows.len()
            )));
        }

        Ok(Self {
            windows,
            indices,
            batch_size,
            shuffle: None,
        })
    }

    /// Shuffles the windows on every pass, deterministically from `seed` and the epoch.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = Some(seed);
        self
    }

    /// Amount of windows this loader yields per pass.
    pub fn num_samples(&self) -> usize {
        self.indices.len()
    }

    fn order(&self, epoch: usize) -> Vec<usize> {
        let mut order = self.indices.clone();

        if let Some(seed) = self.shuffle {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }

        order
    }

    fn collate(&self, rows: &[usize]) -> Batch {
        let shape = (rows.len(), self.windows.seq_len());

        Batch {
            inputs: Array2::from_shape_fn(shape, |(r, c)| self.windows.id(rows[r], c)),
            labels: Array2::from_shape_fn(shape, |(r, c)| self.windows.id(rows[r], c + 1)),
        }
    }
}

impl BatchSource for DataLoader {
    type Iter<'a> = Batches<'a>;

    fn len(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size.get())
    }

    fn batches(&self, epoch: usize) -> Batches<'_> {
        Batches {
            loader: self,
            order: self.order(epoch),
            pos: 0,
        }
    }
}

/// One pass over a `DataLoader`.
pub struct Batches<'a> {
    loader: &'a DataLoader,
    order: Vec<usize>,
    pos: usize,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.pos >= self.order.len() {
            return None;
        }

        let end = (self.pos + self.loader.batch_size.get()).min(self.order.len());
        let batch = self.loader.collate(&self.order[self.pos..end]);
        self.pos = end;
        Some(batch)
    }
}

/// Randomly splits `windows` into a train and an eval loader.
///
/// The eval subset holds `floor(len × eval_split)` windows and the train subset the rest.
/// Both loaders shuffle from `seed`.
///
/// # Errors
/// Returns `InvalidConfig` if `eval_split` is outside `(0, 1)` or either subset ends up empty.
pub fn build_dataloaders(
    windows: TokenWindows,
    eval_split: f64,
    batch_size: NonZeroUsize,
    seed: u64,
) -> Result<(DataLoader, DataLoader)> {
    if !(eval_split > 0.0 && eval_split < 1.0) {
        return Err(OrchestraErr::InvalidConfig(format!(
            "eval split must lie in (0, 1), got {eval_split}"
        )));
    }

    let len = windows.len();
    let eval_len = (len as f64 * eval_split) as usize;
    let train_len = len - eval_len;

    if eval_len == 0 || train_len == 0 {
        return Err(OrchestraErr::InvalidConfig(format!(
            "a dataset of {len} windows is too small for an eval split of {eval_split}"
        )));
    }

    let mut perm: Vec<usize> = (0..len).collect();
    perm.shuffle(&mut StdRng::seed_from_u64(seed));
    let eval_indices = perm.split_off(train_len);

    let windows = Arc::new(windows);
    let train = DataLoader::new(Arc::clone(&windows), perm, batch_size)?.shuffled(seed);
    let eval = DataLoader::new(windows, eval_indices, batch_size)?.shuffled(seed);

    info!(
        train_windows = train.num_samples(),
        train_batches = train.len(),
        eval_windows = eval.num_samples(),
        eval_batches = eval.len();
        "dataloaders built"
    );

    Ok((train, eval))
}
