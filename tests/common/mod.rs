#![allow(dead_code)]

use gptx::{
    StageErr,
    data::Batch,
    pipeline::{Mode, Pipeline, StepOutput},
};
use ndarray::Array2;

/// A pipeline that runs no model. Train losses count down from `start_loss`, eval losses
/// are derived from the batch so repeated passes agree.
pub struct MockPipeline {
    pub mode: Mode,
    pub multipliers: Vec<f64>,
    pub eval_calls: usize,
    pub fail_train_at: Option<usize>,
    pub fail_eval_at: Option<usize>,
    pub start_loss: f32,
}

impl MockPipeline {
    pub fn new() -> Self {
        Self {
            mode: Mode::Train,
            multipliers: Vec::new(),
            eval_calls: 0,
            fail_train_at: None,
            fail_eval_at: None,
            start_loss: 10.0,
        }
    }
}

impl Pipeline for MockPipeline {
    fn train_batch(&mut self, _: &Batch, lr_multiplier: f64) -> Result<StepOutput, StageErr> {
        assert_eq!(self.mode, Mode::Train, "trained while in eval mode");

        let step = self.multipliers.len();
        if self.fail_train_at == Some(step) {
            return Err(StageErr::new(1, "activation exchange failed"));
        }

        self.multipliers.push(lr_multiplier);
        Ok(StepOutput {
            logits: None,
            loss: self.start_loss - step as f32 * 0.01,
        })
    }

    fn eval_batch(&mut self, batch: &Batch) -> Result<f32, StageErr> {
        assert_eq!(self.mode, Mode::Eval, "evaluated while in train mode");

        let call = self.eval_calls;
        self.eval_calls += 1;
        if self.fail_eval_at == Some(call) {
            return Err(StageErr::new(0, "forward failed"));
        }

        Ok(batch.inputs.sum() as f32 / batch.inputs.len() as f32)
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}

/// `n` single-row batches whose inputs are all `i` for batch `i`.
pub fn batches(n: usize) -> Vec<Batch> {
    (0..n)
        .map(|i| Batch {
            inputs: Array2::from_elem((1, 4), i as u32),
            labels: Array2::from_elem((1, 4), i as u32 + 1),
        })
        .collect()
}
