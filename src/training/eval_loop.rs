use log::{error, info};

use super::{MetricRecord, MetricsSink, Phase, RunMetrics};
use crate::{
    data::BatchSource,
    error::{OrchestraErr, Result},
    pipeline::{EvalGuard, Pipeline},
};

/// What an evaluation pass reports back: the loss of its **last** step, never an average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalSummary {
    pub steps: usize,
    pub loss: f32,
    pub perplexity: f32,
}

/// Runs one forward-only pass over `source`.
///
/// The pipeline is held in `Mode::Eval` for the duration of the pass and is back in
/// `Mode::Train` when this returns, whatever the outcome. The source is always iterated
/// with epoch 0, so repeated evaluations see the same batches.
///
/// # Errors
/// * `EmptySource` if `source` has no batches. The pipeline's mode isn't touched.
/// * `SourceMismatch` if `source` yields a different amount of batches than `len()`.
/// * `StepFailure` if a forward step fails.
pub fn evaluate<P, B, S>(pipeline: &mut P, source: &B, sink: &mut S) -> Result<EvalSummary>
where
    P: Pipeline + ?Sized,
    B: BatchSource + ?Sized,
    S: MetricsSink + ?Sized,
{
    let expected = source.len();
    if expected == 0 {
        return Err(OrchestraErr::EmptySource { phase: Phase::Eval });
    }

    let mut pipeline = EvalGuard::new(pipeline);
    let mut metrics = RunMetrics::default();
    let mut batches = source.batches(0);

    while let Some(batch) = batches.next() {
        let step = metrics.steps;
        if step == expected {
            return Err(OrchestraErr::SourceMismatch {
                epoch: 0,
                expected,
                got: expected + 1 + batches.count(),
            });
        }

        let loss = pipeline.eval_batch(&batch).map_err(|source| {
            error!(step = step, stage = source.stage; "eval step failed: {}", source.reason);
            OrchestraErr::StepFailure {
                phase: Phase::Eval,
                step,
                completed: step,
                source,
            }
        })?;

        let record = MetricRecord::new(Phase::Eval, step, loss);
        metrics.record(&record, batch.rows());
        sink.record(&record);
    }

    let last = match metrics.last() {
        Some(last) if metrics.steps == expected => *last,
        _ => {
            return Err(OrchestraErr::SourceMismatch {
                epoch: 0,
                expected,
                got: metrics.steps,
            });
        }
    };

    info!(steps = metrics.steps, loss = last.loss, perplexity = last.perplexity; "evaluation finished");

    Ok(EvalSummary {
        steps: metrics.steps,
        loss: last.loss,
        perplexity: last.perplexity,
    })
}
