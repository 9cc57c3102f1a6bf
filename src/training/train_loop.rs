use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, error, info, warn};

use super::{MetricRecord, MetricsSink, Phase, RunMetrics};
use crate::{
    data::BatchSource,
    error::{OrchestraErr, Result},
    pipeline::{Mode, Pipeline},
    schedule::TrainingSchedule,
};

/// Lifecycle of a `TrainLoop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Completed,
    Failed,
    /// The stop flag was raised between two steps.
    Stopped,
}

/// What a training run reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    /// Amount of steps that completed.
    pub steps: usize,
    pub stopped: bool,
    /// The record of the final completed step.
    pub last: Option<MetricRecord>,
}

impl TrainSummary {
    pub fn loss(&self) -> Option<f32> {
        self.last.map(|r| r.loss)
    }

    pub fn perplexity(&self) -> Option<f32> {
        self.last.map(|r| r.perplexity)
    }
}

/// Drives a pipeline through a precomputed step budget.
///
/// The loop holds the pipeline mutably for its whole life, so nothing else can step or
/// evaluate it while training runs.
pub struct TrainLoop<'a, P: Pipeline + ?Sized, S: MetricsSink + ?Sized> {
    pipeline: &'a mut P,
    schedule: TrainingSchedule,
    sink: &'a mut S,
    stop: Option<Arc<AtomicBool>>,
    state: LoopState,
    global_step: usize,
    metrics: RunMetrics,
}

impl<'a, P: Pipeline + ?Sized, S: MetricsSink + ?Sized> TrainLoop<'a, P, S> {
    /// Creates a new `TrainLoop`.
    ///
    /// # Arguments
    /// * `pipeline` - The assembled pipeline to train.
    /// * `schedule` - The learning-rate schedule, planned for the full run.
    /// * `sink` - Where the per-step metrics go.
    pub fn new(pipeline: &'a mut P, schedule: TrainingSchedule, sink: &'a mut S) -> Self {
        Self {
            pipeline,
            schedule,
            sink,
            stop: None,
            state: LoopState::Idle,
            global_step: 0,
            metrics: RunMetrics::default(),
        }
    }

    /// Polls `flag` between steps and stops the run once it is set.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Amount of successful steps so far.
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Trains for `epochs` passes over `source`, one pipelined step per batch.
    ///
    /// # Returns
    /// The summary of the run, which is partial if the stop flag was raised.
    ///
    /// # Errors
    /// * `Schedule` if the loop already ran or `len(source) × epochs` differs from the
    ///   schedule's budget.
    /// * `EmptySource` if `source` has no batches.
    /// * `SourceMismatch` if an epoch yields a different amount of batches than `len()`.
    /// * `StepFailure` if a pipelined step fails. The state becomes `Failed`.
    pub fn run<B: BatchSource + ?Sized>(&mut self, source: &B, epochs: usize) -> Result<TrainSummary> {
        if self.state != LoopState::Idle {
            return Err(OrchestraErr::Schedule(format!(
                "a training loop runs once, this one is {:?}",
                self.state
            )));
        }

        let per_epoch = source.len();
        if per_epoch == 0 {
            return Err(OrchestraErr::EmptySource { phase: Phase::Train });
        }

        let total = per_epoch.checked_mul(epochs).unwrap_or(usize::MAX);
        if total != self.schedule.total_steps() {
            return Err(OrchestraErr::Schedule(format!(
                "{per_epoch} batches × {epochs} epochs make {total} steps, but the schedule plans {}",
                self.schedule.total_steps()
            )));
        }

        self.state = LoopState::Running;
        self.pipeline.set_mode(Mode::Train);
        info!(
            epochs = epochs,
            steps = total,
            warmup_steps = self.schedule.warmup_steps();
            "training started"
        );

        for epoch in 0..epochs {
            let mut batches = source.batches(epoch);
            let mut seen = 0;

            while let Some(batch) = batches.next() {
                if self.stop_requested() {
                    self.state = LoopState::Stopped;
                    warn!(step = self.global_step; "training stopped");
                    return Ok(self.summary());
                }

                if seen == per_epoch {
                    self.state = LoopState::Failed;
                    return Err(OrchestraErr::SourceMismatch {
                        epoch,
                        expected: per_epoch,
                        got: per_epoch + 1 + batches.count(),
                    });
                }

                let step = self.global_step;
                let multiplier = self.schedule.multiplier(step);

                let out = match self.pipeline.train_batch(&batch, multiplier) {
                    Ok(out) => out,
                    Err(source) => {
                        self.state = LoopState::Failed;
                        error!(step = step, stage = source.stage; "training step failed: {}", source.reason);
                        return Err(OrchestraErr::StepFailure {
                            phase: Phase::Train,
                            step,
                            completed: self.global_step,
                            source,
                        });
                    }
                };

                self.global_step += 1;
                seen += 1;

                let record = MetricRecord::new(Phase::Train, step, out.loss);
                self.metrics.record(&record, batch.rows());
                self.sink.record(&record);
            }

            if seen != per_epoch {
                self.state = LoopState::Failed;
                return Err(OrchestraErr::SourceMismatch {
                    epoch,
                    expected: per_epoch,
                    got: seen,
                });
            }

            debug!(
                epoch = epoch,
                step = self.global_step,
                mean_loss = self.metrics.mean_loss().unwrap_or(f64::NAN);
                "epoch finished"
            );
        }

        self.state = LoopState::Completed;
        info!(steps = self.global_step, samples = self.metrics.samples; "training finished");
        Ok(self.summary())
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn summary(&self) -> TrainSummary {
        TrainSummary {
            steps: self.global_step,
            stopped: self.state == LoopState::Stopped,
            last: self.metrics.last().copied(),
        }
    }
}
