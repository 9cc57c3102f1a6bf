mod eval_loop;
mod metrics;
mod train_loop;

use std::fmt;

use serde::Serialize;

pub use eval_loop::{EvalSummary, evaluate};
pub use metrics::{JsonLinesSink, LogSink, MetricRecord, MetricsSink, RunMetrics};
pub use train_loop::{LoopState, TrainLoop, TrainSummary};

/// The loop a step or a metric belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Train,
    Eval,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Train => "train",
            Self::Eval => "eval",
        })
    }
}
