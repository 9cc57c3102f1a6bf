use std::{error::Error, fmt, io};

use crate::training::Phase;

/// The orchestrator's result type.
pub type Result<T> = std::result::Result<T, OrchestraErr>;

/// A failure raised by one pipeline stage while running a step.
#[derive(Debug, Clone, PartialEq)]
pub struct StageErr {
    pub stage: usize,
    pub reason: String,
}

impl StageErr {
    pub fn new(stage: usize, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StageErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {}: {}", self.stage, self.reason)
    }
}

impl Error for StageErr {}

/// Orchestration failures.
///
/// Every variant is fatal for the run it was raised in. None of them is retried.
#[derive(Debug)]
pub enum OrchestraErr {
    /// A trainable tensor was grouped a different amount of times than the pipeline owns it.
    Grouping {
        tensor: String,
        layer: usize,
        stage: usize,
        occurrences: usize,
        expected: usize,
    },
    /// The requested stage count cannot partition the layer sequence.
    InvalidTopology { stages: usize, layers: usize },
    /// The step budget or warmup is inconsistent.
    Schedule(String),
    /// A pipelined step raised; `completed` is the amount of steps that finished before it.
    StepFailure {
        phase: Phase,
        step: usize,
        completed: usize,
        source: StageErr,
    },
    /// A batch source yielded a different amount of batches than it advertised.
    SourceMismatch {
        epoch: usize,
        expected: usize,
        got: usize,
    },
    /// A loop was asked to iterate an empty batch source.
    EmptySource { phase: Phase },
    /// Invalid configuration, caught before any pipeline work.
    InvalidConfig(String),
    /// The tokenizer couldn't be built or couldn't encode the corpus.
    Tokenizer(String),
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for OrchestraErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grouping {
                tensor,
                layer,
                stage,
                occurrences,
                expected,
            } => write!(
                f,
                "tensor {tensor} (layer {layer}, stage {stage}) was grouped {occurrences} times, expected {expected}"
            ),
            Self::InvalidTopology { stages, layers } => write!(
                f,
                "cannot partition {layers} layers into {stages} pipeline stages"
            ),
            Self::Schedule(msg) => write!(f, "invalid schedule: {msg}"),
            Self::StepFailure {
                phase,
                step,
                completed,
                source,
            } => write!(
                f,
                "{phase} step {step} failed at {source} ({completed} steps completed)"
            ),
            Self::SourceMismatch {
                epoch,
                expected,
                got,
            } => write!(
                f,
                "batch source yielded {got} batches at epoch {epoch}, expected {expected}"
            ),
            Self::EmptySource { phase } => write!(f, "{phase} batch source is empty"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Tokenizer(msg) => write!(f, "tokenizer error: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for OrchestraErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StepFailure { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OrchestraErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for OrchestraErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
