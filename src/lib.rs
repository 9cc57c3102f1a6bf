pub mod arch;
pub mod configs;
pub mod data;
pub mod error;
mod logging;
pub mod optimization;
pub mod pipeline;
mod run;
pub mod schedule;
pub mod training;

pub use error::{OrchestraErr, Result, StageErr};
pub use logging::{init_logging, log_path};
pub use run::{PretrainReport, pretrain};
pub use schedule::TrainingSchedule;
