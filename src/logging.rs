use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

use chrono::NaiveDate;
use env_logger::{Builder, Env, Target};

use crate::{configs::RunConfig, error::Result};

/// Where a run started on `date` writes its log: `{log_dir}/{model_name}-{date}.log`.
pub fn log_path(config: &RunConfig, date: NaiveDate) -> Option<PathBuf> {
    let dir = config.log_dir.as_ref()?;
    Some(dir.join(format!("{}-{date}.log", config.model_name)))
}

/// Installs the global logger. Records go to stderr and, when the config names a
/// `log_dir`, are also appended to today's run log. The level defaults to `info` and
/// `RUST_LOG` overrides it.
///
/// # Errors
/// Returns `Io` if the log directory or file can't be created.
pub fn init_logging(config: &RunConfig) -> Result<Option<PathBuf>> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    let path = log_path(config, chrono::Local::now().date_naive());
    if let Some(path) = &path {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(Tee::new(io::stderr(), file))));
    }

    // A logger installed earlier (tests, embedding binaries) keeps working.
    let _ = builder.try_init();
    Ok(path)
}

/// Writes everything to two sinks.
struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.first.write_all(buf)?;
        self.second.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.first.flush()?;
        self.second.flush()
    }
}
