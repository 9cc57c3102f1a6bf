use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use log::{info, warn};
use serde::Serialize;

use super::Phase;

/// The metrics of one completed step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricRecord {
    pub phase: Phase,
    /// Zero-based index of the step within its loop.
    pub step: usize,
    pub loss: f32,
    pub perplexity: f32,
}

impl MetricRecord {
    /// Creates the record of a step, deriving the perplexity from `loss`.
    pub fn new(phase: Phase, step: usize, loss: f32) -> Self {
        Self {
            phase,
            step,
            loss,
            perplexity: loss.exp(),
        }
    }
}

/// Counters of a single loop invocation.
#[derive(Debug, Default, Clone)]
pub struct RunMetrics {
    pub steps: usize,
    pub samples: usize,
    loss_sum: f64,
    last: Option<MetricRecord>,
}

impl RunMetrics {
    #[inline]
    pub fn record(&mut self, record: &MetricRecord, samples: usize) {
        self.steps += 1;
        self.samples += samples;
        self.loss_sum += record.loss as f64;
        self.last = Some(*record);
    }

    /// The record of the latest step, if any ran.
    pub fn last(&self) -> Option<&MetricRecord> {
        self.last.as_ref()
    }

    /// Mean loss over every recorded step. Only used for progress reporting.
    pub fn mean_loss(&self) -> Option<f64> {
        (self.steps > 0).then(|| self.loss_sum / self.steps as f64)
    }
}

/// Receives the metrics the loop drivers emit. Sinks never fail a run.
pub trait MetricsSink {
    fn record(&mut self, record: &MetricRecord);
}

impl<S: MetricsSink + ?Sized> MetricsSink for &mut S {
    fn record(&mut self, record: &MetricRecord) {
        (**self).record(record)
    }
}

impl MetricsSink for Vec<MetricRecord> {
    fn record(&mut self, record: &MetricRecord) {
        self.push(*record);
    }
}

impl MetricsSink for Vec<Box<dyn MetricsSink + Send>> {
    fn record(&mut self, record: &MetricRecord) {
        for sink in self.iter_mut() {
            sink.record(record);
        }
    }
}

/// Writes every record through `log`, one line per step every `every` steps.
#[derive(Debug, Clone)]
pub struct LogSink {
    every: usize,
}

impl LogSink {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MetricsSink for LogSink {
    fn record(&mut self, record: &MetricRecord) {
        if record.step % self.every != 0 {
            return;
        }

        info!(
            phase:% = record.phase,
            step = record.step,
            loss = record.loss,
            perplexity = record.perplexity;
            "step finished"
        );
    }
}

/// Writes one JSON object per record and line.
///
/// A failed write is logged once and the sink goes quiet.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
    failed: bool,
}

impl JsonLinesSink<BufWriter<File>> {
    /// Creates (or truncates) the file at `path` and writes records to it.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            failed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write(&mut self, record: &MetricRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write> MetricsSink for JsonLinesSink<W> {
    fn record(&mut self, record: &MetricRecord) {
        if self.failed {
            return;
        }

        if let Err(e) = self.write(record) {
            warn!(error:% = e; "metrics sink failed, dropping further records");
            self.failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perplexity_is_the_exponential_of_the_loss() {
        let record = MetricRecord::new(Phase::Train, 3, 2.0);
        assert_eq!(record.perplexity, 2f32.exp());
    }

    #[test]
    fn run_metrics_keep_the_last_record() {
        let mut metrics = RunMetrics::default();
        assert!(metrics.last().is_none());
        assert!(metrics.mean_loss().is_none());

        metrics.record(&MetricRecord::new(Phase::Eval, 0, 1.0), 4);
        metrics.record(&MetricRecord::new(Phase::Eval, 1, 3.0), 2);

        assert_eq!(metrics.steps, 2);
        assert_eq!(metrics.samples, 6);
        assert_eq!(metrics.last().map(|r| r.step), Some(1));
        assert_eq!(metrics.mean_loss(), Some(2.0));
    }

    #[test]
    fn json_lines_sink_writes_one_object_per_line() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.record(&MetricRecord::new(Phase::Train, 0, 0.0));
        sink.record(&MetricRecord::new(Phase::Eval, 7, 0.0));

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"phase":"train","step":0,"loss":0.0,"perplexity":1.0}"#
        );

        let value: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(value["phase"], "eval");
        assert_eq!(value["step"], 7);
    }

    #[test]
    fn fan_out_reaches_every_sink() {
        let mut sinks: Vec<Box<dyn MetricsSink + Send>> = vec![
            Box::new(LogSink::default()),
            Box::new(JsonLinesSink::new(io::sink())),
        ];
        sinks.record(&MetricRecord::new(Phase::Train, 0, 1.0));

        fn feed<S: MetricsSink>(mut sink: S) {
            sink.record(&MetricRecord::new(Phase::Train, 1, 1.0));
        }

        let mut collected: Vec<MetricRecord> = Vec::new();
        feed(&mut collected);
        feed(&mut collected);
        assert_eq!(collected.len(), 2);
    }
}
