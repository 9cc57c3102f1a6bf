mod common;

use common::{MockPipeline, batches};
use gptx::{
    OrchestraErr,
    data::Batch,
    pipeline::{Mode, Pipeline},
    training::{MetricRecord, Phase, evaluate},
};

#[test]
fn reports_the_last_step_not_the_mean() {
    let source = batches(6);
    let mut pipeline = MockPipeline::new();
    let mut records: Vec<MetricRecord> = Vec::new();

    let summary = evaluate(&mut pipeline, &source, &mut records).unwrap();

    // The mock's eval loss is the mean input id, and batch `i` holds only `i`.
    assert_eq!(summary.steps, 6);
    assert_eq!(summary.loss, 5.0);
    assert_eq!(summary.perplexity, 5f32.exp());

    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r.phase == Phase::Eval));
    assert_eq!(pipeline.eval_calls, 6);
}

#[test]
fn mode_is_restored_after_evaluation() {
    let source = batches(3);
    let mut pipeline = MockPipeline::new();
    let mut records: Vec<MetricRecord> = Vec::new();

    assert_eq!(pipeline.mode(), Mode::Train);
    evaluate(&mut pipeline, &source, &mut records).unwrap();
    assert_eq!(pipeline.mode(), Mode::Train);
}

#[test]
fn mode_is_restored_after_a_failure() {
    let source = batches(5);
    let mut pipeline = MockPipeline::new();
    pipeline.fail_eval_at = Some(2);
    let mut records: Vec<MetricRecord> = Vec::new();

    let err = evaluate(&mut pipeline, &source, &mut records).unwrap_err();

    assert!(matches!(
        err,
        OrchestraErr::StepFailure {
            phase: Phase::Eval,
            step: 2,
            completed: 2,
            ..
        }
    ));
    assert_eq!(pipeline.mode(), Mode::Train);
    assert_eq!(records.len(), 2);
}

#[test]
fn consecutive_evaluations_are_identical() {
    let source = batches(8);
    let mut pipeline = MockPipeline::new();
    let mut first: Vec<MetricRecord> = Vec::new();
    let mut second: Vec<MetricRecord> = Vec::new();

    let a = evaluate(&mut pipeline, &source, &mut first).unwrap();
    let b = evaluate(&mut pipeline, &source, &mut second).unwrap();

    assert_eq!(a, b);
    assert_eq!(first, second);
}

#[test]
fn empty_sources_leave_the_mode_alone() {
    let source: Vec<Batch> = Vec::new();
    let mut pipeline = MockPipeline::new();
    pipeline.mode = Mode::Eval;
    let mut records: Vec<MetricRecord> = Vec::new();

    let err = evaluate(&mut pipeline, &source, &mut records).unwrap_err();

    assert!(matches!(err, OrchestraErr::EmptySource { phase: Phase::Eval }));
    assert_eq!(pipeline.mode(), Mode::Eval);
}
