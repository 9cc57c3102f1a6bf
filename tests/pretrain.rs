use std::{fs, path::PathBuf};

use gptx::{OrchestraErr, configs::RunConfig, pretrain};
use serde_json::json;

/// A scratch directory holding a vocabulary and a corpus of `words` tokens.
fn workspace(name: &str, words: usize) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gptx-{name}-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();

    let mut vocab = vec!["[PAD]".to_string(), "[UNK]".to_string()];
    vocab.extend((0..10).map(|i| format!("w{i}")));
    fs::write(dir.join("vocab.txt"), vocab.join("\n")).unwrap();

    let corpus: Vec<_> = (0..words).map(|i| format!("w{}", (i * 7) % 10)).collect();
    fs::write(dir.join("corpus.txt"), corpus.join(" ")).unwrap();

    dir
}

fn config(dir: &PathBuf, vocab_size: usize) -> RunConfig {
    let raw = json!({
        "model_name": "gptx-tiny",
        "vocab_path": dir.join("vocab.txt"),
        "data_path": dir.join("corpus.txt"),
        "log_dir": dir.join("logs"),
        "model": {"vocab_size": vocab_size, "dim": 8, "depth": 2, "n_head": 2, "max_seq_len": 4},
        "epoch": 2,
        "batch_size": 8,
        "warmup_iter": 0.1,
        "weight_decay": 0.01,
        "num_stages": 2,
        "micro_batches": 2,
        "eval_split": 0.25,
        "optimizer": {"type": "adam", "params": {"lr": 0.001}}
    });

    RunConfig::from_json(&raw.to_string()).unwrap()
}

#[test]
fn pretrains_and_evaluates_end_to_end() {
    // 401 tokens make 100 windows of 4: 75 train (10 batches), 25 eval (4 batches).
    let dir = workspace("e2e", 401);
    let config = config(&dir, 16);

    let report = pretrain(&config, None).unwrap();

    assert_eq!(report.train.steps, 20);
    assert!(!report.train.stopped);
    assert!(report.train.loss().is_some_and(f32::is_finite));

    let eval = report.eval.unwrap();
    assert_eq!(eval.steps, 4);
    assert!(eval.loss.is_finite());
    assert_eq!(eval.perplexity, eval.loss.exp());

    let metrics = fs::read_to_string(dir.join("logs").join("gptx-tiny.metrics.jsonl")).unwrap();
    let phases: Vec<String> = metrics
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["phase"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(phases.len(), 24);
    assert_eq!(phases.iter().filter(|p| *p == "train").count(), 20);
    assert_eq!(phases.iter().filter(|p| *p == "eval").count(), 4);

    fs::remove_dir_all(dir).ok();
}

#[test]
fn runs_are_reproducible() {
    let dir = workspace("repro", 401);
    let config = config(&dir, 16);

    let a = pretrain(&config, None).unwrap();
    let b = pretrain(&config, None).unwrap();
    assert_eq!(a, b);

    fs::remove_dir_all(dir).ok();
}

#[test]
fn a_vocabulary_larger_than_the_model_is_rejected() {
    let dir = workspace("vocab", 401);
    let config = config(&dir, 8);

    let err = pretrain(&config, None).unwrap_err();
    assert!(matches!(err, OrchestraErr::InvalidConfig(_)), "{err}");

    fs::remove_dir_all(dir).ok();
}

#[test]
fn a_corpus_too_small_to_split_is_rejected() {
    let dir = workspace("tiny", 9);
    let config = config(&dir, 16);

    assert!(pretrain(&config, None).is_err());

    fs::remove_dir_all(dir).ok();
}

#[test]
fn missing_files_surface_as_io_errors() {
    let dir = workspace("missing", 401);
    let mut config = config(&dir, 16);
    config.data_path = dir.join("nope.txt");

    let err = pretrain(&config, None).unwrap_err();
    assert!(matches!(err, OrchestraErr::Io(_)), "{err}");

    fs::remove_dir_all(dir).ok();
}
