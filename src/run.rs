use std::{
    fs,
    sync::{Arc, atomic::AtomicBool},
};

use log::info;

use crate::{
    configs::RunConfig,
    data::{BatchSource, TokenWindows, Tokenizer, WordPieceTokenizer, build_dataloaders},
    error::{OrchestraErr, Result},
    optimization::group_parameters,
    pipeline::PipelineAssembler,
    schedule::TrainingSchedule,
    training::{
        EvalSummary, JsonLinesSink, LogSink, MetricsSink, TrainLoop, TrainSummary, evaluate,
    },
};

/// The outcome of a pretraining run.
#[derive(Debug, Clone, PartialEq)]
pub struct PretrainReport {
    pub train: TrainSummary,
    /// `None` when training was stopped before its budget ran out.
    pub eval: Option<EvalSummary>,
}

/// Runs a full pretraining job: tokenizes the corpus, splits it, plans and assembles the
/// pipeline, trains it for `config.epoch` epochs and evaluates it once.
///
/// # Arguments
/// * `config` - The run configuration.
/// * `stop` - A flag polled between training steps; raising it ends the run early.
///
/// # Errors
/// Any `OrchestraErr` raised while preparing, training or evaluating. Nothing is retried.
pub fn pretrain(config: &RunConfig, stop: Option<Arc<AtomicBool>>) -> Result<PretrainReport> {
    config.validate()?;

    let tokenizer = WordPieceTokenizer::from_path(&config.vocab_path, config.do_lower_case)?;
    if tokenizer.vocab_size() > config.model.vocab_size {
        return Err(OrchestraErr::InvalidConfig(format!(
            "the vocabulary holds {} tokens but the model embeds {}",
            tokenizer.vocab_size(),
            config.model.vocab_size
        )));
    }

    let corpus = fs::read_to_string(&config.data_path)?;
    let ids = tokenizer.encode(&corpus)?;
    info!(tokens = ids.len(), vocab_size = tokenizer.vocab_size(); "corpus tokenized");

    let windows = TokenWindows::new(ids, config.model.max_seq_len)?;
    let (train, eval) =
        build_dataloaders(windows, config.eval_split, config.batch_size, config.seed)?;

    let epochs = config.epoch.get();
    let total_steps = train.len().checked_mul(epochs).ok_or_else(|| {
        OrchestraErr::Schedule(format!("{} batches × {epochs} epochs overflow", train.len()))
    })?;
    let schedule = TrainingSchedule::new(total_steps, config.warmup_iter)?;

    let assembler = PipelineAssembler::new(config.model, config.num_stages)
        .first_worker(config.first_worker)
        .seed(config.seed);
    let plan = assembler.plan()?;
    let groups = group_parameters(&plan, config.weight_decay)?;
    let mut pipeline = assembler.assemble(
        &plan,
        &groups,
        &config.optimizer,
        config.micro_batches.get(),
    )?;

    info!(
        model = config.model_name.as_str(),
        optimizer = config.optimizer.kind(),
        stages = plan.topology().num_stages(),
        steps = schedule.total_steps(),
        warmup_steps = schedule.warmup_steps();
        "pipeline assembled"
    );

    let mut sink = sinks(config)?;

    let train_summary = {
        let mut train_loop = TrainLoop::new(&mut pipeline, schedule, &mut sink);
        if let Some(stop) = stop {
            train_loop = train_loop.with_stop_flag(stop);
        }
        train_loop.run(&train, epochs)?
    };

    if train_summary.stopped {
        return Ok(PretrainReport {
            train: train_summary,
            eval: None,
        });
    }

    let eval_summary = evaluate(&mut pipeline, &eval, &mut sink)?;

    Ok(PretrainReport {
        train: train_summary,
        eval: Some(eval_summary),
    })
}

fn sinks(config: &RunConfig) -> Result<Vec<Box<dyn MetricsSink + Send>>> {
    let mut sinks: Vec<Box<dyn MetricsSink + Send>> = vec![Box::new(LogSink::default())];

    if let Some(dir) = &config.log_dir {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.metrics.jsonl", config.model_name));
        sinks.push(Box::new(JsonLinesSink::create(&path)?));
        info!(path:? = path; "writing metrics");
    }

    Ok(sinks)
}
