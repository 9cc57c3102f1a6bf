use std::{
    env,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, bail};
use gptx::{configs::RunConfig, init_logging, pretrain};
use log::{info, warn};
use tokio::{signal, task};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(path) = env::args().nth(1) else {
        bail!("usage: gptx-pretrain <config.json>");
    };

    let config =
        RunConfig::from_path(&path).with_context(|| format!("loading config from {path}"))?;
    let log_file = init_logging(&config).context("opening the run log")?;
    if let Some(log_file) = &log_file {
        info!(path:? = log_file; "logging to file");
    }
    info!(model = config.model_name.as_str(), path = path.as_str(); "config loaded");

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("received SIGINT, stopping after the current step");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let report = task::spawn_blocking(move || pretrain(&config, Some(stop)))
        .await
        .context("pretraining task panicked")?
        .context("pretraining failed")?;

    info!(
        steps = report.train.steps,
        stopped = report.train.stopped,
        train_loss = report.train.loss().unwrap_or(f32::NAN),
        train_perplexity = report.train.perplexity().unwrap_or(f32::NAN);
        "training finished"
    );

    if let Some(eval) = report.eval {
        info!(
            steps = eval.steps,
            eval_loss = eval.loss,
            eval_perplexity = eval.perplexity;
            "evaluation finished"
        );
    }

    Ok(())
}
