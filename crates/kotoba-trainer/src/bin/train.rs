use anyhow::Context;
use clap::Parser;

use kotoba_trainer::config::TrainConfig;
use kotoba_trainer::trainer::train_and_test;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let config = TrainConfig::parse();
    train_and_test(&config).context("training run failed")?;
    Ok(())
}
