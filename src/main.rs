use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands};
use crate::config::JobConfig;

mod cli;
mod config;
mod probe;
mod read;

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("ffmpeg_reader", level)
        .filter_module("lite_reader", level)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    ffmpeg_reader::init().context("ffmpeg init")?;

    match cli.command {
        Commands::Probe(args) => probe::run(args).await,
        Commands::Read(args) => {
            let job = JobConfig::from_args(&args)?;
            let cancel = CancellationToken::new();
            let mut task = tokio::spawn(read::run(job, cancel.clone()));

            tokio::select! {
                result = &mut task => result.context("read task panicked")?,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("interrupted, stopping after the current packet");
                    cancel.cancel();
                    task.await.context("read task panicked")?
                },
            }
        }
    }
}
