pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod distro;
pub mod engine;
pub mod environment;
pub mod error;
pub mod executor;
mod fsutil;
pub mod isolation;
pub mod messenger;
pub mod target;

pub use error::RsimgstrapError;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::distro::{DistroKind, StrategyContext};
use crate::engine::Engine;
use crate::executor::CommandExecutor;
use crate::messenger::{Messenger, TracingMessenger};
use crate::target::{BlockDeviceTarget, DirectoryTarget, TargetConfig, TargetFilesystem};

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(filter).finish(),
    )
    .context("failed to set global default tracing subscriber")
}

fn build_target(
    config: &TargetConfig,
    executor: &Arc<dyn CommandExecutor>,
) -> Box<dyn TargetFilesystem> {
    match config {
        TargetConfig::Directory { path } => {
            Box::new(DirectoryTarget::new(path, Arc::clone(executor)))
        }
        TargetConfig::Device { device } => {
            Box::new(BlockDeviceTarget::new(device, Arc::clone(executor)))
        }
    }
}

/// Builds the image described by the profile in `opts`.
pub fn run_apply(opts: &cli::ApplyArgs, executor: Arc<dyn CommandExecutor>) -> Result<()> {
    let profile = config::load_profile(opts.common.file.as_path())
        .with_context(|| format!("failed to load profile from {}", opts.common.file))?;
    profile.validate().context("profile validation failed")?;

    let messenger: Arc<dyn Messenger> = Arc::new(TracingMessenger);
    let ctx = StrategyContext {
        messenger: Arc::clone(&messenger),
        executor: Arc::clone(&executor),
        cache_dir: profile.cache_dir.clone(),
        resolv_conf: profile.resolv_conf.clone(),
        jobs: profile.jobs,
    };
    let strategy = profile
        .distro
        .as_strategy(&ctx)
        .with_context(|| format!("failed to set up {} strategy", profile.distro.kind()))?;
    let target = build_target(&profile.target, &executor);

    let mut engine = Engine::new(
        strategy.as_ref(),
        target,
        executor,
        messenger,
        profile.engine_options(),
    );
    engine.run()
}

pub fn run_validate(opts: &cli::ValidateArgs) -> Result<()> {
    let profile = config::load_profile(opts.common.file.as_path())?;
    profile.validate().context("profile validation failed")?;
    info!("validation successful:\n{:#?}", profile);
    Ok(())
}

/// Lists the supported distributions, one `key<TAB>name` line each.
pub fn distro_listing() -> String {
    DistroKind::all()
        .into_iter()
        .map(|kind| format!("{}\t{}\n", kind.key(), kind.name_long()))
        .collect()
}
