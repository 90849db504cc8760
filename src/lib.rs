pub mod blob;
pub mod cli;
pub mod config;
pub mod customize;
pub mod error;
pub mod executor;
pub mod fsutil;
pub mod isolation;
pub mod pipeline;
pub mod privilege;

pub use error::CustomizeError;

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::executor::CommandExecutor;
use crate::isolation::Chroot;
use crate::pipeline::{Customizer, Pipeline};

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

/// Loads, validates and applies a config to an image root.
pub fn run_customize(opts: &cli::CustomizeArgs, executor: Arc<dyn CommandExecutor>) -> Result<()> {
    let loaded = config::load_config(&opts.config)
        .with_context(|| format!("failed to load config from {}", opts.config))?;
    loaded.validate().context("config validation failed")?;

    if !opts.dry_run && !opts.build_dir.exists() {
        fs::create_dir_all(&opts.build_dir)
            .with_context(|| format!("failed to create build directory: {}", opts.build_dir))?;
    }

    let chroot = Chroot::new(&opts.image_root, executor, opts.privilege, opts.dry_run)
        .with_context(|| format!("failed to open image root {}", opts.image_root))?;

    let customizer = Customizer::new(
        &loaded.config.system_config,
        &loaded.base_config_path,
        &opts.build_dir,
    )
    .with_rpm_sources(opts.rpm_sources.clone())
    .with_base_image_rpm_repos(!opts.disable_base_image_rpm_repos);

    Pipeline::new().run(&customizer, &chroot)
}

pub fn run_validate(opts: &cli::ValidateArgs) -> Result<()> {
    let loaded = config::load_config(&opts.config)?;
    loaded.validate().context("config validation failed")?;
    info!("validation successful:\n{:#?}", loaded.config);
    Ok(())
}
