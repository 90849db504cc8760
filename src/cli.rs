use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::privilege::PrivilegeMethod;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the given config to an image root
    Customize(CustomizeArgs),

    /// Validate the given YAML config
    Validate(ValidateArgs),

    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct CustomizeArgs {
    /// Path to the YAML file defining the customization
    #[arg(short, long, default_value = "config.yaml")]
    pub config: Utf8PathBuf,

    /// Root directory of the image to customize
    #[arg(short, long)]
    pub image_root: Utf8PathBuf,

    /// Scratch directory for the run (package cache)
    #[arg(short, long)]
    pub build_dir: Utf8PathBuf,

    /// Directory of RPMs to offer as an extra repository (repeatable)
    #[arg(long = "rpm-source", value_name = "DIR")]
    pub rpm_sources: Vec<Utf8PathBuf>,

    /// Do not use the package repositories configured inside the image
    #[arg(long)]
    pub disable_base_image_rpm_repos: bool,

    /// Run mount, umount and chroot through this privilege escalation tool.
    /// File copies and writes into the image still run as the invoking user,
    /// so the image root must be writable by it (usually: run as root)
    #[arg(long, value_enum)]
    pub privilege: Option<PrivilegeMethod>,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,

    /// Do not run, just show what would be done
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the YAML file to validate
    #[arg(short, long, default_value = "config.yaml")]
    pub config: Utf8PathBuf,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Log levels for the `--log-level` option, mapped onto `tracing` levels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

pub fn parse_args() -> Result<Cli> {
    Ok(Cli::parse())
}
