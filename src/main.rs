use std::io;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;
use tracing::error;

use imgcustomizer::cli::{self, Cli};
use imgcustomizer::executor::RealCommandExecutor;

fn main() -> Result<()> {
    let args = cli::parse_args()?;

    let log_level = match &args.command {
        cli::Commands::Customize(opts) => opts.log_level,
        cli::Commands::Validate(opts) => opts.log_level,
        cli::Commands::Completions(opts) => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(opts.shell, &mut cmd, name, &mut io::stdout());
            return Ok(());
        }
    };

    imgcustomizer::init_logging(log_level)?;

    let result = match &args.command {
        cli::Commands::Customize(opts) => {
            let executor = Arc::new(RealCommandExecutor {
                dry_run: opts.dry_run,
            });
            imgcustomizer::run_customize(opts, executor)
        }
        cli::Commands::Validate(opts) => imgcustomizer::run_validate(opts),
        cli::Commands::Completions(_) => Ok(()),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}
