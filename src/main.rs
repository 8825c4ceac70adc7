use std::io;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;
use rsimgstrap::cli::{self, Cli, Commands};
use rsimgstrap::executor::{CommandExecutor, RealCommandExecutor};

fn run(args: Cli) -> Result<()> {
    if let Some(log_level) = args.command.log_level() {
        rsimgstrap::init_logging(log_level)?;
    }

    match &args.command {
        Commands::Apply(opts) => {
            let executor: Arc<dyn CommandExecutor> = Arc::new(RealCommandExecutor {
                dry_run: opts.dry_run,
            });
            rsimgstrap::run_apply(opts, executor)
        }
        Commands::Validate(opts) => rsimgstrap::run_validate(opts),
        Commands::Distros => {
            print!("{}", rsimgstrap::distro_listing());
            Ok(())
        }
        Commands::Completions(opts) => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(opts.shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}

fn main() {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
