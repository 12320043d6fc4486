mod cli;
mod commands;
mod config;
mod engine;
mod provider;
mod signals;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Config;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: Config::load(cli.config.as_deref())?,
    };
    log::debug!("verbosity {}, config {:?}", ctx.verbose, ctx.config);

    let code = match cli.command {
        Command::Resource(args) => commands::resource::run(&ctx, args)?,
        Command::Apply(args) => commands::apply::run(&ctx, args)?,
        Command::Graph { catalog } => {
            commands::graph::run(&ctx, &catalog)?;
            0
        }
        Command::Providers { type_name } => {
            commands::providers::run(&ctx, type_name.as_deref())?;
            0
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "converge", &mut io::stdout());
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
