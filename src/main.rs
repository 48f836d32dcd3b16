mod cli;
mod commands;
mod config;
mod engine;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// rabbitmqctl path from the command line or environment
    pub ctl: Option<String>,
    /// HOME for rabbitmqctl from the command line or environment
    pub home: Option<String>,
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
        ctl: cli.ctl,
        home: cli.home,
    };

    match cli.command {
        Command::Status(args) => commands::status::run(&ctx, &args),
        Command::Users(args) => commands::users::run(&ctx, &args),
        Command::Diff(args) => commands::converge::diff(&ctx, &args),
        Command::Apply(args) => commands::converge::apply(&ctx, &args),
        Command::Wait(args) => commands::wait::run(&ctx, &args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rabbitsync", &mut io::stdout());
            Ok(())
        }
    }
}
