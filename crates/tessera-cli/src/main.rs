//! Tessera CLI: the `tessera` command.

mod cli;
mod commands;
mod support;

use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    let config = support::load_config_or_exit(cli.config.as_deref());
    support::init_tracing(&config);

    match cli.command {
        Commands::Plan { capability, json } => commands::plan::run(config, capability, json),

        Commands::Invoke {
            capability,
            method,
            args,
            json,
        } => commands::invoke::run(config, capability, method, args, json),

        Commands::Check { json } => commands::check::run(config, json),
    }
}
