//! Implementation of the `config` subcommand.

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;

use crate::Config;

/// Arguments to the `config` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// The `config` subcommand to run.
    #[command(subcommand)]
    command: ConfigSubcommand,
}

/// Subcommands for the `config` command.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Prints the default configuration.
    Init,

    /// Prints the effective configuration after merging every source.
    Resolve,
}

/// Runs the `config` subcommand.
pub fn config(args: Args, config: Config) -> Result<()> {
    let config = match args.command {
        ConfigSubcommand::Init => Config::default(),
        ConfigSubcommand::Resolve => config,
    };

    let text = toml::to_string_pretty(&config).context("failed to serialize configuration")?;
    print!("{text}");
    Ok(())
}
