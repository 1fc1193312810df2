//! Implementation of the `expand` subcommand.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;

use crate::template;
use crate::template::Selection;

/// Arguments to the `expand` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The experiment file to expand.
    #[clap(value_name = "EXPERIMENT")]
    pub experiment: PathBuf,

    /// Only expands the jobs whose parameter `KEY` has the value `VALUE`.
    ///
    /// May be repeated; a job must match every selection.
    #[clap(short, long = "select", value_name = "KEY=VALUE")]
    pub selections: Vec<Selection>,
}

/// Runs the `expand` subcommand.
///
/// The expanded jobs are printed as JSON; nothing is written or submitted.
pub fn expand(args: Args) -> Result<()> {
    let jobs = template::expand(&args.experiment, &args.selections).with_context(|| {
        format!(
            "failed to expand experiment `{path}`",
            path = args.experiment.display()
        )
    })?;

    println!(
        "{}",
        serde_json::to_string_pretty(&jobs).context("failed to serialize jobs")?
    );
    Ok(())
}
