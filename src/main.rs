//! The `autoexp` command line tool.

use std::io::IsTerminal;
use std::io::stderr;
use std::path::PathBuf;

use anyhow::Context;
use autoexp::Config;
use autoexp::commands;
use clap::Parser;
use clap::Subcommand;
use clap_verbosity_flag::InfoLevel;
use clap_verbosity_flag::Verbosity;
use colored::Colorize;
use git_testament::git_testament;
use git_testament::render_testament;
use tracing_log::AsTrace;
use tracing_subscriber::EnvFilter;

git_testament!(TESTAMENT);

#[derive(Subcommand)]
enum Commands {
    /// Expands an experiment, writes the job scripts, and supervises every
    /// job until it finishes.
    ///
    /// Jobs are resubmitted whenever the scheduler loses track of them or
    /// their output stops changing.
    Run(commands::run::Args),

    /// Expands an experiment and prints the resulting jobs as JSON.
    Expand(commands::expand::Args),

    /// Displays the configuration.
    Config(commands::config::Args),
}

#[derive(Parser)]
#[command(author, version = render_testament!(TESTAMENT), propagate_version = true, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// The path to a configuration file.
    ///
    /// It is merged over the user and current directory configuration
    /// files.
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

pub async fn inner() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbose.log_level_filter().as_trace().into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(stderr().is_terminal())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Run(args) => commands::run::run(args, config).await,
        Commands::Expand(args) => commands::expand::expand(args),
        Commands::Config(args) => commands::config::config(args, config),
    }
}

#[tokio::main]
pub async fn main() {
    if let Err(e) = inner().await {
        eprintln!(
            "{error}: {e:?}",
            error = if std::io::stderr().is_terminal() {
                "error".red().bold()
            } else {
                "error".normal()
            }
        );
        std::process::exit(1);
    }
}
