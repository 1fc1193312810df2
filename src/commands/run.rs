//! Implementation of the `run` subcommand.

use std::fs;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::Config;
use crate::manager::Manager;
use crate::scheduler::SlurmScheduler;
use crate::shell::Shell;
use crate::template;
use crate::template::JobSpec;
use crate::template::Selection;

/// Arguments to the `run` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The experiment file to run.
    #[clap(value_name = "EXPERIMENT")]
    pub experiment: PathBuf,

    /// The maximum number of jobs present in the scheduler at once.
    ///
    /// Overrides `manager.max_jobs` from the configuration.
    #[clap(short = 'j', long, value_name = "N")]
    pub max_jobs: Option<usize>,

    /// Only runs the jobs whose parameter `KEY` has the value `VALUE`.
    ///
    /// May be repeated; a job must match every selection.
    #[clap(short, long = "select", value_name = "KEY=VALUE")]
    pub selections: Vec<Selection>,

    /// Writes the job scripts and output directories, then exits without
    /// submitting anything.
    #[clap(long)]
    pub dry_run: bool,
}

/// Writes every job's script and creates its output directory.
fn materialize(jobs: &[JobSpec]) -> Result<()> {
    for job in jobs {
        if let Some(parent) = job.sbatch_script.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create directory `{path}` for job `{name}`",
                    path = parent.display(),
                    name = job.name
                )
            })?;
        }

        fs::write(&job.sbatch_script, &job.rendered_config).with_context(|| {
            format!(
                "failed to write script `{path}` for job `{name}`",
                path = job.sbatch_script.display(),
                name = job.name
            )
        })?;

        if let Some(parent) = job.output_file.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create output directory `{path}` for job `{name}`",
                    path = parent.display(),
                    name = job.name
                )
            })?;
        }
    }

    Ok(())
}

/// Runs the `run` subcommand.
pub async fn run(args: Args, config: Config) -> Result<()> {
    let jobs = template::expand(&args.experiment, &args.selections).with_context(|| {
        format!(
            "failed to expand experiment `{path}`",
            path = args.experiment.display()
        )
    })?;

    if jobs.is_empty() {
        warn!(
            "experiment `{path}` describes no jobs",
            path = args.experiment.display()
        );
        return Ok(());
    }

    materialize(&jobs)?;

    if args.dry_run {
        info!("wrote {count} job script(s); not submitting", count = jobs.len());
        return Ok(());
    }

    let max_jobs = args.max_jobs.or(config.manager.max_jobs);
    if max_jobs == Some(0) {
        bail!("the maximum number of jobs must be at least 1");
    }

    let token = CancellationToken::new();
    let shell = Shell::new(&config.scheduler.shell);
    let scheduler = SlurmScheduler::new(config.scheduler, token.clone())
        .context("invalid scheduler configuration")?;

    let manager = Manager::builder()
        .scheduler(Arc::new(scheduler))
        .maybe_max_jobs(max_jobs)
        .shell(shell)
        .token(token.clone())
        .build();

    let mut supervise = pin!(manager.supervise_all(jobs));
    let reports = loop {
        select! {
            // Always prefer the CTRL-C signal to supervision completing.
            biased;

            _ = tokio::signal::ctrl_c(), if !token.is_cancelled() => {
                error!("interrupted: canceling supervision of every job");
                token.cancel();
            }
            res = &mut supervise => break res?,
        }
    };

    if token.is_cancelled() {
        bail!("supervision was interrupted");
    }

    let unfinished = reports
        .iter()
        .filter(|r| !r.outcome.is_success())
        .collect::<Vec<_>>();

    if !unfinished.is_empty() {
        for report in &unfinished {
            error!("job `{name}` {outcome}", name = report.name, outcome = report.outcome);
        }

        bail!(
            "{count} of {total} job(s) did not finish",
            count = unfinished.len(),
            total = reports.len()
        );
    }

    info!("all {count} job(s) finished", count = reports.len());
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn materializes_scripts_and_output_directories() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobSpec::builder()
            .name("a")
            .template(dir.path().join("job.tpl"))
            .rendered_config("#!/bin/bash\necho a\n")
            .output_file(dir.path().join("logs/a/out.log"))
            .cmd("sbatch a.sbatch")
            .sbatch_script(dir.path().join("scripts/a.sbatch"))
            .build();

        materialize(&[job]).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("scripts/a.sbatch")).unwrap(),
            "#!/bin/bash\necho a\n"
        );
        assert!(dir.path().join("logs/a").is_dir());
        assert!(!dir.path().join("logs/a/out.log").exists());
    }
}
