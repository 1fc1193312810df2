//! Implementation of the job manager.
//!
//! The manager runs one [`Supervisor`] per job concurrently, all sharing a
//! single [`JobLimiter`].

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::error;
use tracing::info;
use tracing::info_span;

use crate::limiter::JobLimiter;
use crate::scheduler::Scheduler;
use crate::shell::Shell;
use crate::supervisor::Outcome;
use crate::supervisor::Supervisor;
use crate::supervisor::SupervisorContext;
use crate::template::JobSpec;

/// An error that occurs when managing jobs.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Two jobs share the same name, so they cannot be told apart in the
    /// scheduler.
    #[error("more than one job is named `{0}`: job names must be unique")]
    DuplicateJobName(String),
    /// The ceiling on jobs in the scheduler is zero, so no job could ever be
    /// submitted.
    #[error("the maximum number of jobs in the scheduler must be at least 1")]
    ZeroCeiling,
}

/// The result of supervising one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// The name of the job.
    pub name: String,
    /// The outcome of supervising the job.
    pub outcome: Outcome,
}

/// Supervises every job until each one finished or was aborted.
#[derive(Debug, bon::Builder)]
pub struct Manager {
    /// The scheduler the jobs run in.
    scheduler: Arc<dyn Scheduler>,
    /// The maximum number of jobs present in the scheduler at once.
    max_jobs: Option<usize>,
    /// The shell running start conditions and termination commands.
    #[builder(default)]
    shell: Shell,
    /// The token canceling supervision.
    #[builder(default)]
    token: CancellationToken,
}

impl Manager {
    /// Supervises the given jobs concurrently.
    ///
    /// Returns the report of every job in the order the jobs were given. An
    /// aborted supervisor does not affect the others.
    pub async fn supervise_all(&self, jobs: Vec<JobSpec>) -> Result<Vec<JobReport>, ManagerError> {
        if self.max_jobs == Some(0) {
            return Err(ManagerError::ZeroCeiling);
        }

        let mut names = HashSet::new();
        for job in &jobs {
            if !names.insert(job.name.as_str()) {
                return Err(ManagerError::DuplicateJobName(job.name.clone()));
            }
        }

        let context = SupervisorContext {
            scheduler: self.scheduler.clone(),
            limiter: JobLimiter::new(self.max_jobs),
            shell: self.shell.clone(),
            token: self.token.clone(),
        };

        info!(
            "supervising {count} job(s){limit}",
            count = jobs.len(),
            limit = self
                .max_jobs
                .map(|n| format!(" with at most {n} in the scheduler"))
                .unwrap_or_default()
        );

        let mut set = JoinSet::new();
        let mut reports = Vec::with_capacity(jobs.len());
        for (index, job) in jobs.into_iter().enumerate() {
            let name = job.name.clone();
            let span = info_span!("job", name = %name);
            let supervisor = Supervisor::new(job, context.clone());
            set.spawn(async move { (index, supervisor.run().await) }.instrument(span));
            reports.push(JobReport {
                name,
                outcome: Outcome::Canceled,
            });
        }

        while let Some(result) = set.join_next().await {
            match result {
                Ok((index, outcome)) => {
                    info!(
                        "job `{name}` {outcome}",
                        name = reports[index].name
                    );
                    reports[index].outcome = outcome;
                }
                Err(e) => {
                    // A panicking supervisor is reported as canceled
                    error!("job supervisor failed: {e}");
                }
            }
        }

        Ok(reports)
    }
}
