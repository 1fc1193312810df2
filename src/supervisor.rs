//! Implementation of the job supervisor.
//!
//! A supervisor keeps a single job alive until it finishes:
//!
//! ```text
//! RESOLVING_IDENTITY -> GATED -> SUBMITTING -> POLLING -> STALL_CHECK -> POLLING
//!                         ^                       |             |
//!                         +------ relaunch -------+-------------+
//! ```
//!
//! Whenever the scheduler loses track of the job or the job stops producing
//! output, it is submitted again, unless its termination predicate reports
//! that it finished.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::limiter::Canceled;
use crate::limiter::JobLimiter;
use crate::scheduler::JobHandle;
use crate::scheduler::Scheduler;
use crate::shell::Shell;
use crate::shell::ShellError;
use crate::template::JobSpec;

/// The outcome of supervising a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The job reported that it finished.
    Finished,
    /// More than one job with the same name was found in the scheduler, so
    /// the job could not be identified.
    DuplicateName(Vec<JobHandle>),
    /// Supervision was canceled.
    Canceled,
}

impl Outcome {
    /// Determines if the outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => write!(f, "finished"),
            Self::DuplicateName(handles) => {
                write!(f, "aborted: duplicate jobs in the scheduler (")?;
                for (i, handle) in handles.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }

                    write!(f, "{handle}")?;
                }

                write!(f, ")")
            }
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// The state of a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Looking up an existing job with the same name.
    ResolvingIdentity,
    /// Waiting for the start condition.
    ///
    /// Holds the handle of an existing job to resume, if any.
    Gated(Option<JobHandle>),
    /// Submitting (or resuming) the job.
    Submitting(Option<JobHandle>),
    /// Checking the job's presence in the scheduler.
    Polling(JobHandle),
    /// Checking whether the running job is still producing output.
    StallCheck(JobHandle),
    /// Supervision stopped.
    Done(Outcome),
}

/// The resources shared by every supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorContext {
    /// The scheduler to talk to.
    pub scheduler: Arc<dyn Scheduler>,
    /// The limiter bounding the number of jobs in the scheduler.
    pub limiter: JobLimiter,
    /// The shell running start conditions and termination commands.
    pub shell: Shell,
    /// The token canceling supervision.
    pub token: CancellationToken,
}

/// Supervises a single job until it finishes.
#[derive(Debug)]
pub struct Supervisor {
    /// The supervised job.
    job: JobSpec,
    /// The shared resources.
    context: SupervisorContext,
    /// Whether the job currently holds a slot of the limiter.
    holding_slot: bool,
}

impl Supervisor {
    /// Constructs a new supervisor for the given job.
    pub fn new(job: JobSpec, context: SupervisorContext) -> Self {
        Self {
            job,
            context,
            holding_slot: false,
        }
    }

    /// Runs the supervisor until the job finishes, supervision is aborted,
    /// or the token is canceled.
    pub async fn run(mut self) -> Outcome {
        if !self.job.has_termination() {
            warn!("job has no termination predicate and will be supervised until interrupted");
        }

        let mut state = State::ResolvingIdentity;
        let outcome = loop {
            debug!(?state, "supervisor state");
            state = match self.step(state).await {
                Ok(State::Done(outcome)) => break outcome,
                Ok(next) => next,
                Err(Canceled) => break Outcome::Canceled,
            };
        };

        self.release_slot();
        outcome
    }

    /// Performs a single state transition.
    async fn step(&mut self, state: State) -> Result<State, Canceled> {
        match state {
            State::ResolvingIdentity => self.resolve_identity().await,
            State::Gated(resume) => self.gate(resume).await,
            State::Submitting(resume) => self.submit(resume).await,
            State::Polling(handle) => self.poll(handle).await,
            State::StallCheck(handle) => self.check_stall(handle).await,
            State::Done(outcome) => Ok(State::Done(outcome)),
        }
    }

    /// Looks up an existing job with the same name in the scheduler.
    async fn resolve_identity(&mut self) -> Result<State, Canceled> {
        let result = self
            .cancellable(self.context.scheduler.query_by_name(&self.job.name))
            .await?;

        let mut handles = match result {
            Ok(handles) => handles,
            Err(e) => {
                warn!(
                    "failed to look up existing jobs: {e}; retrying in {interval:?}",
                    interval = self.job.check_interval
                );
                self.sleep().await?;
                return Ok(State::ResolvingIdentity);
            }
        };

        if handles.len() > 1 {
            error!(
                "found {count} jobs named `{name}` in the scheduler: job names must be unique",
                count = handles.len(),
                name = self.job.name
            );
            return Ok(State::Done(Outcome::DuplicateName(handles)));
        }

        match handles.pop() {
            Some(handle) => {
                info!(%handle, "found existing job");
                self.context.limiter.account();
                self.holding_slot = true;
                Ok(State::Gated(Some(handle)))
            }
            None => {
                debug!("no existing job found");
                Ok(State::Gated(None))
            }
        }
    }

    /// Checks for completion and waits for the start condition.
    async fn gate(&mut self, resume: Option<JobHandle>) -> Result<State, Canceled> {
        if self.is_done().await? {
            info!("job finished");
            return Ok(State::Done(Outcome::Finished));
        }

        let Some(command) = &self.job.start_condition_cmd else {
            return Ok(State::Submitting(resume));
        };

        debug!(command, "checking start condition");
        match self.run_shell(command).await? {
            Ok(output) if reports_one(&output) => Ok(State::Submitting(resume)),
            Ok(output) => {
                info!(
                    "start condition reported `{output}`; checking again in {interval:?}",
                    output = output.trim(),
                    interval = self.job.check_interval
                );
                self.sleep().await?;
                Ok(State::Gated(resume))
            }
            Err(e) => {
                warn!(
                    "start condition failed: {e}; checking again in {interval:?}",
                    interval = self.job.check_interval
                );
                self.sleep().await?;
                Ok(State::Gated(resume))
            }
        }
    }

    /// Resumes the existing job or submits a new one.
    async fn submit(&mut self, resume: Option<JobHandle>) -> Result<State, Canceled> {
        if let Some(handle) = resume {
            info!(%handle, "resuming existing job");
            return Ok(State::Polling(handle));
        }

        if !self.holding_slot {
            self.context.limiter.acquire(&self.context.token).await?;
            self.holding_slot = true;
        }

        let result = self
            .cancellable(self.context.scheduler.submit(&self.job.cmd))
            .await?;

        let reason = match result {
            Ok(output) => match self.job.job_id_regexp.extract(&output) {
                Some(id) => {
                    let handle = JobHandle::new(id);
                    info!(%handle, "submitted job");
                    return Ok(State::Polling(handle));
                }
                None => format!(
                    "no job handle matching `{pattern}` in output `{output}`",
                    pattern = self.job.job_id_regexp,
                    output = output.trim()
                ),
            },
            Err(e) => e.to_string(),
        };

        warn!(
            "failed to submit job: {reason}; retrying in {interval:?}",
            interval = self.job.check_interval
        );
        self.release_slot();
        self.sleep().await?;
        Ok(State::Gated(None))
    }

    /// Checks the presence of the job in the scheduler.
    async fn poll(&mut self, handle: JobHandle) -> Result<State, Canceled> {
        let result = self
            .cancellable(self.context.scheduler.query(&handle))
            .await?;

        match result {
            Ok(output) if handle.is_present_in(&output) => {}
            Ok(_) => {
                self.release_slot();
                if self.is_done().await? {
                    info!(%handle, "job finished");
                    return Ok(State::Done(Outcome::Finished));
                }

                warn!(%handle, "job is no longer in the scheduler; relaunching");
                return Ok(State::Gated(None));
            }
            Err(e) => {
                self.release_slot();
                if self.is_done().await? {
                    info!(%handle, "job finished");
                    return Ok(State::Done(Outcome::Finished));
                }

                warn!(
                    %handle,
                    "failed to query job: {e}; relaunching in {interval:?}",
                    interval = self.job.check_interval
                );
                self.sleep().await?;
                return Ok(State::Gated(None));
            }
        }

        let result = self
            .cancellable(self.context.scheduler.query_running(&handle))
            .await?;

        match result {
            Ok(output) if handle.is_present_in(&output) => {
                info!(%handle, "job is running");
                Ok(State::StallCheck(handle))
            }
            Ok(_) => {
                debug!(%handle, "job is waiting in the scheduler");
                self.sleep().await?;
                Ok(State::Polling(handle))
            }
            Err(e) => {
                warn!(%handle, "failed to query whether the job is running: {e}");
                self.sleep().await?;
                Ok(State::Polling(handle))
            }
        }
    }

    /// Checks whether the running job's output changes over one interval.
    async fn check_stall(&mut self, handle: JobHandle) -> Result<State, Canceled> {
        let path = &self.job.output_file;
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!(%handle, path = %path.display(), "output file does not exist yet");
            self.sleep().await?;
            return Ok(State::Polling(handle));
        }

        debug!(%handle, "checking whether the job is stalled");
        let before = snapshot(&self.job).await;
        self.sleep().await?;
        let after = snapshot(&self.job).await;

        if before.is_empty() || before != after {
            return Ok(State::Polling(handle));
        }

        warn!(
            %handle,
            "job output has not changed in {interval:?}; canceling and relaunching",
            interval = self.job.check_interval
        );

        if let Err(e) = self
            .cancellable(self.context.scheduler.cancel(&handle))
            .await?
        {
            warn!(%handle, "failed to cancel job: {e}");
        }

        self.release_slot();
        Ok(State::Gated(None))
    }

    /// Evaluates the termination predicate of the job.
    ///
    /// A job without a predicate never finishes.
    async fn is_done(&self) -> Result<bool, Canceled> {
        if let Some(pattern) = &self.job.termination_str
            && let Ok(bytes) = tokio::fs::read(&self.job.output_file).await
            && pattern.regex().is_match(&String::from_utf8_lossy(&bytes))
        {
            return Ok(true);
        }

        if let Some(command) = &self.job.termination_cmd {
            match self.run_shell(command).await? {
                Ok(output) => return Ok(reports_one(&output)),
                Err(e) => warn!("termination command failed: {e}"),
            }
        }

        Ok(false)
    }

    /// Releases the job's limiter slot if it holds one.
    fn release_slot(&mut self) {
        if self.holding_slot {
            self.context.limiter.release();
            self.holding_slot = false;
        }
    }

    /// Sleeps for one check interval.
    async fn sleep(&self) -> Result<(), Canceled> {
        self.cancellable(tokio::time::sleep(self.job.check_interval))
            .await
    }

    /// Runs a shell command.
    async fn run_shell(&self, command: &str) -> Result<Result<String, ShellError>, Canceled> {
        match self.context.shell.run(command, &self.context.token).await {
            Err(ShellError::Canceled { .. }) => Err(Canceled),
            result => Ok(result),
        }
    }

    /// Awaits the given future unless the token is canceled first.
    async fn cancellable<F: Future>(&self, future: F) -> Result<F::Output, Canceled> {
        tokio::select! {
            biased;
            _ = self.context.token.cancelled() => Err(Canceled),
            output = future => Ok(output),
        }
    }
}

/// Determines if command output reports `1`.
fn reports_one(output: &str) -> bool {
    output.trim().parse::<i64>() == Ok(1)
}

/// Reads the job's output file, returning nothing if it cannot be read.
async fn snapshot(job: &JobSpec) -> Vec<u8> {
    tokio::fs::read(&job.output_file).await.unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_reports() {
        assert!(reports_one("1\n"));
        assert!(reports_one(" 01 "));
        assert!(!reports_one("0"));
        assert!(!reports_one("yes"));
        assert!(!reports_one(""));
    }

    #[test]
    fn outcome_display() {
        assert_eq!(Outcome::Finished.to_string(), "finished");
        assert_eq!(
            Outcome::DuplicateName(vec![JobHandle::new("1"), JobHandle::new("2")]).to_string(),
            "aborted: duplicate jobs in the scheduler (1, 2)"
        );
        assert!(!Outcome::Canceled.is_success());
    }
}
