//! Implementation of the batch scheduler interface.
//!
//! The supervisor only talks to the scheduler through the [`Scheduler`]
//! trait. [`SlurmScheduler`] implements it by shelling out to the Slurm
//! command line tools.

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SchedulerConfig;
use crate::shell::Shell;
use crate::shell::ShellError;
use crate::template::placeholder;

/// The placeholder for a job handle in command templates.
const JOB_ID: &str = "job_id";

/// The placeholder for a job name in command templates.
const JOB_NAME: &str = "job_name";

/// A regex that matches a job handle at the start of a line.
static HANDLE_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: this is checked statically with tests to always unwrap.
    Regex::new(r"^\s*([0-9]\S*)").unwrap()
});

/// An error that occurs when talking to the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A scheduler command failed.
    #[error(transparent)]
    Shell(#[from] ShellError),
    /// A command template references an unsupported placeholder.
    #[error(
        "command template `{template}` for `{setting}` references unknown placeholder `{name}` \
         (expected `{{{expected}}}`)"
    )]
    Template {
        /// The name of the setting holding the template.
        setting: &'static str,
        /// The command template.
        template: String,
        /// The unknown placeholder.
        name: String,
        /// The placeholder the template may use.
        expected: &'static str,
    },
}

/// An opaque identifier assigned to a job by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobHandle(String);

impl JobHandle {
    /// Constructs a new job handle.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gets the handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Determines if the handle appears in the given scheduler output.
    pub fn is_present_in(&self, output: &str) -> bool {
        output.contains(&self.0)
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The operations the supervisor needs from a batch scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Runs a submit command, returning its raw output.
    ///
    /// The caller extracts the job handle from the output.
    async fn submit(&self, command: &str) -> Result<String, SchedulerError>;

    /// Queries the scheduler for a job in any state.
    ///
    /// The job is present if its handle appears in the returned text.
    async fn query(&self, handle: &JobHandle) -> Result<String, SchedulerError>;

    /// Queries the scheduler for a running job.
    ///
    /// The job is running if its handle appears in the returned text.
    async fn query_running(&self, handle: &JobHandle) -> Result<String, SchedulerError>;

    /// Finds the handles of the jobs with the given name.
    async fn query_by_name(&self, name: &str) -> Result<Vec<JobHandle>, SchedulerError>;

    /// Cancels a job.
    async fn cancel(&self, handle: &JobHandle) -> Result<(), SchedulerError>;
}

/// Parses job handles from the output of a lookup command.
///
/// Lines that do not start with a digit (e.g. headers) are ignored.
pub fn parse_handles(output: &str) -> Vec<JobHandle> {
    output
        .lines()
        .filter_map(|line| HANDLE_LINE_REGEX.captures(line))
        .filter_map(|c| c.get(1))
        .map(|m| JobHandle::new(m.as_str()))
        .collect()
}

/// A scheduler backed by the Slurm command line tools.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    /// The scheduler configuration.
    config: SchedulerConfig,
    /// The shell used to run commands.
    shell: Shell,
    /// The token canceling in-flight commands.
    token: CancellationToken,
}

impl SlurmScheduler {
    /// Constructs a new Slurm scheduler.
    ///
    /// Returns an error if a command template references a placeholder other
    /// than the one it is rendered with.
    pub fn new(config: SchedulerConfig, token: CancellationToken) -> Result<Self, SchedulerError> {
        for (setting, template, expected) in [
            ("status_command", &config.status_command, JOB_ID),
            ("running_command", &config.running_command, JOB_ID),
            ("cancel_command", &config.cancel_command, JOB_ID),
            ("lookup_command", &config.lookup_command, JOB_NAME),
        ] {
            if let Some(name) = placeholder::placeholders(template).find(|n| *n != expected) {
                return Err(SchedulerError::Template {
                    setting,
                    template: template.clone(),
                    name: name.to_string(),
                    expected,
                });
            }
        }

        Ok(Self {
            shell: Shell::new(&config.shell),
            config,
            token,
        })
    }

    /// Renders a command template with the given placeholder value.
    ///
    /// Escaped braces become literal braces; any other placeholder is kept
    /// as written.
    fn render(template: &str, name: &str, value: &str) -> String {
        let lookup = |n: &str| {
            Some(if n == name {
                value.to_string()
            } else {
                format!("{{{n}}}")
            })
        };

        match placeholder::render(template, lookup) {
            Ok(command) => command,
            Err(_) => template.to_string(),
        }
    }

    /// Runs a command.
    async fn run(&self, command: &str) -> Result<String, SchedulerError> {
        debug!(command, "running scheduler command");
        Ok(self.shell.run(command, &self.token).await?)
    }
}

#[async_trait]
impl Scheduler for SlurmScheduler {
    async fn submit(&self, command: &str) -> Result<String, SchedulerError> {
        self.run(command).await
    }

    async fn query(&self, handle: &JobHandle) -> Result<String, SchedulerError> {
        self.run(&Self::render(
            &self.config.status_command,
            JOB_ID,
            handle.as_str(),
        ))
        .await
    }

    async fn query_running(&self, handle: &JobHandle) -> Result<String, SchedulerError> {
        self.run(&Self::render(
            &self.config.running_command,
            JOB_ID,
            handle.as_str(),
        ))
        .await
    }

    async fn query_by_name(&self, name: &str) -> Result<Vec<JobHandle>, SchedulerError> {
        let output = self
            .run(&Self::render(&self.config.lookup_command, JOB_NAME, name))
            .await?;
        Ok(parse_handles(&output))
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), SchedulerError> {
        self.run(&Self::render(
            &self.config.cancel_command,
            JOB_ID,
            handle.as_str(),
        ))
        .await
        .map(|_| ())
    }
}
