//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use autoexp::scheduler::JobHandle;
use autoexp::scheduler::Scheduler;
use autoexp::scheduler::SchedulerError;
use autoexp::shell::ShellError;
use autoexp::template::JobSpec;
use autoexp::template::job::Pattern;
use tokio::time::Instant;

/// The check interval used by test jobs.
pub const INTERVAL: Duration = Duration::from_secs(60);

/// How the fake scheduler replies to a submission.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Replies with output that contains no job handle.
    Garbage,
    /// Accepts the job, which then runs until it is canceled.
    Run,
    /// Accepts the job and writes to its output file; the job then runs until
    /// it is canceled.
    RunWriting {
        /// The output file.
        path: PathBuf,
        /// The content written.
        content: String,
    },
    /// Accepts the job, which runs for the given number of status queries
    /// and then leaves the queue after writing to its output file.
    Complete {
        /// The number of status queries the job stays queued for.
        polls: usize,
        /// The output file.
        path: PathBuf,
        /// The content written.
        content: String,
    },
    /// Like [`Reply::Complete`], except the job never starts running: it is
    /// listed by status queries but never by running queries.
    Pending {
        /// The number of status queries the job stays queued for.
        polls: usize,
        /// The output file.
        path: PathBuf,
        /// The content written.
        content: String,
    },
}

/// A job known to the fake scheduler.
#[derive(Debug)]
struct FakeJob {
    /// The remaining status queries before the job completes, if it does.
    remaining: Option<usize>,
    /// The output written when the job completes.
    output: Option<(PathBuf, String)>,
    /// Whether the job is waiting for resources instead of running.
    pending: bool,
}

/// The state of the fake scheduler.
#[derive(Debug, Default)]
struct FakeState {
    /// The last assigned job id.
    last_id: u64,
    /// Scripted replies, by submit command.
    replies: HashMap<String, VecDeque<Reply>>,
    /// The jobs currently in the queue.
    queue: HashMap<String, FakeJob>,
    /// The largest number of jobs queued at once.
    max_queued: usize,
    /// Every submission, in order.
    submissions: Vec<(String, Instant)>,
    /// Every canceled handle, in order.
    cancels: Vec<String>,
    /// Handles returned by name lookups, by job name.
    existing: HashMap<String, Vec<String>>,
    /// Whether status queries fail.
    fail_queries: bool,
    /// When each running query was made, in order.
    running_queries: Vec<Instant>,
}

/// A scheduler that keeps its queue in memory.
#[derive(Debug, Default)]
pub struct FakeScheduler {
    /// The scheduler state.
    state: Mutex<FakeState>,
}

impl FakeScheduler {
    /// Creates an empty fake scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the replies to the given submit command.
    ///
    /// Once the script is exhausted, submissions reply with [`Reply::Run`].
    pub fn script(&self, command: &str, replies: impl IntoIterator<Item = Reply>) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(command.to_string(), replies.into_iter().collect());
    }

    /// Adds a job already present in the scheduler under the given name.
    pub fn existing(&self, name: &str, id: &str, queued: bool) {
        let mut state = self.state.lock().unwrap();
        state
            .existing
            .entry(name.to_string())
            .or_default()
            .push(id.to_string());

        if queued {
            state.queue.insert(
                id.to_string(),
                FakeJob {
                    remaining: None,
                    output: None,
                    pending: false,
                },
            );
        }
    }

    /// Makes every status query fail.
    pub fn fail_queries(&self) {
        self.state.lock().unwrap().fail_queries = true;
    }

    /// Gets the submitted commands and when they were submitted.
    pub fn submissions(&self) -> Vec<(String, Instant)> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Gets the canceled handles.
    pub fn cancels(&self) -> Vec<String> {
        self.state.lock().unwrap().cancels.clone()
    }

    /// Gets when each running query was made.
    pub fn running_queries(&self) -> Vec<Instant> {
        self.state.lock().unwrap().running_queries.clone()
    }

    /// Gets the largest number of jobs queued at once.
    pub fn max_queued(&self) -> usize {
        self.state.lock().unwrap().max_queued
    }

    /// Lists the given handles in the output format of `squeue`.
    fn listing<'a>(ids: impl Iterator<Item = &'a String>) -> String {
        let mut output = String::from("JOBID PARTITION NAME\n");
        for id in ids {
            output.push_str(&format!("{id} gpu job\n"));
        }

        output
    }

    /// Builds a failed query error.
    fn query_error(handle: &JobHandle) -> SchedulerError {
        SchedulerError::Shell(ShellError::Spawn {
            shell: "sh".to_string(),
            command: format!("squeue -j {handle}"),
            source: std::io::Error::other("slurm_load_jobs error: Socket timed out"),
        })
    }
}

#[async_trait]
impl Scheduler for FakeScheduler {
    async fn submit(&self, command: &str) -> Result<String, SchedulerError> {
        let mut state = self.state.lock().unwrap();
        state
            .submissions
            .push((command.to_string(), Instant::now()));

        let reply = state
            .replies
            .get_mut(command)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Run);

        let job = match reply {
            Reply::Garbage => return Ok("sbatch: error: Batch job submission failed\n".into()),
            Reply::Run => FakeJob {
                remaining: None,
                output: None,
                pending: false,
            },
            Reply::RunWriting { path, content } => {
                std::fs::write(path, content).unwrap();
                FakeJob {
                    remaining: None,
                    output: None,
                    pending: false,
                }
            }
            Reply::Complete {
                polls,
                path,
                content,
            } => FakeJob {
                remaining: Some(polls),
                output: Some((path, content)),
                pending: false,
            },
            Reply::Pending {
                polls,
                path,
                content,
            } => FakeJob {
                remaining: Some(polls),
                output: Some((path, content)),
                pending: true,
            },
        };

        state.last_id += 1;
        let id = state.last_id.to_string();

        if job.remaining == Some(0) {
            if let Some((path, content)) = &job.output {
                std::fs::write(path, content).unwrap();
            }
        } else {
            state.queue.insert(id.clone(), job);
            state.max_queued = state.max_queued.max(state.queue.len());
        }

        Ok(format!("Submitted batch job {id}\n"))
    }

    async fn query(&self, handle: &JobHandle) -> Result<String, SchedulerError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_queries {
            return Err(Self::query_error(handle));
        }

        let completed = match state.queue.get_mut(handle.as_str()) {
            Some(FakeJob {
                remaining: Some(remaining),
                ..
            }) => {
                if *remaining == 0 {
                    true
                } else {
                    *remaining -= 1;
                    false
                }
            }
            _ => false,
        };

        if completed
            && let Some(job) = state.queue.remove(handle.as_str())
            && let Some((path, content)) = job.output
        {
            std::fs::write(path, content).unwrap();
        }

        Ok(Self::listing(
            state.queue.keys().filter(|id| *id == handle.as_str()),
        ))
    }

    async fn query_running(&self, handle: &JobHandle) -> Result<String, SchedulerError> {
        let mut state = self.state.lock().unwrap();
        state.running_queries.push(Instant::now());
        Ok(Self::listing(
            state
                .queue
                .iter()
                .filter(|(id, job)| *id == handle.as_str() && !job.pending)
                .map(|(id, _)| id),
        ))
    }

    async fn query_by_name(&self, name: &str) -> Result<Vec<JobHandle>, SchedulerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .existing
            .get(name)
            .into_iter()
            .flatten()
            .map(JobHandle::new)
            .collect())
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        state.cancels.push(handle.to_string());
        state.queue.remove(handle.as_str());
        Ok(())
    }
}

/// Creates a job writing its output to the given directory and finishing
/// when `DONE` appears in it.
pub fn job(dir: &Path, name: &str) -> JobSpec {
    JobSpec::builder()
        .name(name)
        .template(dir.join("job.tpl"))
        .output_file(output(dir, name))
        .cmd(format!("sbatch {name}.sbatch"))
        .sbatch_script(dir.join(format!("{name}.sbatch")))
        .check_interval(INTERVAL)
        .termination_str(Pattern::new("DONE").unwrap())
        .build()
}

/// Gets the output file of a test job.
pub fn output(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.out"))
}

/// Gets the submit command of a test job.
pub fn cmd(name: &str) -> String {
    format!("sbatch {name}.sbatch")
}

/// Gets the set of commands that were submitted.
pub fn submitted_commands(scheduler: &FakeScheduler) -> HashSet<String> {
    scheduler
        .submissions()
        .into_iter()
        .map(|(command, _)| command)
        .collect()
}
