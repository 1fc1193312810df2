//! Implementation of the tool configuration.
//!
//! Configuration is layered, later sources overriding earlier ones:
//!
//! 1. built-in defaults;
//! 2. `autoexp/autoexp.toml` in the user's configuration directory;
//! 3. `autoexp.toml` in the current directory;
//! 4. an explicitly supplied file;
//! 5. `AUTOEXP_*` environment variables, with `__` separating sections
//!    (e.g. `AUTOEXP_MANAGER__MAX_JOBS=10`).

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::shell::DEFAULT_SHELL;

/// The name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "autoexp.toml";

/// The prefix of configuration environment variables.
const ENV_PREFIX: &str = "AUTOEXP";

/// An error that occurs while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly supplied configuration file does not exist.
    #[error("configuration file `{0}` does not exist")]
    Missing(PathBuf),
    /// The configuration sources could not be merged or deserialized.
    #[error("failed to load configuration")]
    Load(#[from] config::ConfigError),
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Represents the configuration of the `autoexp` tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct Config {
    /// The scheduler configuration.
    pub scheduler: SchedulerConfig,
    /// The manager configuration.
    pub manager: ManagerConfig,
}

/// Represents the configuration of the scheduler commands.
///
/// The status, running and cancel commands are rendered with the
/// `{job_id}` placeholder; the lookup command with `{job_name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// The command listing a job in any state.
    pub status_command: String,
    /// The command listing a job only if it is running.
    pub running_command: String,
    /// The command listing the handles of the jobs with a given name.
    pub lookup_command: String,
    /// The command canceling a job.
    pub cancel_command: String,
    /// The shell used to run every command.
    pub shell: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            status_command: "squeue -j {job_id}".to_string(),
            running_command: "squeue -j {job_id} -t R".to_string(),
            lookup_command: "squeue --me -n '{job_name}' --format %i".to_string(),
            cancel_command: "scancel {job_id}".to_string(),
            shell: DEFAULT_SHELL.to_string(),
        }
    }
}

/// Represents the configuration of the job manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct ManagerConfig {
    /// The maximum number of jobs present in the scheduler at once.
    ///
    /// The number of jobs is unbounded if this is not set.
    pub max_jobs: Option<usize>,
}

impl Config {
    /// Loads the configuration from every source.
    ///
    /// The explicit file, if given, must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut files = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            files.push((dir.join("autoexp").join(CONFIG_FILE_NAME), false));
        }

        files.push((PathBuf::from(CONFIG_FILE_NAME), false));

        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }

            files.push((path.to_path_buf(), true));
        }

        Self::load_from(&files, true)
    }

    /// Loads the configuration from the given files and, optionally, the
    /// environment.
    fn load_from(files: &[(PathBuf, bool)], environment: bool) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        for (path, required) in files {
            debug!(
                "reading configuration from `{path}` if present",
                path = path.display()
            );
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(*required),
            );
        }

        if environment {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.max_jobs == Some(0) {
            return Err(ConfigError::Invalid(
                "`manager.max_jobs` must be at least 1".to_string(),
            ));
        }

        if self.scheduler.shell.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "`scheduler.shell` cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
