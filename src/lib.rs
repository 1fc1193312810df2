//! Expands experiment matrices into batch jobs and keeps every job alive
//! until it finishes.
//!
//! An experiment is a YAML description of parameter axes, named presets,
//! cross references and computed values. [`template::expand`] turns it into
//! one [`JobSpec`] per combination. A [`Manager`] then
//! runs one supervisor per job, submitting it to the batch scheduler,
//! resubmitting it whenever the scheduler loses track of it or it stops
//! producing output, until its termination predicate reports that it
//! finished.
//!
//! [`JobSpec`]: template::JobSpec
//! [`Manager`]: manager::Manager

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod commands;
pub mod config;
pub mod limiter;
pub mod manager;
pub mod scheduler;
pub mod shell;
pub mod supervisor;
pub mod template;
pub mod value;

pub use config::Config;
