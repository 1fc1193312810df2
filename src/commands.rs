//! Implementation of the `autoexp` CLI commands.

pub mod config;
pub mod expand;
pub mod run;
