//! Command-line tooling for the partitioned cache.
//!
//! Provides commands for:
//! - Printing the ownership table of a member list
//! - Simulating joins and crashes on an in-process cluster

pub mod commands;
pub mod config;

pub use commands::CommandResult;
pub use config::{CliConfig, Command};
