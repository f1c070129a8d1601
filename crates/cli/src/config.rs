//! Command-line arguments.

use crate::commands::{self, CommandResult};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corelib::config::CacheConfig;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and simulate segment ownership of a partitioned cache")]
pub struct CliConfig {
    /// JSON file with cache settings; unspecified fields keep their defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the ownership table computed for a member list.
    Assign {
        /// Number of members, named node1..nodeN.
        #[arg(short, long, default_value_t = 3)]
        members: usize,
        #[arg(long)]
        num_owners: Option<usize>,
        #[arg(long)]
        num_segments: Option<u32>,
    },
    /// Run an in-process cluster through joins and crashes and check that
    /// no key is lost.
    Simulate {
        #[arg(long, default_value_t = 3)]
        initial: usize,
        #[arg(long, default_value_t = 1)]
        joins: usize,
        #[arg(long, default_value_t = 0)]
        crashes: usize,
        #[arg(long, default_value_t = 200)]
        keys: usize,
    },
}

impl CliConfig {
    pub async fn run(&self) -> Result<CommandResult> {
        let base = match &self.config {
            Some(path) => load_cache_config(path)?,
            None => CacheConfig::default(),
        };
        match self.command.clone() {
            Command::Assign {
                members,
                num_owners,
                num_segments,
            } => {
                let config = CacheConfig {
                    num_owners: num_owners.unwrap_or(base.num_owners),
                    num_segments: num_segments.unwrap_or(base.num_segments),
                    ..base
                };
                commands::assign(&config, members)
            }
            Command::Simulate {
                initial,
                joins,
                crashes,
                keys,
            } => commands::simulate(&base, initial, joins, crashes, keys).await,
        }
    }
}

pub fn load_cache_config(path: &Path) -> Result<CacheConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: CacheConfig =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
