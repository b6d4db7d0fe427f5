//! CLI definitions for Eventing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Eventing CLI.
#[derive(Parser)]
#[command(name = "eventing")]
#[command(about = "Durable, cluster-coordinated job queue")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run an in-process cluster against a shared memory store (default)
    Run {
        /// Number of cluster members
        #[arg(long, default_value_t = 3)]
        nodes: usize,

        /// Number of jobs to submit
        #[arg(long, default_value_t = 20)]
        jobs: usize,

        /// Job topic
        #[arg(long, default_value = "demo/work")]
        topic: String,

        /// Fail every k-th attempt (0 never fails)
        #[arg(long, default_value_t = 0)]
        fail_every: u64,

        /// Seconds to wait for all jobs to finish
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// Load and validate the configuration file
    CheckConfig,
}
