//! Command-line interface built on clap.
//!
//! [`Cli`] carries the global `--verbose` flag and one [`Command`] per
//! operation: process, configure, list-jobs, cancel, download.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// batchctl: submit, track and collect OpenAI batch jobs.
#[derive(Debug, Parser)]
#[command(name = "batchctl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log progress details to stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload input files, run them as batch jobs and download the results.
    Process(ProcessArgs),

    /// Manage the stored configuration.
    Configure(ConfigureArgs),

    /// List recent batch jobs.
    ListJobs {
        /// Number of jobs to display.
        #[arg(long, default_value_t = 100, conflicts_with = "all")]
        limit: u32,

        /// Display every job.
        #[arg(long)]
        all: bool,
    },

    /// Cancel a batch job.
    Cancel {
        /// ID of the batch job to cancel.
        job_id: String,
    },

    /// Download the results of a completed batch job.
    Download {
        /// ID of the batch job.
        job_id: String,

        /// Where to save the results (default: <JOB_ID>_results.jsonl).
        #[arg(long)]
        output_file: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Input files or directories containing input files.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory for result files (default: `results` next to the first input).
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum number of jobs in flight at once.
    #[arg(long)]
    pub max_concurrent_jobs: Option<usize>,

    /// Initial seconds between status checks.
    #[arg(long)]
    pub check_interval: Option<f64>,
}

#[derive(Debug, Args)]
#[group(multiple = false)]
pub struct ConfigureArgs {
    /// Store the OpenAI API key.
    #[arg(long, value_name = "KEY")]
    pub set_key: Option<String>,

    /// Show the current configuration.
    #[arg(long)]
    pub show: bool,

    /// Reset the configuration to default values.
    #[arg(long)]
    pub reset: bool,
}

impl ProcessArgs {
    /// `--output-dir`, or `results` inside the first input directory
    /// (or beside the first input file).
    pub fn resolved_output_dir(&self) -> PathBuf {
        if let Some(dir) = &self.output_dir {
            return dir.clone();
        }
        let base = match self.inputs.first() {
            Some(first) if first.is_dir() => first.clone(),
            Some(first) => first
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            None => PathBuf::from("."),
        };
        base.join("results")
    }
}
