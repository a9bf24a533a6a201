use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "transforge")]
#[command(author, version, about = "Multi-profile media transcoding pipeline")]
pub struct Cli {
    /// Path to config file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcode a file into one or more profiles and follow its progress
    Submit {
        /// Input media file
        #[arg(required = true)]
        input: PathBuf,

        /// Output profile (repeatable)
        #[arg(short, long = "profile", required = true)]
        profiles: Vec<String>,

        /// Source duration in seconds (skips probing)
        #[arg(long)]
        duration: Option<f64>,

        /// Only print the final job state
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show the stored state of a job
    Status {
        /// Job identifier
        job_id: String,
    },

    /// List recent jobs
    List {
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List configured output profiles
    Profiles,

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
