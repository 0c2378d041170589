use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "renditiond")]
#[command(author, version, about = "Transcoding job orchestrator")]
pub struct Cli {
    /// Path to config file
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
    /// Transcode a file into every configured profile and wait for the job
    Transcode {
        /// Source media file
        #[arg(required = true)]
        input: PathBuf,

        /// Only produce these profiles (repeatable)
        #[arg(short, long = "profile")]
        profiles: Vec<String>,

        /// Override the output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// List the configured format profiles
    Profiles {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List jobs recorded in the database
    Jobs {
        /// Only show jobs with this status (e.g. completed_with_errors)
        #[arg(long)]
        status: Option<String>,
    },

    /// Fail tasks left open in the database by a process that died.
    /// Run only while no transcode is using the same database.
    Recover,

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
