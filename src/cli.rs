use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clipforge")]
#[command(author, version, about = "Media task orchestration engine")]
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
    /// Run the worker pool until interrupted
    Work {
        /// Number of workers (overrides config)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Submit a task from a JSON request
    /// (`{"type", "input_files", "config", "operations", "priority"}`)
    Submit {
        /// Request file; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Show a task
    Status {
        /// Task ID
        id: String,
    },

    /// List tasks, most urgent first
    List {
        /// Only tasks with this status
        #[arg(long)]
        status: Option<String>,

        /// Only tasks of this type
        #[arg(long = "type")]
        task_type: Option<String>,

        #[arg(long, default_value = "0")]
        offset: i64,

        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Put a failed task back in the queue
    Retry {
        /// Task ID
        id: String,
    },

    /// Cancel a pending or processing task
    Cancel {
        /// Task ID
        id: String,
    },

    /// Show queue counts and active workers
    Queue,

    /// Remove expired result-cache entries
    PurgeCache,

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
