use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI parser for the `taskline` binary.
#[derive(Debug, Parser)]
#[command(name = "taskline", version, about = "Taskline - task API and queue worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Also run the queue consumer in this process (required for QUEUE_BACKEND=memory)
        #[arg(long)]
        with_worker: bool,
    },

    /// Run the queue consumer until interrupted
    Worker,

    /// Process one queue-trigger event and print the batch response
    HandleBatch {
        /// Event JSON file (`{"Records": [...]}`); reads stdin when omitted
        #[arg(long)]
        event: Option<PathBuf>,
    },
}
