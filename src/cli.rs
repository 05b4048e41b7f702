use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mkv-extract")]
#[command(author, version, about = "Extract depth, IR and color streams from depth-camera MKV recordings")]
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
    /// Extract metadata, timestamps and every stream of one or more containers
    Extract {
        /// Containers to process, one after another
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Prefix for output files (single input only)
        #[arg(short, long)]
        output_prefix: Option<PathBuf>,

        /// Verify the exports and delete the container if they match
        #[arg(long)]
        delete: bool,

        /// Redo every step even if its output exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Compare exported streams with their container frame by frame
    Verify {
        /// Container to check against
        #[arg(required = true)]
        input: PathBuf,

        /// Prefix the outputs were written with
        #[arg(short, long)]
        output_prefix: Option<PathBuf>,

        /// Delete the container if every stream matches
        #[arg(long)]
        delete: bool,

        /// Frames compared per read (overrides config)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// List the tagged streams of a container
    Streams {
        /// Container to inspect
        #[arg(required = true)]
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

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
