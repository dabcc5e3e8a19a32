//! CLI interface for vendorstore.
//!
//! Provides command-line argument parsing using clap.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::conformance::LARGE_PAYLOAD_LEN;
use crate::storage::Protocol;

/// Command-line interface for vendorstore.
#[derive(Parser)]
#[command(name = "vendorstore")]
#[command(author, version, about = "Pluggable storage modules", long_about = None)]
pub struct Cli {
    /// Storage root, overriding the config file. Must already exist.
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Write protocol to expose, overriding the config file.
    #[arg(short, long, global = true)]
    pub protocol: Option<Protocol>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Store content in one call and print its handle (atomic protocol).
    Put {
        /// Read content from file instead of stdin.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Reserve a new handle and print it (ticketing protocol).
    New,

    /// Store content under a reserved handle (ticketing protocol).
    Assign {
        /// Handle returned by `new`.
        handle: String,

        /// Read content from file instead of stdin.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Write stored content to stdout or a file.
    Get {
        handle: String,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print whether content for a handle is available.
    Available { handle: String },

    /// Print the size in bytes of stored content (ticketing protocol).
    Size { handle: String },

    /// Delete stored content. Deleting missing content is not an error.
    Delete { handle: String },

    /// Copy stored content to a new handle and print it.
    Copy { handle: String },

    /// Print capacity statistics as JSON.
    Stats,

    /// Print the module's capabilities as JSON.
    Capabilities,

    /// Run the conformance checks against the configured root.
    Check {
        /// Size in bytes of the large test payload.
        #[arg(long, default_value_t = LARGE_PAYLOAD_LEN)]
        payload_size: usize,
    },
}
