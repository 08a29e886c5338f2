//! CLI argument parsing module
//!
//! Uses clap derive macros to declaratively define commands and arguments.
//! This approach ensures type safety and automatically generates --help and --version.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rotor - parallel Tor worker pool with a SOCKS-aware HTTP load balancer
#[derive(Parser, Debug)]
#[command(
    name = "rotor",
    about = "Parallel Tor worker pool with a SOCKS-aware HTTP load balancer",
    long_about = r#"
rotor supervises a pool of Tor worker processes behind an HTTP/CONNECT
load balancer, round-robining requests across whichever workers are
currently healthy.

  rotor check    # Validate static configuration
  rotor start    # Start the worker pool and load balancer (foreground)
"#,
    version = env!("CARGO_PKG_VERSION"),
    author = "rotor Team"
)]
pub struct Cli {
    /// Subcommand (start, check)
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the worker pool and load balancer
    #[command(name = "start", about = "Start the worker pool and load balancer")]
    Start {
        /// Configuration file path (optional)
        #[arg(short, long, value_name = "FILE", help = "Configuration file path")]
        config: Option<PathBuf>,

        /// Write logs to this file instead of stdout
        #[arg(long, value_name = "FILE", help = "Write logs to this file instead of stdout")]
        log_file: Option<PathBuf>,

        /// Enable verbose (debug-level) logging
        #[arg(short, long, help = "Enable verbose (debug-level) logging")]
        verbose: bool,
    },

    /// Validate static configuration
    #[command(name = "check", about = "Validate static configuration")]
    Check {
        /// Configuration file path to validate
        #[arg(
            short,
            long,
            value_name = "FILE",
            help = "Configuration file path to validate"
        )]
        config: Option<PathBuf>,

        /// Print check report in JSON format
        #[arg(long, help = "Print check report in JSON format")]
        json: bool,
    },
}

impl Cli {
    /// Parse CLI arguments and create Cli struct
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
