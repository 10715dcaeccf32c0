//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use conductor_config::DistributionKind;
use conductor_protocol::Role;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the incremental test against simulated peers on an in-process broker
    Lab {
        /// Distribution strategy: balanced, exclusive-balanced, legacy, non-assigning
        #[arg(long, value_name = "KIND")]
        distribution: Option<DistributionKind>,

        /// Number of worker peers
        #[arg(long, value_name = "N")]
        workers: Option<usize>,

        /// Number of inspector peers
        #[arg(long, value_name = "N")]
        inspectors: Option<usize>,

        /// Load (rate × parallel count) above which simulated workers fail
        #[arg(long, value_name = "LOAD")]
        breaking_point: Option<u64>,
    },

    /// Run the incremental test against the peers on the configured broker
    Run {
        /// Distribution strategy: balanced, exclusive-balanced, legacy, non-assigning
        #[arg(long, value_name = "KIND")]
        distribution: Option<DistributionKind>,
    },

    /// Serve as a simulated peer on the configured broker
    Peer {
        /// Name the peer announces itself with
        #[arg(long, value_name = "NAME")]
        name: String,

        /// Role to declare on joining; unassigned when omitted
        #[arg(long, value_name = "ROLE")]
        role: Option<Role>,

        /// Host name reported to the controller
        #[arg(long, value_name = "HOST", default_value = "localhost")]
        host: String,
    },

    /// Print the load ramp the configured test profile walks through
    Plan,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Print or write a sample configuration
    Sample {
        /// Output file path, stdout when omitted
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}
