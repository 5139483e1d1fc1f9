//! # CLI Interface
//!
//! Defines the command-line argument structure for `opal-node` using
//! `clap` derive. Supports five subcommands: `run`, `init`, `pay`,
//! `status`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// OPAL sandbox wallet daemon.
///
/// Hosts one offline wallet against a local sandbox settlement backend:
/// issues tokens, authorizes payments, and drains the settlement queue
/// on simulated connectivity. For pilot and development use.
#[derive(Parser, Debug)]
#[command(
    name = "opal-node",
    about = "OPAL sandbox wallet daemon",
    version,
    propagate_version = true
)]
pub struct OpalNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the OPAL node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the wallet daemon and settlement worker.
    Run(RunArgs),
    /// Initialize a new wallet — creates the data directory and
    /// generates the device and sandbox-bank keypairs.
    Init(InitArgs),
    /// Authorize one offline payment from the local wallet.
    Pay(PayArgs),
    /// Print the wallet's balance, pending queue, and recent ledger.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the wallet data directory (keys and database).
    ///
    /// Created by `init`; `run` refuses to start without it.
    #[arg(long, short = 'd', env = "OPAL_DATA_DIR", default_value = ".opal")]
    pub data_dir: PathBuf,

    /// Wallet PIN for the software vault.
    ///
    /// **Sandbox only** — a real deployment takes the PIN from the user,
    /// never from a flag or the environment.
    #[arg(long, env = "OPAL_PIN", default_value = "4321")]
    pub pin: String,

    /// Spending ceiling (minor units) the sandbox bank grants per token.
    #[arg(long, env = "OPAL_CEILING", default_value_t = 150_000)]
    pub ceiling: u64,

    /// Seconds between simulated connectivity-online events.
    #[arg(long, env = "OPAL_SYNC_INTERVAL", default_value_t = 30)]
    pub sync_interval_secs: u64,

    /// Number of initial submissions the sandbox backend rejects, to
    /// exercise the retry schedule.
    #[arg(long, default_value_t = 0)]
    pub fail_first: u32,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "OPAL_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "OPAL_DATA_DIR", default_value = ".opal")]
    pub data_dir: PathBuf,
}

/// Arguments for the `pay` subcommand.
#[derive(Parser, Debug)]
pub struct PayArgs {
    /// Path to the wallet data directory.
    #[arg(long, short = 'd', env = "OPAL_DATA_DIR", default_value = ".opal")]
    pub data_dir: PathBuf,

    /// Payee identity ("shop@upi").
    #[arg(long)]
    pub payee: String,

    /// Amount in minor units.
    #[arg(long)]
    pub amount: u64,

    /// Optional free-text note.
    #[arg(long)]
    pub note: Option<String>,

    /// Wallet PIN.
    #[arg(long, env = "OPAL_PIN", default_value = "4321")]
    pub pin: String,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Path to the wallet data directory.
    #[arg(long, short = 'd', env = "OPAL_DATA_DIR", default_value = ".opal")]
    pub data_dir: PathBuf,

    /// How many trailing ledger entries to print.
    #[arg(long, default_value_t = 10)]
    pub ledger_tail: usize,
}
