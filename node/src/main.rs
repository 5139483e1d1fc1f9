// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # OPAL Sandbox Wallet Daemon
//!
//! Entry point for the `opal-node` binary. Hosts one offline wallet
//! against an in-memory sandbox settlement backend: tokens are issued by
//! a local "bank" keypair, payments are authorized offline, and the
//! settlement worker drains the queue on a simulated connectivity
//! schedule.
//!
//! The binary supports five subcommands:
//!
//! - `run`     — start the wallet daemon and settlement worker
//! - `init`    — initialize the data directory and generate keys
//! - `pay`     — authorize one offline payment from the local wallet
//! - `status`  — print balance, pending queue, and recent ledger
//! - `version` — print build version information

mod cli;
mod logging;
mod sandbox;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

use opal_protocol::payment::{PayError, PaymentEngine};
use opal_protocol::settlement::{ConnectivityEvent, SettlementWorker};
use opal_protocol::signing::{DeviceKeypair, DeviceVault, SigningCapability};
use opal_protocol::storage::OpalDb;
use opal_protocol::token::TokenStore;

use cli::{Commands, OpalNodeCli};
use logging::LogFormat;
use sandbox::SandboxApi;

/// Connectivity event channel capacity. Events are tiny and coalescible;
/// 16 absorbs any realistic flap burst.
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = OpalNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Pay(args) => pay(args),
        Commands::Status(args) => print_status(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Everything a subcommand needs from an initialized data directory.
struct Wallet {
    db: OpalDb,
    tokens: Arc<TokenStore>,
    vault: Arc<DeviceVault>,
    bank: DeviceKeypair,
}

/// Opens the database and loads the device and sandbox-bank keys.
fn open_wallet(data_dir: &Path, pin: &str) -> Result<Wallet> {
    let device = read_keypair(&data_dir.join("device.key"))
        .context("failed to load device key (run `opal-node init` first)")?;
    let bank = read_keypair(&data_dir.join("bank.key"))
        .context("failed to load sandbox bank key (run `opal-node init` first)")?;

    let db_path = data_dir.join("db");
    let db = OpalDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let vault = Arc::new(DeviceVault::new(device, pin, bank.verifying_key()));
    let tokens = Arc::new(TokenStore::new(db.clone()));

    Ok(Wallet {
        db,
        tokens,
        vault,
        bank,
    })
}

fn read_keypair(path: &Path) -> Result<DeviceKeypair> {
    let hex_str = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    DeviceKeypair::from_hex(hex_str.trim())
        .map_err(|e| anyhow::anyhow!("invalid key material in {}: {}", path.display(), e))
}

/// Starts the wallet daemon: settlement worker, terminal-failure notice
/// logger, and a simulated connectivity schedule.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "opal_node=info,opal_protocol=info",
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        data_dir = %args.data_dir.display(),
        ceiling = args.ceiling,
        sync_interval_secs = args.sync_interval_secs,
        fail_first = args.fail_first,
        "starting opal-node"
    );

    let wallet = open_wallet(&args.data_dir, &args.pin)?;
    tracing::info!(device_key = %wallet.vault.public_key_hex(), "wallet opened");

    let api = Arc::new(SandboxApi::new(
        wallet.bank.clone(),
        args.ceiling,
        args.fail_first,
    ));

    let (worker, mut notices) =
        SettlementWorker::new(wallet.db.clone(), wallet.tokens.clone(), api);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let worker_handle = tokio::spawn(Arc::new(worker).run(event_rx));

    // Terminal settlement failures surface here; in a real deployment
    // this is where the push notification goes out.
    let notice_handle = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            tracing::warn!(
                txn_id = %notice.txn_id,
                amount = notice.amount,
                attempts = notice.attempts,
                last_error = ?notice.last_error,
                "payment failed terminally; needs manual reconciliation"
            );
        }
    });

    // Simulated connectivity: the device comes online every interval.
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(args.sync_interval_secs.max(1)));
    interval.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if event_tx.send(ConnectivityEvent::Online).await.is_err() {
                    bail!("settlement worker stopped unexpectedly");
                }
            }
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    // Closing the event channel stops the worker; an in-flight entry
    // finishes or stays queued for next startup.
    drop(event_tx);
    worker_handle.await.ok();
    notice_handle.abort();
    tracing::info!("opal-node stopped");
    Ok(())
}

/// Initializes a new wallet data directory with fresh keys.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("opal_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing wallet");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let device = DeviceKeypair::generate();
    let bank = DeviceKeypair::generate();

    let device_path = data_dir.join("device.key");
    let bank_path = data_dir.join("bank.key");
    write_key(&device_path, &device)?;
    write_key(&bank_path, &bank)?;

    println!("Wallet initialized successfully.");
    println!("  Data directory  : {}", data_dir.display());
    println!("  Device key      : {}", device_path.display());
    println!("  Device public   : {}", device.public_key_hex());
    println!("  Sandbox bank    : {}", bank.public_key_hex());

    Ok(())
}

fn write_key(path: &Path, keypair: &DeviceKeypair) -> Result<()> {
    std::fs::write(path, hex::encode(keypair.secret_key_bytes()))
        .with_context(|| format!("failed to write key to {}", path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Authorizes one offline payment and prints the result.
fn pay(args: cli::PayArgs) -> Result<()> {
    logging::init_logging("opal_node=warn,opal_protocol=info", LogFormat::Pretty);

    let wallet = open_wallet(&args.data_dir, &args.pin)?;
    let engine = PaymentEngine::new(wallet.db, wallet.tokens, wallet.vault);

    match engine.pay(&args.payee, args.amount, args.note, &args.pin) {
        Ok(success) => {
            println!("Payment authorized.");
            println!("  Transaction : {}", success.intent.txn_id);
            println!("  Payee       : {}", success.intent.payee_upi);
            println!("  Amount      : {}", success.intent.amount);
            println!("  Sequence    : {}", success.intent.sequence_number);
            println!("  Remaining   : {}", success.new_balance);
            Ok(())
        }
        Err(PayError::NoAuthToken) => {
            bail!("no authorization token — start `opal-node run` to sync one")
        }
        Err(e) => bail!("payment refused: {}", e),
    }
}

/// Prints the wallet's current state from the local database.
fn print_status(args: cli::StatusArgs) -> Result<()> {
    let db_path = args.data_dir.join("db");
    let db = OpalDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let tokens = TokenStore::new(db.clone());

    println!("Wallet status");
    println!("  Remaining balance : {}", tokens.remaining_balance()?);
    println!(
        "  Token time left   : {}s",
        tokens.time_remaining()?.num_seconds().max(0)
    );
    println!("  Pending payments  : {}", db.pending_queue_count()?);

    let entries = db.ledger_entries()?;
    let tail = entries.len().saturating_sub(args.ledger_tail);
    println!("  Ledger ({} entries, last {}):", entries.len(), entries.len() - tail);
    for entry in &entries[tail..] {
        println!(
            "    {:>13} {:>10}  txn={}  {}",
            entry.kind.to_string(),
            entry.amount,
            entry.txn_id.as_deref().unwrap_or("-"),
            entry.detail.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("opal-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc     {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
