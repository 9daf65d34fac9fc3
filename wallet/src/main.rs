// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA MW Wallet
//!
//! Entry point for the `nova-mw-wallet` binary. Parses CLI arguments,
//! initializes logging and metrics, seeds a coin store, runs one
//! transaction to completion, and prints it as JSON. With `--data-dir`,
//! parameters and the key seed persist so unfinished transactions resume.
//!
//! - `issue`       mint asset units behind an emission kernel
//! - `burn`        destroy asset units
//! - `transfer`    two-party send between in-process wallets
//! - `calc-change` preview change for a payment
//! - `version`     print build version information

mod cli;
mod logging;
mod metrics;
mod seed;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;

use nova_mw::config::BuilderConfig;
use nova_mw::keykeeper::LocalKeyKeeper;
use nova_mw::storage::{MemoryParameterStore, ParameterStore, SledParameterStore};
use nova_mw::transaction::{
    AssetId, CoinId, KeyType, Role, Transaction, TransactionTask, TxEvent, TxId, TxRequest, TxStatus,
};
use nova_mw::vault::{MemoryCoinStore, Wallet};

use cli::{Commands, GlobalArgs, NovaWalletCli};
use logging::LogFormat;
use metrics::WalletMetrics;

/// Exchange rounds before a two-party transfer is given up.
const MAX_RELAY_ROUNDS: usize = 8;

/// What the binary prints on success.
#[derive(Serialize)]
struct TxReport<'a> {
    tx_id: TxId,
    status: TxStatus,
    fee: u64,
    kernel_ids: Vec<String>,
    transaction: &'a Transaction,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NovaWalletCli::parse();

    logging::init_logging(&cli.global.log_level, LogFormat::from_str_lossy(&cli.global.log_format));
    let config = load_config(cli.global.config.as_deref())?;
    let metrics = WalletMetrics::new().context("failed to create metrics registry")?;

    match cli.command {
        Commands::Version => print_version(),
        Commands::Issue(args) => {
            let wallet = open_wallet(&cli.global, &config, &args.fund, "wallet")?;
            let mut request = TxRequest::new(Role::SelfTx)
                .fee(args.fee)
                .issue(AssetId(args.asset_id), args.amount);
            if let Some(idx) = args.owner_idx {
                request = request.owner_idx(idx);
            }
            run_self(&wallet, &request, &metrics).await?;
        }
        Commands::Burn(args) => {
            let wallet = open_wallet(&cli.global, &config, &args.fund, "wallet")?;
            let mut request = TxRequest::new(Role::SelfTx)
                .fee(args.fee)
                .burn(AssetId(args.asset_id), args.amount);
            if let Some(idx) = args.owner_idx {
                request = request.owner_idx(idx);
            }
            run_self(&wallet, &request, &metrics).await?;
        }
        Commands::Transfer(args) => {
            let sender = open_wallet(&cli.global, &config, &args.fund, "sender")?;
            let receiver = open_wallet(&cli.global, &config, &[], "receiver")?;

            let request = |role: Role| {
                let mut request = TxRequest::new(role).fee(args.fee);
                request = if args.asset_id == 0 {
                    request.amounts(args.amount.clone())
                } else {
                    request.transfer(AssetId(args.asset_id), args.amount.clone())
                };
                if let Some(height) = args.min_height {
                    request = request.min_height(height);
                }
                if let Some(height) = args.max_height {
                    request = request.max_height(height);
                }
                request
            };
            run_transfer(&sender, &receiver, &request(Role::Sender), &request(Role::Receiver), &metrics)
                .await?;
        }
        Commands::CalcChange(args) => {
            let wallet = open_wallet(&cli.global, &config, &args.fund, "wallet")?;
            let change = wallet
                .calc_change(args.amount, AssetId(args.asset_id))
                .context("failed to compute change")?;
            println!("{}", serde_json::json!({ "asset_id": args.asset_id, "amount": args.amount, "change": change }));
        }
    }

    if cli.global.metrics {
        eprintln!("{}", metrics.encode().context("failed to encode metrics")?);
    }
    Ok(())
}

/// Builder settings from a JSON file, or defaults.
fn load_config(path: Option<&Path>) -> Result<BuilderConfig> {
    let Some(path) = path else {
        return Ok(BuilderConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: BuilderConfig = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    tracing::info!(path = %path.display(), ?config, "config loaded");
    Ok(config)
}

/// A wallet over seeded coins. `name` separates the sled trees of the two
/// sides of a transfer.
fn open_wallet(global: &GlobalArgs, config: &BuilderConfig, fund: &[(u64, u64)], name: &str) -> Result<Wallet> {
    let dir = global.data_dir.as_ref().map(|dir| dir.join(name));
    let params: Arc<dyn ParameterStore> = match &dir {
        Some(path) => {
            std::fs::create_dir_all(path)
                .with_context(|| format!("failed to create data directory {}", path.display()))?;
            let store = SledParameterStore::open(path)
                .with_context(|| format!("failed to open database at {}", path.display()))?;
            tracing::info!(path = %path.display(), "parameter store opened");
            Arc::new(store)
        }
        None => Arc::new(MemoryParameterStore::new()),
    };

    let coins = MemoryCoinStore::new();
    for (i, (asset, value)) in fund.iter().enumerate() {
        coins.add_available(CoinId {
            idx: i as u64 + 1,
            key_type: KeyType::Regular,
            asset_id: AssetId(*asset),
            value: *value,
        });
    }

    let mut keeper = match (&global.seed, &dir) {
        (Some(seed), _) => LocalKeyKeeper::from_seed(seed::wallet_seed(seed, name)),
        (None, Some(path)) => LocalKeyKeeper::from_seed(seed::load_or_create(path)?),
        (None, None) => LocalKeyKeeper::generate(),
    };
    if global.keeper_latency_ms > 0 {
        keeper = keeper.with_latency(Duration::from_millis(global.keeper_latency_ms));
    }

    let wallet = Wallet::new(params, Arc::new(coins), Arc::new(keeper), config.clone());
    let resumed = wallet.resume().context("failed to resume stored transactions")?;
    if resumed > 0 {
        tracing::warn!(wallet = name, resumed, "unfinished transactions found; their coins are not seeded");
    }
    Ok(wallet)
}

/// Run a self transaction until it finishes or Ctrl+C cancels it.
async fn run_self(wallet: &Wallet, request: &TxRequest, metrics: &WalletMetrics) -> Result<()> {
    let mut events = wallet.subscribe();
    let task = wallet.create(request).context("failed to create transaction")?;

    let status = tokio::select! {
        status = task.wait() => status,
        _ = signal::ctrl_c() => {
            tracing::warn!(tx_id = %task.tx_id(), "interrupted, canceling");
            task.cancel();
            task.status()
        }
    };

    drain_events(&mut events, metrics);
    report(&task, status)
}

/// Drive both sides of a transfer, relaying packets until each is done.
async fn run_transfer(
    sender: &Wallet,
    receiver: &Wallet,
    send: &TxRequest,
    receive: &TxRequest,
    metrics: &WalletMetrics,
) -> Result<()> {
    let mut sender_events = sender.subscribe();
    let mut receiver_events = receiver.subscribe();

    let tx_id = TxId::new();
    let ours = sender.create_with_id(tx_id, send).context("failed to create sender side")?;
    let theirs = receiver.create_with_id(tx_id, receive).context("failed to create receiver side")?;

    for round in 1..=MAX_RELAY_ROUNDS {
        settle(&ours).await;
        settle(&theirs).await;
        if ours.status().is_terminal() && theirs.status().is_terminal() {
            break;
        }

        let to_receiver = sender.export_packet(&tx_id)?;
        let to_sender = receiver.export_packet(&tx_id)?;
        tracing::debug!(%tx_id, round, "relaying packets");
        receiver.import_packet(&to_receiver)?;
        sender.import_packet(&to_sender)?;
    }

    drain_events(&mut sender_events, metrics);
    drain_events(&mut receiver_events, metrics);

    if !theirs.status().is_terminal() {
        bail!("transfer {} did not finish after {} rounds", tx_id, MAX_RELAY_ROUNDS);
    }
    if theirs.status() != TxStatus::Completed {
        bail!("receiver ended {}: {}", theirs.status(), failure(&theirs)?);
    }
    for coin in receiver.coins_by_tx(&tx_id)? {
        tracing::info!(%tx_id, asset = %coin.id.asset_id, value = coin.id.value, "receiver coin");
    }
    report(&ours, ours.status())
}

/// Wait until no keeper call is running, including follow-up batches.
async fn settle(task: &Arc<TransactionTask>) {
    for _ in 0..4 {
        task.wait_idle().await;
        tokio::task::yield_now().await;
    }
}

fn drain_events(events: &mut broadcast::Receiver<TxEvent>, metrics: &WalletMetrics) {
    loop {
        match events.try_recv() {
            Ok(event) => metrics.record(&event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "metrics missed events");
            }
            Err(_) => break,
        }
    }
}

fn failure(task: &TransactionTask) -> Result<String> {
    Ok(match task.failure_reason()? {
        Some(reason) => reason.to_string(),
        None => "no reason recorded".to_string(),
    })
}

/// Print the finished transaction, or fail with its reason.
fn report(task: &TransactionTask, status: TxStatus) -> Result<()> {
    if status != TxStatus::Completed {
        bail!("transaction {} ended {}: {}", task.tx_id(), status, failure(task)?);
    }
    let transaction = task
        .transaction()?
        .with_context(|| format!("transaction {} completed without a result", task.tx_id()))?;

    let report = TxReport {
        tx_id: task.tx_id(),
        status,
        fee: transaction.fee(),
        kernel_ids: transaction.kernels.iter().map(|k| k.id_hex()).collect(),
        transaction: &transaction,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_version() {
    println!("nova-mw-wallet {}", env!("CARGO_PKG_VERSION"));
    println!("protocol       {}", nova_mw::config::PROTOCOL_VERSION);
}
