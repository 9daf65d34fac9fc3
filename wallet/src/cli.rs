//! # CLI Interface
//!
//! Command-line structure for `nova-mw-wallet`, built with `clap` derive.
//! Global flags configure logging, the key keeper, and storage; each
//! subcommand runs one transaction end to end against seeded coins.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::seed::parse_seed;

/// Confidential asset transactions, driven from the command line.
///
/// Every run starts from the coins given with `--fund`, builds one
/// transaction, and prints it as JSON on stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(
    name = "nova-mw-wallet",
    about = "Build NOVA confidential asset transactions",
    version,
    propagate_version = true
)]
pub struct NovaWalletCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Log output format: `pretty` or `json`.
    #[arg(long, global = true, env = "NOVA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "NOVA_LOG_LEVEL", default_value = "nova_mw_wallet=info,nova_mw=info")]
    pub log_level: String,

    /// JSON file with builder settings. Missing fields keep their defaults.
    #[arg(long, short = 'c', global = true, env = "NOVA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Delay every output-generation call, to mimic a hardware signer.
    #[arg(long, global = true, env = "NOVA_KEEPER_LATENCY_MS", default_value_t = 0)]
    pub keeper_latency_ms: u64,

    /// Persist transaction parameters in a sled database under this
    /// directory instead of memory. Without `--seed`, each wallet's key seed
    /// is kept there too.
    #[arg(long, short = 'd', global = true, env = "NOVA_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Key keeper master seed, 64 hex characters. Each in-process wallet
    /// derives its own secret from it.
    #[arg(long, global = true, env = "NOVA_WALLET_SEED", hide_env_values = true, value_parser = parse_seed)]
    pub seed: Option<[u8; 32]>,

    /// Print Prometheus metrics to stderr after the run.
    #[arg(long, global = true)]
    pub metrics: bool,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mint units of an asset to yourself.
    Issue(AssetArgs),
    /// Destroy units of an asset you hold.
    Burn(AssetArgs),
    /// Send base or asset units to a second, in-process wallet.
    Transfer(TransferArgs),
    /// Preview the change a payment would leave.
    CalcChange(CalcChangeArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for `issue` and `burn`.
#[derive(Args, Debug)]
pub struct AssetArgs {
    /// Asset to mint or destroy. Must not be zero.
    #[arg(long)]
    pub asset_id: u64,

    /// Asset amounts, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    pub amount: Vec<u64>,

    /// Fee in base units.
    #[arg(long, default_value_t = 0)]
    pub fee: u64,

    /// Owner key index. Defaults to the asset id.
    #[arg(long)]
    pub owner_idx: Option<u64>,

    /// Starting coin as `ASSET:VALUE`. Repeatable.
    #[arg(long, value_parser = parse_fund)]
    pub fund: Vec<(u64, u64)>,
}

/// Arguments for `transfer`.
#[derive(Args, Debug)]
pub struct TransferArgs {
    /// Asset to send; zero sends base units.
    #[arg(long, default_value_t = 0)]
    pub asset_id: u64,

    /// Amounts the receiver gets, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    pub amount: Vec<u64>,

    /// Fee in base units.
    #[arg(long, default_value_t = 0)]
    pub fee: u64,

    /// Kernel min height.
    #[arg(long)]
    pub min_height: Option<u64>,

    /// Kernel max height.
    #[arg(long)]
    pub max_height: Option<u64>,

    /// Sender's starting coin as `ASSET:VALUE`. Repeatable.
    #[arg(long, value_parser = parse_fund)]
    pub fund: Vec<(u64, u64)>,
}

/// Arguments for `calc-change`.
#[derive(Args, Debug)]
pub struct CalcChangeArgs {
    #[arg(long, default_value_t = 0)]
    pub asset_id: u64,

    /// Amount to pay.
    #[arg(long)]
    pub amount: u64,

    /// Starting coin as `ASSET:VALUE`. Repeatable.
    #[arg(long, value_parser = parse_fund)]
    pub fund: Vec<(u64, u64)>,
}

/// Parse `ASSET:VALUE`, or a bare `VALUE` meaning base units.
pub fn parse_fund(s: &str) -> Result<(u64, u64), String> {
    let (asset, value) = match s.split_once(':') {
        Some((asset, value)) => (asset, value),
        None => ("0", s),
    };
    let asset = asset.trim().parse::<u64>().map_err(|e| format!("bad asset id `{}`: {}", asset, e))?;
    let value = value.trim().parse::<u64>().map_err(|e| format!("bad value `{}`: {}", value, e))?;
    if value == 0 {
        return Err("coin value must be positive".into());
    }
    Ok((asset, value))
}
