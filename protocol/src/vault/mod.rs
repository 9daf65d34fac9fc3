//! # Vault Module: Wallet Coins
//!
//! The vault is the wallet's view of its own money: which coins exist, what
//! they are worth, and which transaction touches them. The builder consumes
//! it through the [`CoinStore`] trait and never deletes anything.
//!
//! ## Architecture
//!
//! ```text
//! coin.rs      : Coin record and lifecycle status
//! selection.rs : Largest-first coin selection
//! store.rs     : CoinStore contract, MemoryCoinStore, change preview
//! wallet.rs    : Wallet: owns the stores and runs transaction tasks
//! ```

pub mod coin;
pub mod selection;
pub mod store;
pub mod wallet;

pub use coin::{Coin, CoinStatus};
pub use store::{calc_change, CoinStore, CoinStoreError, MemoryCoinStore};
pub use wallet::{Wallet, WalletError, WalletResult};
