//! The coin store contract and an in-memory implementation.
//!
//! The builder never owns wallet persistence. It talks to whatever database
//! the wallet uses through [`CoinStore`]: select spendable coins, upsert a
//! coin, walk the coin set. [`MemoryCoinStore`] backs tests and the CLI.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use thiserror::Error;

use super::coin::{Coin, CoinStatus};
use super::selection::select_largest_first;
use crate::transaction::types::{Amount, AssetId, CoinId, TxId};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors reported by a coin store backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoinStoreError {
    /// The backend could not be reached or failed internally.
    #[error("coin store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// CoinStore
// ---------------------------------------------------------------------------

/// Persistence and selection of wallet coins.
///
/// `store_coin` is an upsert keyed by [`CoinId`], so storing the same coin
/// twice never creates a duplicate. Coins are never deleted through this
/// interface.
pub trait CoinStore: Send + Sync {
    /// Available coins of `asset` covering `amount`. Empty when the
    /// available balance is insufficient or `amount` is zero.
    fn select_coins(&self, amount: Amount, asset: AssetId) -> Result<Vec<Coin>, CoinStoreError>;

    /// Insert or replace a coin.
    fn store_coin(&self, coin: Coin) -> Result<(), CoinStoreError>;

    /// Call `visitor` for each coin until it returns `false`.
    fn visit_coins(&self, visitor: &mut dyn FnMut(&Coin) -> bool) -> Result<(), CoinStoreError>;

    /// Look up a single coin.
    fn find_coin(&self, id: &CoinId) -> Result<Option<Coin>, CoinStoreError> {
        let mut found = None;
        self.visit_coins(&mut |coin| {
            if coin.id == *id {
                found = Some(coin.clone());
                false
            } else {
                true
            }
        })?;
        Ok(found)
    }

    /// Coins created or spent by `tx_id`.
    fn coins_by_tx(&self, tx_id: &TxId) -> Result<Vec<Coin>, CoinStoreError> {
        let mut coins = Vec::new();
        self.visit_coins(&mut |coin| {
            if coin.touches(tx_id) {
                coins.push(coin.clone());
            }
            true
        })?;
        Ok(coins)
    }

    /// Sum of available coins of `asset`.
    fn available_balance(&self, asset: AssetId) -> Result<Amount, CoinStoreError> {
        let mut total: Amount = 0;
        self.visit_coins(&mut |coin| {
            if coin.is_available() && coin.asset_id() == asset {
                total = total.saturating_add(coin.value());
            }
            true
        })?;
        Ok(total)
    }
}

/// The change a payment of `amount` in `asset` would produce with the
/// current coin set. Zero when the wallet cannot cover `amount`.
pub fn calc_change(store: &dyn CoinStore, amount: Amount, asset: AssetId) -> Result<Amount, CoinStoreError> {
    let coins = store.select_coins(amount, asset)?;
    let total = coins.iter().fold(0u64, |acc, c| acc.saturating_add(c.value()));
    Ok(total.saturating_sub(amount))
}

// ---------------------------------------------------------------------------
// MemoryCoinStore
// ---------------------------------------------------------------------------

/// Coin store held in memory, ordered by coin id.
#[derive(Debug, Default)]
pub struct MemoryCoinStore {
    coins: RwLock<BTreeMap<CoinId, Coin>>,
}

impl MemoryCoinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an available coin, as chain sync would after confirming it.
    pub fn add_available(&self, id: CoinId) {
        self.coins
            .write()
            .insert(id, Coin::new(id, CoinStatus::Available, None));
    }

    pub fn len(&self) -> usize {
        self.coins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.read().is_empty()
    }
}

impl CoinStore for MemoryCoinStore {
    fn select_coins(&self, amount: Amount, asset: AssetId) -> Result<Vec<Coin>, CoinStoreError> {
        let candidates: Vec<Coin> = self
            .coins
            .read()
            .values()
            .filter(|c| c.is_available() && c.asset_id() == asset)
            .cloned()
            .collect();
        Ok(select_largest_first(candidates, amount)
            .map(|selection| selection.coins)
            .unwrap_or_default())
    }

    fn store_coin(&self, coin: Coin) -> Result<(), CoinStoreError> {
        self.coins.write().insert(coin.id, coin);
        Ok(())
    }

    fn visit_coins(&self, visitor: &mut dyn FnMut(&Coin) -> bool) -> Result<(), CoinStoreError> {
        for coin in self.coins.read().values() {
            if !visitor(coin) {
                break;
            }
        }
        Ok(())
    }

    fn find_coin(&self, id: &CoinId) -> Result<Option<Coin>, CoinStoreError> {
        Ok(self.coins.read().get(id).cloned())
    }
}
