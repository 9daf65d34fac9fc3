//! Coins owned by the wallet.
//!
//! A coin is the wallet's private record of an output: the derivation path
//! and value that let the key keeper recompute its commitment, plus which
//! transactions created and spent it. The builder creates coins and moves
//! them between `Available` and `Outgoing`; chain sync (not part of this
//! crate) confirms them or marks them spent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction::types::{Amount, AssetId, CoinId, TxId};

/// Where a coin is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoinStatus {
    /// Confirmed and spendable.
    Available,
    /// Locked as an input of an in-progress transaction.
    Outgoing,
    /// Created by an in-progress transaction, not yet confirmed.
    Incoming,
    /// Spent on chain.
    Spent,
}

/// A wallet coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub id: CoinId,
    pub status: CoinStatus,
    /// Transaction that created this coin (`None` for imported coins).
    pub create_tx_id: Option<TxId>,
    /// Transaction that spends or locks this coin.
    pub spent_tx_id: Option<TxId>,
    pub created_at: DateTime<Utc>,
}

impl Coin {
    pub fn new(id: CoinId, status: CoinStatus, create_tx_id: Option<TxId>) -> Self {
        Self {
            id,
            status,
            create_tx_id,
            spent_tx_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn value(&self) -> Amount {
        self.id.value
    }

    pub fn asset_id(&self) -> AssetId {
        self.id.asset_id
    }

    pub fn is_available(&self) -> bool {
        self.status == CoinStatus::Available
    }

    /// Whether `tx_id` created or spends this coin.
    pub fn touches(&self, tx_id: &TxId) -> bool {
        self.create_tx_id.as_ref() == Some(tx_id) || self.spent_tx_id.as_ref() == Some(tx_id)
    }
}
