//! Core type definitions for confidential transactions.
//!
//! These types form the vocabulary shared by the builder, the key keeper,
//! the coin store, and the parameter store. They are kept small and `Copy`
//! where possible because they get persisted and re-read on every pipeline
//! re-entry.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::DEFAULT_SUB_TX_ID;

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// Unsigned quantity in the smallest unit of an asset.
pub type Amount = u64;

/// Ordered list of amounts. Each entry becomes one output coin; the total is
/// what the transaction moves.
pub type AmountList = Vec<Amount>;

/// Sum an amount list, or `None` on overflow.
pub fn total_amount(amounts: &[Amount]) -> Option<Amount> {
    amounts.iter().try_fold(0u64, |acc, a| acc.checked_add(*a))
}

// ---------------------------------------------------------------------------
// AssetId
// ---------------------------------------------------------------------------

/// Opaque asset identifier. Zero is the base asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub u64);

impl AssetId {
    /// The base asset, the one fees are paid in.
    pub const BASE: AssetId = AssetId(0);

    pub fn is_base(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_base() {
            write!(f, "base")
        } else {
            write!(f, "asset#{}", self.0)
        }
    }
}

// ---------------------------------------------------------------------------
// AssetCommand
// ---------------------------------------------------------------------------

/// What an asset transaction does to its asset.
///
/// Persisted as the raw `u8` code so that a corrupted or foreign value read
/// back from the parameter store is caught by [`TryFrom<u8>`] instead of by
/// serde.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AssetCommand {
    /// Create new units; emits a positive emission kernel.
    Issue = 1,
    /// Move existing units between parties; no emission kernel.
    Transfer = 2,
    /// Destroy units; emits a negative emission kernel.
    Burn = 3,
}

impl AssetCommand {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for AssetCommand {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Issue),
            2 => Ok(Self::Transfer),
            3 => Ok(Self::Burn),
            other => Err(other),
        }
    }
}

impl fmt::Display for AssetCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue => write!(f, "Issue"),
            Self::Transfer => write!(f, "Transfer"),
            Self::Burn => write!(f, "Burn"),
        }
    }
}

// ---------------------------------------------------------------------------
// Keys and Coin Identifiers
// ---------------------------------------------------------------------------

/// Derivation purpose of a key. Part of the derivation path, so a change
/// coin and a regular coin with the same index get different blindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Coins received or issued.
    Regular,
    /// Change returned to the sender.
    Change,
    /// Asset ownership key; signs emission kernels, never blinds a coin.
    AssetOwner,
}

impl KeyType {
    pub fn code(self) -> u8 {
        match self {
            Self::Regular => 0,
            Self::Change => 1,
            Self::AssetOwner => 2,
        }
    }
}

/// Derivation path of a secret held by the key keeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId {
    pub idx: u64,
    pub key_type: KeyType,
    pub asset_id: AssetId,
}

/// Identifies a coin: its derivation path plus its value. This is all the
/// key keeper needs to recompute the coin's commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoinId {
    pub idx: u64,
    pub key_type: KeyType,
    pub asset_id: AssetId,
    pub value: Amount,
}

impl CoinId {
    pub fn key_id(&self) -> KeyId {
        KeyId {
            idx: self.idx,
            key_type: self.key_type,
            asset_id: self.asset_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction Identifiers
// ---------------------------------------------------------------------------

/// Identifier of one logical transaction negotiation, shared by both peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(pub Uuid);

impl TxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Parameter namespace within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubTxId(pub u8);

impl Default for SubTxId {
    fn default() -> Self {
        Self(DEFAULT_SUB_TX_ID)
    }
}

// ---------------------------------------------------------------------------
// Status and Role
// ---------------------------------------------------------------------------

/// Lifecycle state of a transaction negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    /// Created, pipeline not entered yet.
    Pending,
    /// Pipeline running, waiting on async work or on the peer.
    InProgress,
    /// This party's part is done.
    Completed,
    /// Terminal failure; see the persisted failure reason.
    Failed,
    /// Canceled by the user.
    Canceled,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Canceled => write!(f, "Canceled"),
        }
    }
}

/// Which side of the negotiation this builder is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Funds the transaction and assembles the final result.
    Sender,
    /// Creates outputs for the amounts and hands back a partial signature.
    Receiver,
    /// Both sides at once: no peer, no exchange.
    SelfTx,
}

impl Role {
    pub fn selects_inputs(&self) -> bool {
        matches!(self, Self::Sender | Self::SelfTx)
    }

    pub fn receives(&self) -> bool {
        matches!(self, Self::Receiver | Self::SelfTx)
    }

    pub fn has_peer(&self) -> bool {
        !matches!(self, Self::SelfTx)
    }

    pub fn assembles(&self) -> bool {
        self.selects_inputs()
    }
}
