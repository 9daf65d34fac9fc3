//! # Storage Module: Transaction Parameters
//!
//! Every value a builder computes is written to a per-transaction parameter
//! store before anything depends on it. That one rule is what makes the
//! pipeline resumable: after a crash, a stage looks up its own output, finds
//! it, and skips straight to the next stage instead of selecting coins
//! twice or drawing a second offset.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs   : ParameterId, ParameterStore contract, typed TxParameters view
//! memory.rs: DashMap-backed store for tests and ephemeral wallets
//! db.rs    : sled-backed store that survives restarts
//! ```
//!
//! ## Keys and values
//!
//! A parameter is addressed by `(TxId, SubTxId, ParameterId)`. Values are
//! opaque bytes at the store level; [`TxParameters`] bincode-encodes typed
//! values on the way in and decodes them on the way out. Writes are
//! last-writer-wins.
//!
//! ## Notifications
//!
//! `set(.., notify = true)` publishes a [`ParameterChanged`] on the store's
//! broadcast channel. The exchange layer listens for these to forward
//! public values (nonce, excess, partial signature) to the peer.

pub mod db;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::transaction::types::{SubTxId, TxId};

pub use db::SledParameterStore;
pub use memory::MemoryParameterStore;

// ---------------------------------------------------------------------------
// ParameterId
// ---------------------------------------------------------------------------

/// Every value a builder persists. Codes are stable and used as on-disk
/// keys; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ParameterId {
    // Negotiated up front, identical on both sides.
    IsSender = 1,
    IsSelfTx = 2,
    AmountList = 3,
    Fee = 4,
    MinHeight = 5,
    MaxHeight = 6,
    PeerLockImage = 7,
    AssetId = 8,
    AssetCommand = 9,
    AssetAmountList = 10,
    AssetOwnerIdx = 11,

    // Coin bookkeeping.
    InputCoins = 20,
    AssetInputCoins = 21,
    Change = 22,
    AssetChange = 23,
    OutputCoins = 24,
    AssetOutputCoins = 25,

    // Materialized transaction parts.
    Offset = 30,
    Inputs = 31,
    AssetInputs = 32,
    Outputs = 33,
    AssetOutputs = 34,
    OutputsRequested = 35,

    // Signing.
    NonceSlot = 40,
    PublicNonce = 41,
    PublicExcess = 42,
    Kernel = 43,
    EmissionKernel = 44,
    PartialSignature = 45,

    // Received from the peer.
    PeerInputs = 50,
    PeerOutputs = 51,
    PeerOffset = 52,
    PeerPublicNonce = 53,
    PeerPublicExcess = 54,
    PeerSignature = 55,

    // Results.
    KernelId = 60,
    EmissionKernelId = 61,
    Transaction = 62,
    Status = 63,
    FailureReason = 64,
}

impl ParameterId {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Published when a parameter is written with `notify = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterChanged {
    pub tx_id: TxId,
    pub sub_tx_id: SubTxId,
    pub param: ParameterId,
}

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors from reading or writing transaction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    /// The backend failed.
    #[error("parameter storage error: {0}")]
    Storage(String),

    /// A value could not be serialized.
    #[error("failed to encode parameter {id}: {reason}")]
    Encode { id: ParameterId, reason: String },

    /// Stored bytes do not decode as the expected type.
    #[error("failed to decode parameter {id}: {reason}")]
    Decode { id: ParameterId, reason: String },

    /// A mandatory parameter has never been set.
    #[error("mandatory parameter {0} is missing")]
    Missing(ParameterId),
}

pub type ParamResult<T> = Result<T, ParamError>;

// ---------------------------------------------------------------------------
// ParameterStore
// ---------------------------------------------------------------------------

/// Raw key/value persistence for transaction parameters.
pub trait ParameterStore: Send + Sync {
    fn get(&self, tx_id: &TxId, sub_tx_id: SubTxId, id: ParameterId) -> ParamResult<Option<Vec<u8>>>;

    fn set(
        &self,
        tx_id: &TxId,
        sub_tx_id: SubTxId,
        id: ParameterId,
        value: Vec<u8>,
        notify: bool,
    ) -> ParamResult<()>;

    /// Remove every parameter of `tx_id`, returning how many were removed.
    fn delete_tx(&self, tx_id: &TxId) -> ParamResult<usize>;

    /// Transactions with at least one stored parameter.
    fn tx_ids(&self) -> ParamResult<Vec<TxId>>;

    /// Subscribe to notifying writes.
    fn subscribe(&self) -> broadcast::Receiver<ParameterChanged>;
}

// ---------------------------------------------------------------------------
// TxParameters
// ---------------------------------------------------------------------------

/// Typed view of one `(TxId, SubTxId)` scope in a parameter store.
#[derive(Clone)]
pub struct TxParameters {
    store: Arc<dyn ParameterStore>,
    tx_id: TxId,
    sub_tx_id: SubTxId,
}

impl TxParameters {
    pub fn new(store: Arc<dyn ParameterStore>, tx_id: TxId, sub_tx_id: SubTxId) -> Self {
        Self { store, tx_id, sub_tx_id }
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    pub fn sub_tx_id(&self) -> SubTxId {
        self.sub_tx_id
    }

    pub fn store(&self) -> &Arc<dyn ParameterStore> {
        &self.store
    }

    /// Read and decode a parameter.
    pub fn get<T: DeserializeOwned>(&self, id: ParameterId) -> ParamResult<Option<T>> {
        match self.store.get(&self.tx_id, self.sub_tx_id, id)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| ParamError::Decode { id, reason: e.to_string() }),
            None => Ok(None),
        }
    }

    /// Read a parameter, or `default` when absent.
    pub fn get_or<T: DeserializeOwned>(&self, id: ParameterId, default: T) -> ParamResult<T> {
        Ok(self.get(id)?.unwrap_or(default))
    }

    /// Read a parameter that must exist.
    pub fn get_mandatory<T: DeserializeOwned>(&self, id: ParameterId) -> ParamResult<T> {
        self.get(id)?.ok_or(ParamError::Missing(id))
    }

    pub fn contains(&self, id: ParameterId) -> ParamResult<bool> {
        Ok(self.store.get(&self.tx_id, self.sub_tx_id, id)?.is_some())
    }

    /// Encode and write a parameter without notifying.
    pub fn set<T: Serialize + ?Sized>(&self, id: ParameterId, value: &T) -> ParamResult<()> {
        self.write(id, value, false)
    }

    /// Encode and write a parameter, notifying subscribers.
    pub fn set_notify<T: Serialize + ?Sized>(&self, id: ParameterId, value: &T) -> ParamResult<()> {
        self.write(id, value, true)
    }

    fn write<T: Serialize + ?Sized>(&self, id: ParameterId, value: &T, notify: bool) -> ParamResult<()> {
        let bytes =
            bincode::serialize(value).map_err(|e| ParamError::Encode { id, reason: e.to_string() })?;
        self.store.set(&self.tx_id, self.sub_tx_id, id, bytes, notify)
    }
}

impl fmt::Debug for TxParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxParameters")
            .field("tx_id", &self.tx_id)
            .field("sub_tx_id", &self.sub_tx_id)
            .finish()
    }
}
