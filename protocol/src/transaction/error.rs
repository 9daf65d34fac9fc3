//! Builder errors and the terminal failure-reason enumeration.
//!
//! Every pipeline stage returns `Result<StageOutcome, BuilderError>`. The
//! task driver decides what an error means for the transaction:
//!
//! - **fatal** errors (protocol violations, insufficient funds, a peer
//!   signing garbage) end the transaction with a [`TxFailureReason`];
//! - **retryable** errors (a keeper or database that is briefly
//!   unreachable) leave it at its last checkpoint for the next `update()`.
//!
//! `TxFailureReason` codes are stable and surface to UIs and the CLI, so
//! every terminal failure can be rendered as a specific message.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::crypto::commitment::CommitmentError;
use crate::keykeeper::KeyKeeperError;
use crate::storage::{ParamError, ParameterId};
use crate::transaction::types::{Amount, AssetCommand, AssetId};
use crate::vault::CoinStoreError;

// ---------------------------------------------------------------------------
// BuilderError
// ---------------------------------------------------------------------------

/// Everything that can go wrong inside a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    /// An asset operation named the base asset.
    #[error("asset id zero is not valid for {0}")]
    ZeroAssetId(AssetCommand),

    /// The persisted asset command code is not one we know.
    #[error("unrecognized asset command code {0}")]
    UnknownAssetCommand(u8),

    /// Issue or burn with nothing to issue or burn.
    #[error("{0} requires a non-empty, non-zero asset amount list")]
    EmptyAssetAmount(AssetCommand),

    /// Amounts do not fit the arithmetic (sum overflow, emission > i64).
    #[error("amount overflow while computing {0}")]
    AmountOverflow(&'static str),

    /// A parameter that must exist was never set.
    #[error("missing mandatory parameter {0}")]
    MissingParameter(ParameterId),

    /// Stored parameter bytes are unreadable.
    #[error("corrupted parameter {id}: {reason}")]
    CorruptedParameter { id: ParameterId, reason: String },

    /// The parameter store backend failed.
    #[error("parameter store: {0}")]
    Storage(String),

    /// Not enough available coins.
    #[error("insufficient funds in {asset}: need {required}, have {available}")]
    InsufficientFunds {
        asset: AssetId,
        required: Amount,
        available: Amount,
    },

    /// The coin store backend failed.
    #[error("coin store: {0}")]
    CoinStore(#[from] CoinStoreError),

    /// The key keeper refused or failed.
    #[error("key keeper: {0}")]
    KeyKeeper(#[from] KeyKeeperError),

    /// A commitment or point received from storage or the peer is invalid.
    #[error("invalid point: {0}")]
    InvalidPoint(#[from] CommitmentError),

    /// The peer's partial signature does not verify.
    #[error("peer partial signature does not verify")]
    InvalidPeerSignature,

    /// The key keeper's share does not match the nonce and excess this
    /// side published.
    #[error("local partial signature does not verify")]
    InvalidLocalSignature,

    /// The peer signed but left out data needed to assemble.
    #[error("peer data incomplete: {0} missing")]
    IncompletePeerData(ParameterId),

    /// Assembled transaction exceeds size limits.
    #[error("transaction too large: {inputs} inputs, {outputs} outputs")]
    TooLarge { inputs: usize, outputs: usize },

    /// An async key operation failed. The step can be retried.
    #[error("async key operation failed: {0}")]
    AsyncFailure(String),

    /// The user canceled the transaction.
    #[error("transaction canceled")]
    Canceled,
}

impl BuilderError {
    /// Whether this error ends the transaction.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Storage(_) | Self::CoinStore(_) | Self::AsyncFailure(_) => false,
            Self::KeyKeeper(e) => !e.is_retryable(),
            _ => true,
        }
    }

    /// The reason recorded when this error ends the transaction.
    pub fn failure_reason(&self) -> TxFailureReason {
        match self {
            Self::ZeroAssetId(_)
            | Self::UnknownAssetCommand(_)
            | Self::EmptyAssetAmount(_)
            | Self::AmountOverflow(_)
            | Self::TooLarge { .. } => TxFailureReason::InvalidTransaction,
            Self::MissingParameter(_) | Self::CorruptedParameter { .. } => {
                TxFailureReason::FailedToGetParameter
            }
            Self::Storage(_) | Self::CoinStore(_) => TxFailureReason::StorageError,
            Self::InsufficientFunds { .. } => TxFailureReason::InsufficientFunds,
            Self::KeyKeeper(_) | Self::AsyncFailure(_) | Self::InvalidLocalSignature => {
                TxFailureReason::KeyKeeperError
            }
            Self::InvalidPoint(_) => TxFailureReason::InvalidKernel,
            Self::InvalidPeerSignature => TxFailureReason::InvalidPeerSignature,
            Self::IncompletePeerData(_) => TxFailureReason::NoPeerData,
            Self::Canceled => TxFailureReason::Canceled,
        }
    }
}

impl From<ParamError> for BuilderError {
    fn from(err: ParamError) -> Self {
        match err {
            ParamError::Missing(id) => Self::MissingParameter(id),
            ParamError::Decode { id, reason } | ParamError::Encode { id, reason } => {
                Self::CorruptedParameter { id, reason }
            }
            ParamError::Storage(reason) => Self::Storage(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// TxFailureReason
// ---------------------------------------------------------------------------

/// Closed set of terminal failure reasons, with stable numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxFailureReason {
    Unknown = 0,
    Canceled = 1,
    InvalidTransaction = 2,
    InsufficientFunds = 3,
    FailedToGetParameter = 4,
    InvalidPeerSignature = 5,
    KeyKeeperError = 6,
    InvalidKernel = 7,
    StorageError = 8,
    NoPeerData = 9,
}

impl TxFailureReason {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Short user-facing message.
    pub fn message(self) -> &'static str {
        match self {
            Self::Unknown => "unexpected error",
            Self::Canceled => "canceled by user",
            Self::InvalidTransaction => "transaction is invalid",
            Self::InsufficientFunds => "not enough funds",
            Self::FailedToGetParameter => "required transaction data is missing",
            Self::InvalidPeerSignature => "peer sent an invalid signature",
            Self::KeyKeeperError => "key keeper failed",
            Self::InvalidKernel => "kernel data is invalid",
            Self::StorageError => "wallet storage failed",
            Self::NoPeerData => "peer data is incomplete",
        }
    }
}

impl fmt::Display for TxFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}
