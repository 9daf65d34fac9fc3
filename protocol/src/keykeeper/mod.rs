//! # Key Keeper: Secret-Key Operations
//!
//! The builder never holds a coin's blinding factor. Everything that needs
//! one goes through a [`KeyKeeper`]: producing commitments for coin ids,
//! handing out signing nonces, and computing this party's partial
//! signature. A keeper may live in-process ([`LocalKeyKeeper`]), behind an
//! RPC, or on a hardware device, so the contract is written to be safe to
//! retry: the same arguments always produce the same answer.
//!
//! ## What the builder may see
//!
//! | Operation              | Returns                 | Sync? |
//! |------------------------|-------------------------|-------|
//! | `derive_key`           | asset-owner scalar only | yes   |
//! | `generate_public_keys` | input commitments       | yes   |
//! | `generate_outputs`     | output commitments      | no    |
//! | `allocate_nonce_slot`  | slot id                 | yes   |
//! | `public_nonce`         | `R_i = k_i * G`         | yes   |
//! | `sign_partial`         | `s_i = k_i + e * x_i`   | yes   |
//! | `release_nonce_slot`   | nothing                 | yes   |
//!
//! `derive_key` refuses anything but [`KeyType::AssetOwner`]: the owner key
//! has to be known to sign an emission kernel, but coin blindings never
//! leave the keeper.

pub mod local;

use async_trait::async_trait;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::commitment::Commitment;
use crate::transaction::body::Output;
use crate::transaction::types::{AssetId, CoinId, KeyId, KeyType};

pub use local::LocalKeyKeeper;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors reported by a key keeper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyKeeperError {
    /// The slot already signed something else. Signing again would leak the
    /// key.
    #[error("nonce slot {0} was already used for a different message")]
    NonceReuse(u64),

    /// Too many live nonce slots.
    #[error("nonce slots exhausted")]
    NonceSlotsExhausted,

    /// A coin id names a different asset than the request.
    #[error("coin of {found} requested under {expected} (input: {is_input})")]
    AssetMismatch {
        expected: AssetId,
        found: AssetId,
        is_input: bool,
    },

    /// The requested key type never leaves the keeper.
    #[error("keys of type {0:?} cannot be exported")]
    KeyNotExportable(KeyType),

    /// The keeper could not be reached. Safe to retry.
    #[error("key keeper unavailable: {0}")]
    Unavailable(String),
}

impl KeyKeeperError {
    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// ---------------------------------------------------------------------------
// Signing Request
// ---------------------------------------------------------------------------

/// Everything a keeper needs to produce one partial kernel signature.
///
/// The keeper recomputes `x = sum(inputs) - sum(outputs) - offset` from the
/// coin ids itself; the builder only supplies ids and the public values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignRequest {
    pub inputs: Vec<CoinId>,
    pub outputs: Vec<CoinId>,
    /// Offset, already adjusted by any asset-owner key.
    pub offset: Scalar,
    pub nonce_slot: u64,
    pub message: [u8; 32],
    pub combined_nonce: RistrettoPoint,
    pub combined_excess: RistrettoPoint,
}

// ---------------------------------------------------------------------------
// KeyKeeper
// ---------------------------------------------------------------------------

/// Secret-key operations consumed by the builder.
#[async_trait]
pub trait KeyKeeper: Send + Sync {
    /// Export a derived key. Only asset-owner keys are exportable.
    fn derive_key(&self, id: &KeyId) -> Result<Scalar, KeyKeeperError>;

    /// Commitments for `coins`, all of which must belong to `asset`.
    fn generate_public_keys(
        &self,
        coins: &[CoinId],
        is_input: bool,
        asset: AssetId,
    ) -> Result<Vec<Commitment>, KeyKeeperError>;

    /// Materialize outputs for `coins`. May take a while (remote signer,
    /// hardware confirmation, range proofs).
    async fn generate_outputs(
        &self,
        min_height: u64,
        coins: &[CoinId],
        asset: AssetId,
    ) -> Result<Vec<Output>, KeyKeeperError>;

    /// Reserve a fresh signing nonce. Slot ids are unique across restarts
    /// of the same keeper.
    fn allocate_nonce_slot(&self) -> Result<u64, KeyKeeperError>;

    /// `R = k * G` for a slot. The same slot always yields the same nonce.
    fn public_nonce(&self, slot: u64) -> Result<RistrettoPoint, KeyKeeperError>;

    /// This party's share of the kernel signature. Identical requests return
    /// identical results; a different request on a used slot fails.
    fn sign_partial(&self, request: &PartialSignRequest) -> Result<Scalar, KeyKeeperError>;

    /// Forget a slot whose transaction has ended. Unknown slots are ignored.
    fn release_nonce_slot(&self, slot: u64);
}
