//! Transaction kernels.
//!
//! A kernel is the only part of a Mimblewimble transaction that survives
//! cut-through. It binds a fee and a validity height range to an excess
//! commitment `X`, and proves with a Schnorr signature that the signers
//! know `log_G(X)`. Emission kernels additionally carry an asset id and a
//! signed amount, which the verifier folds into the per-asset balance.
//!
//! ## Message layout
//!
//! ```text
//! fee (8 LE) || min_height (8 LE) || max_height (8 LE) || commitment (32)
//!   || hash_lock flag (1) [|| image (32)]
//!   || emission flag (1) [|| asset_id (8 LE) || amount (8 LE, i64)]
//! ```
//!
//! hashed with BLAKE3 in the kernel-message domain. The signature itself is
//! excluded from the message and included in the kernel id.

use curve25519_dalek::ristretto::RistrettoPoint;
use serde::{Deserialize, Serialize};

use crate::config::{DOMAIN_KERNEL_ID, DOMAIN_KERNEL_MESSAGE};
use crate::crypto::commitment::{Commitment, CommitmentError};
use crate::crypto::hash::domain_separated_hash_multi;
use crate::crypto::schnorr::{self, Signature};
use crate::transaction::types::{Amount, AssetId};

/// Asset emission carried by an emission kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emission {
    /// The asset being created or destroyed. Never the base asset.
    pub asset_id: AssetId,
    /// Positive for issue, negative for burn.
    pub amount: i64,
}

/// A transaction kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxKernel {
    pub fee: Amount,
    pub min_height: u64,
    pub max_height: u64,
    /// Excess commitment; the public key the signature is checked against.
    pub commitment: Commitment,
    pub signature: Option<Signature>,
    /// SHA-256 image the kernel is conditioned on, if any.
    pub hash_lock: Option<[u8; 32]>,
    pub emission: Option<Emission>,
}

/// 32-byte kernel identifier.
pub type KernelId = [u8; 32];

impl TxKernel {
    /// An unsigned kernel over `commitment`.
    pub fn new(fee: Amount, min_height: u64, max_height: u64, commitment: Commitment) -> Self {
        Self {
            fee,
            min_height,
            max_height,
            commitment,
            signature: None,
            hash_lock: None,
            emission: None,
        }
    }

    pub fn with_hash_lock(mut self, image: [u8; 32]) -> Self {
        self.hash_lock = Some(image);
        self
    }

    pub fn with_emission(mut self, emission: Emission) -> Self {
        self.emission = Some(emission);
        self
    }

    /// The message both signers commit to.
    pub fn message(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(24 + 32 + 33 + 17);
        buf.extend_from_slice(&self.fee.to_le_bytes());
        buf.extend_from_slice(&self.min_height.to_le_bytes());
        buf.extend_from_slice(&self.max_height.to_le_bytes());
        buf.extend_from_slice(self.commitment.as_bytes());
        match &self.hash_lock {
            Some(image) => {
                buf.push(1);
                buf.extend_from_slice(image);
            }
            None => buf.push(0),
        }
        match &self.emission {
            Some(e) => {
                buf.push(1);
                buf.extend_from_slice(&e.asset_id.0.to_le_bytes());
                buf.extend_from_slice(&e.amount.to_le_bytes());
            }
            None => buf.push(0),
        }
        domain_separated_hash_multi(DOMAIN_KERNEL_MESSAGE, &[buf.as_slice()])
    }

    /// Kernel id: message plus signature. Unsigned kernels hash a zeroed
    /// signature, so the id changes once the kernel is signed.
    pub fn id(&self) -> KernelId {
        let sig = self.signature.map(|s| s.to_bytes()).unwrap_or([0u8; 64]);
        let message = self.message();
        domain_separated_hash_multi(DOMAIN_KERNEL_ID, &[message.as_slice(), sig.as_slice()])
    }

    /// The excess as a group element.
    pub fn excess(&self) -> Result<RistrettoPoint, CommitmentError> {
        self.commitment.decompress()
    }

    /// Whether the signature is present and valid for the excess.
    pub fn verify_signature(&self) -> bool {
        match (&self.signature, self.excess()) {
            (Some(sig), Ok(excess)) => sig.verify(&excess, &self.message()),
            _ => false,
        }
    }

    /// Sign with a single secret whose public key is the commitment.
    pub fn sign(&mut self, secret: &curve25519_dalek::scalar::Scalar) {
        self.signature = Some(schnorr::sign(secret, &self.message()));
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id())
    }
}
