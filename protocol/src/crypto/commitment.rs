//! # Pedersen Commitments over Ristretto
//!
//! A commitment to `value` under asset `a` with blinding factor `r` is
//!
//! ```text
//! C = value * H_a + r * G
//! ```
//!
//! where `G` is the Ristretto basepoint and `H_a` is a per-asset value
//! generator obtained by hashing into the group. Nobody knows `log_G(H_a)`,
//! which is what makes the commitment binding. The base asset (id 0) uses the
//! plain value generator `H`.
//!
//! ## Why per-asset generators
//!
//! Sums of commitments only cancel when the value terms share a generator.
//! Giving every asset its own `H_a` means a transaction balances if and only
//! if it balances separately for every asset: 5 units of asset 7 can never
//! pay for 5 units of the base asset, because `5*H_7 - 5*H` is not the
//! identity.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::hash::sha512;
use crate::config::{DOMAIN_ASSET_GENERATOR, DOMAIN_VALUE_GENERATOR};
use crate::transaction::types::AssetId;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors from decoding or combining commitments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitmentError {
    /// The 32 bytes are not a canonical Ristretto encoding.
    #[error("bytes are not a valid Ristretto point encoding")]
    InvalidPoint,

    /// Wrong input length.
    #[error("commitment must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

static VALUE_GENERATOR: OnceLock<RistrettoPoint> = OnceLock::new();

/// The blinding generator `G` (Ristretto basepoint).
pub fn blinding_generator() -> RistrettoPoint {
    RISTRETTO_BASEPOINT_POINT
}

/// The base-asset value generator `H`.
pub fn value_generator() -> RistrettoPoint {
    *VALUE_GENERATOR
        .get_or_init(|| RistrettoPoint::from_uniform_bytes(&sha512(DOMAIN_VALUE_GENERATOR.as_bytes())))
}

/// The value generator `H_a` for `asset`. The base asset maps to `H`.
pub fn asset_generator(asset: AssetId) -> RistrettoPoint {
    if asset.is_base() {
        return value_generator();
    }
    let mut seed = Vec::with_capacity(DOMAIN_ASSET_GENERATOR.len() + 8);
    seed.extend_from_slice(DOMAIN_ASSET_GENERATOR.as_bytes());
    seed.extend_from_slice(&asset.0.to_le_bytes());
    RistrettoPoint::from_uniform_bytes(&sha512(&seed))
}

// ---------------------------------------------------------------------------
// Commitment
// ---------------------------------------------------------------------------

/// A compressed Pedersen commitment (or any group element used as one,
/// such as a kernel excess).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment(CompressedRistretto);

impl Commitment {
    /// Compress a group element into a commitment.
    pub fn from_point(point: &RistrettoPoint) -> Self {
        Self(point.compress())
    }

    /// Parse and validate a 32-byte encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CommitmentError> {
        let compressed = CompressedRistretto::from_slice(bytes)
            .map_err(|_| CommitmentError::InvalidLength(bytes.len()))?;
        compressed
            .decompress()
            .ok_or(CommitmentError::InvalidPoint)?;
        Ok(Self(compressed))
    }

    /// Decompress back into a group element.
    pub fn decompress(&self) -> Result<RistrettoPoint, CommitmentError> {
        self.0.decompress().ok_or(CommitmentError::InvalidPoint)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl Ord for Commitment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl PartialOrd for Commitment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({}..)", &self.to_hex()[..16])
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Commit to `value` of `asset` under `blinding`.
pub fn commit(value: u64, blinding: &Scalar, asset: AssetId) -> Commitment {
    Commitment::from_point(&commit_point(value, blinding, asset))
}

/// Same as [`commit`] but without compressing.
pub fn commit_point(value: u64, blinding: &Scalar, asset: AssetId) -> RistrettoPoint {
    asset_generator(asset) * Scalar::from(value) + blinding_generator() * blinding
}

/// `amount * H_a` for a signed amount (negative for burns).
pub fn signed_value_point(amount: i64, asset: AssetId) -> RistrettoPoint {
    let magnitude = Scalar::from(amount.unsigned_abs());
    let scalar = if amount < 0 { -magnitude } else { magnitude };
    asset_generator(asset) * scalar
}

/// Decompress and add a list of commitments. The empty sum is the identity.
pub fn sum_commitments<'a, I>(commitments: I) -> Result<RistrettoPoint, CommitmentError>
where
    I: IntoIterator<Item = &'a Commitment>,
{
    commitments
        .into_iter()
        .try_fold(RistrettoPoint::identity(), |acc, c| Ok(acc + c.decompress()?))
}

/// Draw a uniformly random scalar from the OS RNG.
pub fn random_scalar() -> Scalar {
    let mut wide = [0u8; 64];
    OsRng.fill_bytes(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitments_are_additively_homomorphic() {
        let r1 = random_scalar();
        let r2 = random_scalar();
        let asset = AssetId(7);

        let lhs = commit_point(30, &r1, asset) + commit_point(12, &r2, asset);
        let rhs = commit_point(42, &(r1 + r2), asset);
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn asset_generators_are_independent() {
        assert_eq!(asset_generator(AssetId::BASE), value_generator());
        assert_ne!(asset_generator(AssetId(1)), value_generator());
        assert_ne!(asset_generator(AssetId(1)), asset_generator(AssetId(2)));
        assert_ne!(value_generator(), blinding_generator());
    }

    #[test]
    fn same_value_different_asset_does_not_cancel() {
        let r = random_scalar();
        let base = commit_point(5, &r, AssetId::BASE);
        let tagged = commit_point(5, &r, AssetId(9));
        assert_ne!(base - tagged, RistrettoPoint::identity());
    }

    #[test]
    fn signed_value_point_negates_for_burns() {
        let asset = AssetId(3);
        let sum = signed_value_point(25, asset) + signed_value_point(-25, asset);
        assert_eq!(sum, RistrettoPoint::identity());
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert_eq!(
            Commitment::from_bytes(&[0xff; 32]),
            Err(CommitmentError::InvalidPoint)
        );
        assert_eq!(
            Commitment::from_bytes(&[0u8; 31]),
            Err(CommitmentError::InvalidLength(31))
        );

        let c = commit(1, &random_scalar(), AssetId::BASE);
        assert_eq!(Commitment::from_bytes(c.as_bytes()), Ok(c));
    }

    #[test]
    fn sum_of_nothing_is_identity() {
        let empty: Vec<Commitment> = Vec::new();
        assert_eq!(sum_commitments(&empty).unwrap(), RistrettoPoint::identity());
    }
}
