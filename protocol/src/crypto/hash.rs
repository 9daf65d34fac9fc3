//! # Hashing Utilities
//!
//! Two hash functions, each with one job:
//!
//! - **BLAKE3**: everything protocol-internal: kernel messages, kernel IDs,
//!   Schnorr challenges, key derivation inside the key keeper. Always used in
//!   `derive_key` mode with a context string from [`crate::config`], so a
//!   kernel message can never be confused with a challenge even if the input
//!   bytes happen to match.
//!
//! - **SHA-512**: only for hashing into the Ristretto group, because
//!   `RistrettoPoint::from_uniform_bytes` wants 64 uniformly distributed
//!   bytes and SHA-512 is the conventional source. SHA-256 is kept for
//!   hash-lock preimages, which external systems produce.
//!
//! ## hash_to_scalar
//!
//! Challenges and derived keys must be scalars mod `l`. We squeeze 64 bytes
//! out of BLAKE3's XOF and reduce them with `from_bytes_mod_order_wide`, which
//! keeps the bias below 2^-250. Reducing only 32 bytes would be measurably
//! biased for a 253-bit group order.

use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha256, Sha512};

/// Compute the SHA-256 hash of the input data.
///
/// Used for hash-lock images (see `TxRequest::lock_preimage`): the preimage
/// is revealed by whoever redeems the lock, and counterparties on other
/// chains usually speak SHA-256.
///
/// # Example
///
/// ```
/// use nova_mw::crypto::sha256;
///
/// let image = sha256(b"secret preimage");
/// assert_eq!(image.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute the SHA-512 hash of the input data as a fixed 64-byte array.
///
/// This is the input format `RistrettoPoint::from_uniform_bytes` expects.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 64];
    output.copy_from_slice(&result);
    output
}

/// Domain-separated BLAKE3 over several parts, fed sequentially.
pub fn domain_separated_hash_multi(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Hash a sequence of byte slices to a uniformly distributed Ristretto scalar.
///
/// The parts are length-prefixed (u64 LE) before hashing so that
/// `["ab", "c"]` and `["a", "bc"]` map to different scalars.
pub fn hash_to_scalar(context: &str, parts: &[&[u8]]) -> Scalar {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}
