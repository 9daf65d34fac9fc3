//! # Schnorr Signatures over Ristretto
//!
//! Kernels are signed with plain Schnorr over the blinding generator `G`:
//!
//! ```text
//! e = H(R || X || m)
//! s = k + e * x
//! verify:  s * G == R + e * X
//! ```
//!
//! The construction is linear, which is the whole reason Mimblewimble uses
//! it: two parties holding `x_a`, `x_b` with nonces `k_a`, `k_b` each compute
//! `s_i = k_i + e * x_i` against the *combined* `R = R_a + R_b` and
//! `X = X_a + X_b`, and `(R, s_a + s_b)` is a valid signature for `X`.
//! Neither party ever learns the other's secret.
//!
//! Single-party signing (emission kernels) derives its nonce from the secret
//! and the message, so retrying a sign never produces a second signature
//! with the same nonce over a different challenge.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};

use super::commitment::blinding_generator;
use super::hash::hash_to_scalar;
use crate::config::{DOMAIN_SCHNORR_CHALLENGE, DOMAIN_SCHNORR_NONCE};

/// A Schnorr signature: public nonce `R` and response `s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Public nonce `R = k * G` (combined, for two-party signatures).
    pub nonce_pub: RistrettoPoint,
    /// Response scalar `s = k + e * x`.
    pub s: Scalar,
}

impl Signature {
    /// 64-byte wire form: `R || s`.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.nonce_pub.compress().as_bytes());
        out[32..].copy_from_slice(self.s.as_bytes());
        out
    }

    /// Check this signature against public key `excess` and `message`.
    pub fn verify(&self, excess: &RistrettoPoint, message: &[u8; 32]) -> bool {
        let e = challenge(&self.nonce_pub, excess, message);
        blinding_generator() * self.s == self.nonce_pub + excess * e
    }
}

/// The Fiat-Shamir challenge `e = H(R || X || m)`.
pub fn challenge(nonce_pub: &RistrettoPoint, excess: &RistrettoPoint, message: &[u8; 32]) -> Scalar {
    hash_to_scalar(
        DOMAIN_SCHNORR_CHALLENGE,
        &[
            nonce_pub.compress().as_bytes(),
            excess.compress().as_bytes(),
            message,
        ],
    )
}

/// Single-party signature with a deterministic nonce.
pub fn sign(secret: &Scalar, message: &[u8; 32]) -> Signature {
    let nonce = hash_to_scalar(DOMAIN_SCHNORR_NONCE, &[secret.as_bytes(), message]);
    let nonce_pub = blinding_generator() * nonce;
    let excess = blinding_generator() * secret;
    Signature {
        nonce_pub,
        s: partial_sign(secret, &nonce, &nonce_pub, &excess, message),
    }
}

/// One party's share `s_i = k_i + e * x_i` against the combined nonce and
/// excess.
pub fn partial_sign(
    secret: &Scalar,
    nonce: &Scalar,
    combined_nonce: &RistrettoPoint,
    combined_excess: &RistrettoPoint,
    message: &[u8; 32],
) -> Scalar {
    nonce + challenge(combined_nonce, combined_excess, message) * secret
}

/// Check one party's share before adding it: `s_i * G == R_i + e * X_i`,
/// where `e` is computed over the combined values.
pub fn verify_partial(
    partial: &Scalar,
    public_nonce: &RistrettoPoint,
    public_excess: &RistrettoPoint,
    combined_nonce: &RistrettoPoint,
    combined_excess: &RistrettoPoint,
    message: &[u8; 32],
) -> bool {
    let e = challenge(combined_nonce, combined_excess, message);
    blinding_generator() * partial == public_nonce + public_excess * e
}

/// Add partial responses into the final signature over the combined nonce.
pub fn combine(combined_nonce: RistrettoPoint, partials: &[Scalar]) -> Signature {
    Signature {
        nonce_pub: combined_nonce,
        s: partials.iter().sum(),
    }
}
