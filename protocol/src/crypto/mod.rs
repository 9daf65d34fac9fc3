//! # Cryptographic Primitives
//!
//! Everything the builder needs from elliptic-curve land:
//!
//! - **Pedersen commitments** over Ristretto with per-asset value
//!   generators ([`commitment`]).
//! - **Schnorr signatures**, single-party and two-party aggregated
//!   ([`schnorr`]).
//! - **Hashing** with domain separation, including hash-to-scalar
//!   ([`hash`]).
//!
//! All group arithmetic is delegated to `curve25519-dalek`. This module adds
//! naming and domain separation, nothing clever.

pub mod commitment;
pub mod hash;
pub mod schnorr;

pub use commitment::{commit, random_scalar, Commitment, CommitmentError};
pub use hash::{hash_to_scalar, sha256};
pub use schnorr::Signature;
