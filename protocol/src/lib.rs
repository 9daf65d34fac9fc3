// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA MW: Confidential Transaction Builder
//!
//! A wallet-side library for building Mimblewimble-style confidential
//! transactions: Pedersen commitments instead of amounts, a kernel signed
//! jointly by both parties instead of per-input signatures, and an asset
//! layer that can issue, move and burn assets other than the base coin.
//!
//! The builder is resumable. Every intermediate value goes to a parameter
//! store before anything depends on it, so a wallet can crash at any point
//! and pick up the same negotiation from disk without selecting coins twice
//! or signing two different messages with one nonce.
//!
//! ## Architecture
//!
//! - **config**: Domain tags, size limits, `BuilderConfig`.
//! - **crypto**: Ristretto commitments, hashing, Schnorr partial signatures.
//! - **keykeeper**: Everything that touches a secret key lives behind this.
//! - **storage**: Transaction parameter stores (memory and sled).
//! - **vault**: Wallet coins, coin selection, the `CoinStore` contract.
//! - **transaction**: Kernels, the builder pipeline, the task driver.
//!
//! ## Design Philosophy
//!
//! 1. Write the parameter, then act on it. Never the other way round.
//! 2. Secret keys never leave the key keeper (asset-owner keys excepted).
//! 3. Every failure ends up as a specific, stable reason code.
//! 4. If it touches money, it has tests. Plural.

pub mod config;
pub mod crypto;
pub mod keykeeper;
pub mod storage;
pub mod transaction;
pub mod vault;
