//! # Protocol Configuration & Constants
//!
//! Every magic number the builder depends on lives here: domain separation
//! strings, transaction size limits, channel capacities, and the runtime
//! [`BuilderConfig`].
//!
//! The domain strings are consensus-relevant. Two wallets that disagree on
//! any of them will compute different generators, challenges, or kernel
//! messages and will never agree on a signature. Change them only together
//! with a protocol version bump.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Protocol version string, reported by the wallet binary.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Domain Separation
// ---------------------------------------------------------------------------

/// Seed for the base-asset value generator `H`.
pub const DOMAIN_VALUE_GENERATOR: &str = "nova-mw 2026 value generator H";

/// Prefix for per-asset value generators `H_a`.
pub const DOMAIN_ASSET_GENERATOR: &str = "nova-mw 2026 asset generator";

/// Kernel message hash (the thing both parties sign).
pub const DOMAIN_KERNEL_MESSAGE: &str = "nova-mw 2026 kernel message";

/// Kernel identifier hash (message plus final signature).
pub const DOMAIN_KERNEL_ID: &str = "nova-mw 2026 kernel id";

/// Schnorr challenge `e = H(R || X || m)`.
pub const DOMAIN_SCHNORR_CHALLENGE: &str = "nova-mw 2026 schnorr challenge";

/// Deterministic single-party Schnorr nonce.
pub const DOMAIN_SCHNORR_NONCE: &str = "nova-mw 2026 schnorr nonce";

/// Coin blinding factor derivation inside the key keeper.
pub const DOMAIN_COIN_KEY: &str = "nova-mw 2026 coin key";

/// Asset ownership key derivation inside the key keeper.
pub const DOMAIN_OWNER_KEY: &str = "nova-mw 2026 asset owner key";

/// Cache key for idempotent partial signatures.
pub const DOMAIN_SIGNING_REQUEST: &str = "nova-mw 2026 signing request";

/// Signing nonce of a key keeper slot.
pub const DOMAIN_NONCE_SLOT: &str = "nova-mw 2026 nonce slot";

// ---------------------------------------------------------------------------
// Transaction Limits
// ---------------------------------------------------------------------------

/// Upper bound on inputs in an assembled transaction (local plus peer).
pub const MAX_TX_INPUTS: usize = 256;

/// Upper bound on outputs in an assembled transaction (local plus peer).
pub const MAX_TX_OUTPUTS: usize = 256;

/// Default kernel upper validity height when the caller does not set one.
pub const DEFAULT_MAX_HEIGHT: u64 = u64::MAX;

/// Default subtransaction scope for single-scope negotiations.
pub const DEFAULT_SUB_TX_ID: u8 = 1;

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Broadcast channel capacity for transaction events and parameter
/// notifications. Slow subscribers lag rather than block the builder.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on live (allocated, not yet released) nonce slots in the
/// local key keeper.
pub const MAX_NONCE_SLOTS: usize = 4096;

// ---------------------------------------------------------------------------
// BuilderConfig
// ---------------------------------------------------------------------------

/// Tunables applied to every builder created by a wallet.
///
/// Deserializable so the wallet binary can load it from a JSON file; any
/// missing field falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Maximum number of inputs in the final transaction.
    pub max_inputs: usize,
    /// Maximum number of outputs in the final transaction.
    pub max_outputs: usize,
    /// Kernel min height used when the `MinHeight` parameter is absent.
    pub default_min_height: u64,
    /// Kernel max height used when the `MaxHeight` parameter is absent.
    pub default_max_height: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_inputs: MAX_TX_INPUTS,
            max_outputs: MAX_TX_OUTPUTS,
            default_min_height: 0,
            default_max_height: DEFAULT_MAX_HEIGHT,
        }
    }
}
