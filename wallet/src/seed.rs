//! Key keeper master secrets for the binary.
//!
//! A wallet opened on `--data-dir` must come back with the same master
//! secret, or transactions resumed from its sled tree cannot be signed. The
//! secret is read from `--seed` when given, otherwise from a hex file next
//! to the tree, created on first use.

use anyhow::{bail, Context, Result};
use std::path::Path;

use nova_mw::crypto::sha256;

/// File holding a wallet's hex-encoded master secret.
pub const SEED_FILE: &str = "keeper.seed";

/// Parse a 32-byte seed given as 64 hex characters.
pub fn parse_seed(s: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(s.trim()).map_err(|e| format!("seed is not hex: {}", e))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| format!("seed must be 32 bytes, got {}", bytes.len()))
}

/// Master secret of the wallet called `name`, derived from a shared seed so
/// in-process wallets never share keys.
pub fn wallet_seed(seed: &[u8; 32], name: &str) -> [u8; 32] {
    let mut input = Vec::with_capacity(32 + name.len());
    input.extend_from_slice(seed);
    input.extend_from_slice(name.as_bytes());
    sha256(&input)
}

/// Read the seed stored in `dir`, or generate and store a new one.
pub fn load_or_create(dir: &Path) -> Result<[u8; 32]> {
    let path = dir.join(SEED_FILE);
    if path.exists() {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read key seed {}", path.display()))?;
        return match parse_seed(&text) {
            Ok(seed) => Ok(seed),
            Err(err) => bail!("corrupt key seed {}: {}", path.display(), err),
        };
    }

    let seed: [u8; 32] = rand::random();
    std::fs::write(&path, hex::encode(seed))
        .with_context(|| format!("failed to write key seed to {}", path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(path = %path.display(), "key seed generated");
    Ok(seed)
}
