//! In-process key keeper backed by a single master secret.
//!
//! Every key is a hash of the master secret and its derivation path, so the
//! keeper stores nothing per coin. Nonce slots work the same way: a slot id
//! is a random `u64` and its nonce is derived from the master secret and
//! that id. A keeper rebuilt from the same seed after a restart therefore
//! reproduces the nonce a resumed transaction already published, and two
//! transactions never share a slot.
//!
//! What lives in memory is the record of what each slot signed. It guards
//! against signing two different messages with one nonce while the slot is
//! live, and is dropped by [`KeyKeeper::release_nonce_slot`] once the owning
//! transaction is over. After a restart the record is gone; the builder
//! persists every input of the kernel message, so a resumed signature
//! repeats the original request.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};

use super::{KeyKeeper, KeyKeeperError, PartialSignRequest};
use crate::config::{
    DOMAIN_COIN_KEY, DOMAIN_NONCE_SLOT, DOMAIN_OWNER_KEY, DOMAIN_SIGNING_REQUEST, MAX_NONCE_SLOTS,
};
use crate::crypto::commitment::{blinding_generator, commit, Commitment};
use crate::crypto::hash::{domain_separated_hash_multi, hash_to_scalar};
use crate::crypto::schnorr;
use crate::transaction::body::{asset_tag, Output};
use crate::transaction::types::{AssetId, CoinId, KeyId, KeyType};

/// Digest of the request a slot signed, and the share it produced.
type SignedRecord = ([u8; 32], Scalar);

/// Key keeper holding its master secret in memory.
pub struct LocalKeyKeeper {
    master: [u8; 32],
    /// Live slots and what they signed so far.
    slots: Mutex<HashMap<u64, Option<SignedRecord>>>,
    /// Artificial delay on `generate_outputs`, to behave like a remote signer.
    latency: Option<Duration>,
}

impl LocalKeyKeeper {
    /// A keeper with a fresh random master secret.
    pub fn generate() -> Self {
        let mut master = [0u8; 32];
        OsRng.fill_bytes(&mut master);
        Self::from_seed(master)
    }

    /// A keeper with a fixed master secret. Same seed, same keys.
    pub fn from_seed(master: [u8; 32]) -> Self {
        Self {
            master,
            slots: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    /// Delay every `generate_outputs` call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of allocated slots not yet released.
    pub fn live_slots(&self) -> usize {
        self.slots.lock().len()
    }

    fn slot_nonce(&self, slot: u64) -> Scalar {
        hash_to_scalar(DOMAIN_NONCE_SLOT, &[&self.master, &slot.to_le_bytes()])
    }

    /// Blinding factor of a coin.
    fn blinding(&self, coin: &CoinId) -> Scalar {
        hash_to_scalar(
            DOMAIN_COIN_KEY,
            &[
                &self.master,
                &coin.idx.to_le_bytes(),
                &[coin.key_type.code()],
                &coin.asset_id.0.to_le_bytes(),
                &coin.value.to_le_bytes(),
            ],
        )
    }

    fn check_asset(coins: &[CoinId], asset: AssetId, is_input: bool) -> Result<(), KeyKeeperError> {
        match coins.iter().find(|c| c.asset_id != asset) {
            Some(coin) => Err(KeyKeeperError::AssetMismatch {
                expected: asset,
                found: coin.asset_id,
                is_input,
            }),
            None => Ok(()),
        }
    }

    fn request_digest(request: &PartialSignRequest) -> [u8; 32] {
        let mut coins = Vec::with_capacity(8 + (request.inputs.len() + request.outputs.len()) * 25);
        coins.extend_from_slice(&(request.inputs.len() as u64).to_le_bytes());
        for coin in request.inputs.iter().chain(&request.outputs) {
            coins.extend_from_slice(&coin.idx.to_le_bytes());
            coins.push(coin.key_type.code());
            coins.extend_from_slice(&coin.asset_id.0.to_le_bytes());
            coins.extend_from_slice(&coin.value.to_le_bytes());
        }
        domain_separated_hash_multi(
            DOMAIN_SIGNING_REQUEST,
            &[
                &request.message,
                request.offset.as_bytes(),
                request.combined_nonce.compress().as_bytes(),
                request.combined_excess.compress().as_bytes(),
                &coins,
            ],
        )
    }
}

#[async_trait]
impl KeyKeeper for LocalKeyKeeper {
    fn derive_key(&self, id: &KeyId) -> Result<Scalar, KeyKeeperError> {
        if id.key_type != KeyType::AssetOwner {
            return Err(KeyKeeperError::KeyNotExportable(id.key_type));
        }
        Ok(hash_to_scalar(
            DOMAIN_OWNER_KEY,
            &[&self.master, &id.idx.to_le_bytes(), &id.asset_id.0.to_le_bytes()],
        ))
    }

    fn generate_public_keys(
        &self,
        coins: &[CoinId],
        is_input: bool,
        asset: AssetId,
    ) -> Result<Vec<Commitment>, KeyKeeperError> {
        Self::check_asset(coins, asset, is_input)?;
        Ok(coins
            .iter()
            .map(|coin| commit(coin.value, &self.blinding(coin), asset))
            .collect())
    }

    async fn generate_outputs(
        &self,
        min_height: u64,
        coins: &[CoinId],
        asset: AssetId,
    ) -> Result<Vec<Output>, KeyKeeperError> {
        Self::check_asset(coins, asset, false)?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        tracing::debug!(count = coins.len(), %asset, min_height, "generating outputs");
        Ok(coins
            .iter()
            .map(|coin| Output {
                commitment: commit(coin.value, &self.blinding(coin), asset),
                asset_id: asset_tag(asset),
                maturity: min_height,
            })
            .collect())
    }

    fn allocate_nonce_slot(&self) -> Result<u64, KeyKeeperError> {
        let mut slots = self.slots.lock();
        if slots.len() >= MAX_NONCE_SLOTS {
            return Err(KeyKeeperError::NonceSlotsExhausted);
        }
        let slot = loop {
            let candidate = OsRng.next_u64();
            if !slots.contains_key(&candidate) {
                break candidate;
            }
        };
        slots.insert(slot, None);
        Ok(slot)
    }

    fn public_nonce(&self, slot: u64) -> Result<RistrettoPoint, KeyKeeperError> {
        Ok(blinding_generator() * self.slot_nonce(slot))
    }

    fn sign_partial(&self, request: &PartialSignRequest) -> Result<Scalar, KeyKeeperError> {
        let digest = Self::request_digest(request);
        let mut slots = self.slots.lock();
        // A slot missing here was allocated before a restart.
        let record = slots.entry(request.nonce_slot).or_insert(None);

        if let Some((signed_digest, partial)) = *record {
            return if signed_digest == digest {
                Ok(partial)
            } else {
                Err(KeyKeeperError::NonceReuse(request.nonce_slot))
            };
        }

        let inputs: Scalar = request.inputs.iter().map(|c| self.blinding(c)).sum();
        let outputs: Scalar = request.outputs.iter().map(|c| self.blinding(c)).sum();
        let excess_key = inputs - outputs - request.offset;

        let partial = schnorr::partial_sign(
            &excess_key,
            &self.slot_nonce(request.nonce_slot),
            &request.combined_nonce,
            &request.combined_excess,
            &request.message,
        );
        *record = Some((digest, partial));
        Ok(partial)
    }

    fn release_nonce_slot(&self, slot: u64) {
        if self.slots.lock().remove(&slot).is_some() {
            tracing::debug!(slot, "nonce slot released");
        }
    }
}
