//! Transaction body: inputs, outputs, kernels, and the offset.
//!
//! Inputs and outputs carry nothing but a commitment and an optional asset
//! tag. Values and blindings stay with their owners; the only thing a
//! verifier can check is that the commitments balance (see
//! [`super::verification`]).

use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};

use crate::crypto::commitment::Commitment;
use crate::transaction::kernel::TxKernel;
use crate::transaction::types::AssetId;

/// A spent coin, referenced by its commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Input {
    pub commitment: Commitment,
    /// `Some` for coins of a non-base asset.
    pub asset_id: Option<AssetId>,
}

/// A newly created coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Output {
    pub commitment: Commitment,
    /// `Some` for coins of a non-base asset.
    pub asset_id: Option<AssetId>,
    /// Height before which the output cannot be spent.
    pub maturity: u64,
}

/// Tag an asset id the way inputs and outputs store it.
pub fn asset_tag(asset: AssetId) -> Option<AssetId> {
    if asset.is_base() {
        None
    } else {
        Some(asset)
    }
}

/// A complete transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sum of both parties' offsets.
    pub offset: Scalar,
    /// Emission kernels first, then the main kernel.
    pub kernels: Vec<TxKernel>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl Transaction {
    /// Put inputs and outputs into canonical order and drop exact duplicates.
    ///
    /// Kernel order is preserved: emission kernels must stay ahead of the
    /// main kernel.
    pub fn normalize(&mut self) {
        self.inputs.sort();
        self.inputs.dedup();
        self.outputs.sort();
        self.outputs.dedup();
    }

    /// Total fee over all kernels.
    pub fn fee(&self) -> u64 {
        self.kernels.iter().map(|k| k.fee).sum()
    }

    /// The main (non-emission) kernel, if present.
    pub fn main_kernel(&self) -> Option<&TxKernel> {
        self.kernels.iter().find(|k| k.emission.is_none())
    }

    /// Emission kernels in order.
    pub fn emission_kernels(&self) -> impl Iterator<Item = &TxKernel> {
        self.kernels.iter().filter(|k| k.emission.is_some())
    }

    pub fn is_normalized(&self) -> bool {
        self.inputs.windows(2).all(|w| w[0] < w[1]) && self.outputs.windows(2).all(|w| w[0] < w[1])
    }
}
