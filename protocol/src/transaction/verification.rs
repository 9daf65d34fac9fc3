//! Transaction verification: structure, kernel signatures, and balance.
//!
//! The builder does not verify what it assembles; that is the consumer's job
//! (a node, or a wallet double-checking a peer's work). The checks here are
//! ordered cheapest first, ending with the group arithmetic.
//!
//! ## Balance equation
//!
//! ```text
//! sum(outputs) - sum(inputs) + offset*G + sum(kernel excess)
//!     + fee*H - sum(emission_i * H_{asset_i})  ==  0
//! ```
//!
//! Because every asset has an independent generator, this single equation
//! holds only if value is conserved separately for the base asset (where
//! the fee leaves) and for each issued asset (where emissions enter or
//! leave). Everything left over on `G` must be covered by the kernel
//! excesses, whose discrete logs the signatures prove knowledge of.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use thiserror::Error;

use super::body::Transaction;
use crate::config::{MAX_TX_INPUTS, MAX_TX_OUTPUTS};
use crate::crypto::commitment::{
    blinding_generator, signed_value_point, sum_commitments, value_generator, CommitmentError,
};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Reasons a transaction fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// No kernels at all.
    #[error("transaction has no kernels")]
    NoKernels,

    /// More inputs than a transaction may carry.
    #[error("too many inputs: {count} (max {max})")]
    TooManyInputs { count: usize, max: usize },

    /// More outputs than a transaction may carry.
    #[error("too many outputs: {count} (max {max})")]
    TooManyOutputs { count: usize, max: usize },

    /// Inputs or outputs are not in canonical order, or contain duplicates.
    #[error("transaction is not normalized")]
    NotNormalized,

    /// An emission kernel names the base asset.
    #[error("emission kernel {index} targets the base asset")]
    BaseAssetEmission { index: usize },

    /// A kernel signature is missing or does not verify.
    #[error("kernel {index} has an invalid signature")]
    InvalidKernelSignature { index: usize },

    /// A commitment failed to decompress.
    #[error("malformed commitment: {0}")]
    MalformedCommitment(#[from] CommitmentError),

    /// Commitments do not balance.
    #[error("commitments do not balance")]
    Unbalanced,
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Run every check on a finalized transaction.
pub fn verify_transaction(tx: &Transaction) -> Result<(), VerificationError> {
    if tx.kernels.is_empty() {
        return Err(VerificationError::NoKernels);
    }
    if tx.inputs.len() > MAX_TX_INPUTS {
        return Err(VerificationError::TooManyInputs {
            count: tx.inputs.len(),
            max: MAX_TX_INPUTS,
        });
    }
    if tx.outputs.len() > MAX_TX_OUTPUTS {
        return Err(VerificationError::TooManyOutputs {
            count: tx.outputs.len(),
            max: MAX_TX_OUTPUTS,
        });
    }
    if !tx.is_normalized() {
        return Err(VerificationError::NotNormalized);
    }
    for (index, kernel) in tx.kernels.iter().enumerate() {
        if matches!(kernel.emission, Some(e) if e.asset_id.is_base()) {
            return Err(VerificationError::BaseAssetEmission { index });
        }
        if !kernel.verify_signature() {
            return Err(VerificationError::InvalidKernelSignature { index });
        }
    }
    verify_balance(tx)
}

/// Check only the balance equation.
pub fn verify_balance(tx: &Transaction) -> Result<(), VerificationError> {
    if balance_residue(tx)? == RistrettoPoint::identity() {
        Ok(())
    } else {
        Err(VerificationError::Unbalanced)
    }
}

/// Left-hand side of the balance equation. Identity for a balanced
/// transaction.
pub fn balance_residue(tx: &Transaction) -> Result<RistrettoPoint, VerificationError> {
    let outputs = sum_commitments(tx.outputs.iter().map(|o| &o.commitment))?;
    let inputs = sum_commitments(tx.inputs.iter().map(|i| &i.commitment))?;
    let excess = sum_commitments(tx.kernels.iter().map(|k| &k.commitment))?;

    let mut residue = outputs - inputs + excess + blinding_generator() * tx.offset;
    residue += value_generator() * Scalar::from(tx.fee());
    for kernel in &tx.kernels {
        if let Some(emission) = kernel.emission {
            residue -= signed_value_point(emission.amount, emission.asset_id);
        }
    }
    Ok(residue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::commitment::{commit, random_scalar, Commitment};
    use crate::transaction::body::{Input, Output};
    use crate::transaction::kernel::{Emission, TxKernel};
    use crate::transaction::types::AssetId;

    /// One input of 100, one output of 90, fee 10, single signer.
    fn simple_tx() -> Transaction {
        let r_in = random_scalar();
        let r_out = random_scalar();
        let offset = random_scalar();
        let x = r_in - r_out - offset;

        let mut kernel = TxKernel::new(
            10,
            0,
            u64::MAX,
            Commitment::from_point(&(blinding_generator() * x)),
        );
        kernel.sign(&x);

        let mut tx = Transaction {
            offset,
            kernels: vec![kernel],
            inputs: vec![Input {
                commitment: commit(100, &r_in, AssetId::BASE),
                asset_id: None,
            }],
            outputs: vec![Output {
                commitment: commit(90, &r_out, AssetId::BASE),
                asset_id: None,
                maturity: 0,
            }],
        };
        tx.normalize();
        tx
    }

    #[test]
    fn balanced_transaction_verifies() {
        assert_eq!(verify_transaction(&simple_tx()), Ok(()));
    }

    #[test]
    fn inflated_output_is_rejected() {
        let mut tx = simple_tx();
        tx.kernels[0].fee = 9;
        // Changing the fee also invalidates the signature, so check the
        // balance directly.
        assert_eq!(verify_balance(&tx), Err(VerificationError::Unbalanced));
    }

    #[test]
    fn tampered_offset_is_rejected() {
        let mut tx = simple_tx();
        tx.offset += Scalar::ONE;
        assert_eq!(verify_transaction(&tx), Err(VerificationError::Unbalanced));
    }

    #[test]
    fn emission_balances_new_asset_units() {
        let asset = AssetId(7);
        let owner = random_scalar();
        let r_out = random_scalar();
        let offset = random_scalar();

        let mut emission = TxKernel::new(
            0,
            0,
            u64::MAX,
            Commitment::from_point(&(blinding_generator() * owner)),
        )
        .with_emission(Emission { asset_id: asset, amount: 50 });
        emission.sign(&owner);

        // Main kernel covers the blinding of the new output minus the owner key.
        let x = -r_out - offset - owner;
        let mut main = TxKernel::new(0, 0, u64::MAX, Commitment::from_point(&(blinding_generator() * x)));
        main.sign(&x);

        let tx = Transaction {
            offset,
            kernels: vec![emission, main],
            inputs: Vec::new(),
            outputs: vec![Output {
                commitment: commit(50, &r_out, asset),
                asset_id: Some(asset),
                maturity: 0,
            }],
        };
        assert_eq!(verify_transaction(&tx), Ok(()));

        // Claiming a larger emission than the outputs carry breaks balance.
        let mut greedy = tx.clone();
        greedy.kernels[0].emission = Some(Emission { asset_id: asset, amount: 51 });
        assert_eq!(verify_balance(&greedy), Err(VerificationError::Unbalanced));
    }

    #[test]
    fn base_asset_emission_is_rejected() {
        let mut tx = simple_tx();
        tx.kernels[0].emission = Some(Emission { asset_id: AssetId::BASE, amount: 1 });
        assert_eq!(
            verify_transaction(&tx),
            Err(VerificationError::BaseAssetEmission { index: 0 })
        );
    }

    #[test]
    fn empty_transaction_has_no_kernels() {
        let tx = Transaction {
            offset: Scalar::ZERO,
            kernels: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        assert_eq!(verify_transaction(&tx), Err(VerificationError::NoKernels));
    }
}
