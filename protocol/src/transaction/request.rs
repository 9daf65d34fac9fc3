//! Fluent construction of a transaction's initial parameters.
//!
//! Both parties of a negotiation must start from the same agreed values
//! (amounts, fee, heights, asset command). [`TxRequest`] collects them and
//! writes them into a fresh parameter scope; the builder takes it from
//! there.
//!
//! ```rust,no_run
//! use nova_mw::transaction::{AssetId, Role, TxRequest};
//! # fn demo(params: &nova_mw::storage::TxParameters) -> nova_mw::storage::ParamResult<()> {
//! TxRequest::new(Role::SelfTx)
//!     .fee(10)
//!     .issue(AssetId(7), vec![100])
//!     .write(params)
//! # }
//! ```

use crate::crypto::hash::sha256;
use crate::storage::{ParamResult, ParameterId, TxParameters};
use crate::transaction::types::{Amount, AmountList, AssetCommand, AssetId, Role, TxStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
struct AssetRequest {
    command: AssetCommand,
    asset_id: AssetId,
    amounts: AmountList,
}

/// Initial parameters of one side of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    role: Role,
    amounts: AmountList,
    fee: Amount,
    min_height: Option<u64>,
    max_height: Option<u64>,
    lock_image: Option<[u8; 32]>,
    asset: Option<AssetRequest>,
    owner_idx: Option<u64>,
}

impl TxRequest {
    /// Defaults: no amounts, zero fee, heights from the builder config.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            amounts: Vec::new(),
            fee: 0,
            min_height: None,
            max_height: None,
            lock_image: None,
            asset: None,
            owner_idx: None,
        }
    }

    /// Base-asset amounts, one receiver output per entry.
    pub fn amounts(mut self, amounts: AmountList) -> Self {
        self.amounts = amounts;
        self
    }

    pub fn fee(mut self, fee: Amount) -> Self {
        self.fee = fee;
        self
    }

    pub fn min_height(mut self, height: u64) -> Self {
        self.min_height = Some(height);
        self
    }

    pub fn max_height(mut self, height: u64) -> Self {
        self.max_height = Some(height);
        self
    }

    /// Hash-lock preimage image agreed with the peer.
    pub fn lock_image(mut self, image: [u8; 32]) -> Self {
        self.lock_image = Some(image);
        self
    }

    /// Hash-lock the kernel to `SHA-256(preimage)`.
    pub fn lock_preimage(self, preimage: &[u8]) -> Self {
        self.lock_image(sha256(preimage))
    }

    pub fn asset(mut self, command: AssetCommand, asset_id: AssetId, amounts: AmountList) -> Self {
        self.asset = Some(AssetRequest { command, asset_id, amounts });
        self
    }

    pub fn issue(self, asset_id: AssetId, amounts: AmountList) -> Self {
        self.asset(AssetCommand::Issue, asset_id, amounts)
    }

    pub fn transfer(self, asset_id: AssetId, amounts: AmountList) -> Self {
        self.asset(AssetCommand::Transfer, asset_id, amounts)
    }

    pub fn burn(self, asset_id: AssetId, amounts: AmountList) -> Self {
        self.asset(AssetCommand::Burn, asset_id, amounts)
    }

    /// Derivation index of the asset-owner key. Defaults to the asset id.
    pub fn owner_idx(mut self, idx: u64) -> Self {
        self.owner_idx = Some(idx);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Write everything into `params` and mark the transaction pending.
    pub fn write(&self, params: &TxParameters) -> ParamResult<()> {
        params.set(ParameterId::IsSelfTx, &(self.role == Role::SelfTx))?;
        params.set(ParameterId::IsSender, &self.role.selects_inputs())?;
        params.set(ParameterId::AmountList, &self.amounts)?;
        params.set(ParameterId::Fee, &self.fee)?;
        if let Some(height) = self.min_height {
            params.set(ParameterId::MinHeight, &height)?;
        }
        if let Some(height) = self.max_height {
            params.set(ParameterId::MaxHeight, &height)?;
        }
        if let Some(image) = &self.lock_image {
            params.set(ParameterId::PeerLockImage, image)?;
        }
        if let Some(asset) = &self.asset {
            params.set(ParameterId::AssetCommand, &asset.command.code())?;
            params.set(ParameterId::AssetId, &asset.asset_id)?;
            params.set(ParameterId::AssetAmountList, &asset.amounts)?;
        }
        if let Some(idx) = self.owner_idx {
            params.set(ParameterId::AssetOwnerIdx, &idx)?;
        }
        params.set(ParameterId::Status, &TxStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryParameterStore;
    use crate::transaction::types::{SubTxId, TxId};
    use std::sync::Arc;

    #[test]
    fn writes_agreed_parameters() {
        let params =
            TxParameters::new(Arc::new(MemoryParameterStore::new()), TxId::new(), SubTxId::default());
        TxRequest::new(Role::Receiver)
            .amounts(vec![40])
            .fee(10)
            .max_height(500)
            .transfer(AssetId(7), vec![40])
            .write(&params)
            .unwrap();

        assert_eq!(params.get::<bool>(ParameterId::IsSender).unwrap(), Some(false));
        assert_eq!(params.get::<bool>(ParameterId::IsSelfTx).unwrap(), Some(false));
        assert_eq!(params.get::<u64>(ParameterId::MaxHeight).unwrap(), Some(500));
        assert!(!params.contains(ParameterId::MinHeight).unwrap());
        assert_eq!(
            params.get::<u8>(ParameterId::AssetCommand).unwrap(),
            Some(AssetCommand::Transfer.code())
        );
        assert_eq!(params.get::<TxStatus>(ParameterId::Status).unwrap(), Some(TxStatus::Pending));
    }

    #[test]
    fn preimage_becomes_sha256_lock_image() {
        let params =
            TxParameters::new(Arc::new(MemoryParameterStore::new()), TxId::new(), SubTxId::default());
        TxRequest::new(Role::Sender).lock_preimage(b"swap secret").write(&params).unwrap();
        assert_eq!(
            params.get::<[u8; 32]>(ParameterId::PeerLockImage).unwrap(),
            Some(sha256(b"swap secret"))
        );
    }
}
