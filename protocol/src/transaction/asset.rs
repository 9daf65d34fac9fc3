//! The asset layer: what Issue, Transfer and Burn add on top of a base
//! transaction.
//!
//! The base pipeline knows nothing about assets. When a transaction carries
//! an asset command, the builder loads an [`AssetLayer`] and asks its
//! [`AssetStrategy`] three questions at the relevant stages:
//!
//! | Command  | spends the asset    | creates asset outputs | emission |
//! |----------|---------------------|-----------------------|----------|
//! | Issue    | never               | self                  | `+total` |
//! | Transfer | sender              | receiver, sender change | none   |
//! | Burn     | self                | change only           | `-total` |
//!
//! A command that emits also signs with the asset-owner key on the funding
//! side, which shifts the offset the key keeper signs with (see
//! `TxBuilder::signing_offset`).

use std::fmt;
use std::sync::Arc;

use crate::storage::{ParameterId, TxParameters};
use crate::transaction::error::BuilderError;
use crate::transaction::kernel::Emission;
use crate::transaction::types::{total_amount, Amount, AmountList, AssetCommand, AssetId, Role};

/// Per-command behavior of the asset layer.
pub trait AssetStrategy: Send + Sync + fmt::Debug {
    fn command(&self) -> AssetCommand;

    /// Whether `role` selects asset coins as inputs.
    fn spends_asset(&self, role: Role) -> bool;

    /// Whether `role` creates asset coins for the amount list.
    fn creates_asset_outputs(&self, role: Role) -> bool;

    /// Signed supply change for `total`, if the command emits a kernel.
    fn emission(&self, total: Amount) -> Result<Option<i64>, BuilderError>;

    /// Whether an empty or all-zero amount list is a protocol violation.
    fn requires_amounts(&self) -> bool {
        true
    }
}

fn signed(total: Amount) -> Result<i64, BuilderError> {
    i64::try_from(total).map_err(|_| BuilderError::AmountOverflow("emission amount"))
}

#[derive(Debug)]
pub struct IssueStrategy;

impl AssetStrategy for IssueStrategy {
    fn command(&self) -> AssetCommand {
        AssetCommand::Issue
    }

    fn spends_asset(&self, _role: Role) -> bool {
        false
    }

    fn creates_asset_outputs(&self, role: Role) -> bool {
        role.receives()
    }

    fn emission(&self, total: Amount) -> Result<Option<i64>, BuilderError> {
        signed(total).map(Some)
    }
}

#[derive(Debug)]
pub struct TransferStrategy;

impl AssetStrategy for TransferStrategy {
    fn command(&self) -> AssetCommand {
        AssetCommand::Transfer
    }

    fn spends_asset(&self, role: Role) -> bool {
        role.selects_inputs()
    }

    fn creates_asset_outputs(&self, role: Role) -> bool {
        role.receives()
    }

    fn emission(&self, _total: Amount) -> Result<Option<i64>, BuilderError> {
        Ok(None)
    }

    fn requires_amounts(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct BurnStrategy;

impl AssetStrategy for BurnStrategy {
    fn command(&self) -> AssetCommand {
        AssetCommand::Burn
    }

    fn spends_asset(&self, role: Role) -> bool {
        role.selects_inputs()
    }

    // Burned units go nowhere; only the change comes back.
    fn creates_asset_outputs(&self, _role: Role) -> bool {
        false
    }

    fn emission(&self, total: Amount) -> Result<Option<i64>, BuilderError> {
        signed(total).map(|amount| Some(-amount))
    }
}

/// Strategy for a command.
pub fn strategy_for(command: AssetCommand) -> Arc<dyn AssetStrategy> {
    match command {
        AssetCommand::Issue => Arc::new(IssueStrategy),
        AssetCommand::Transfer => Arc::new(TransferStrategy),
        AssetCommand::Burn => Arc::new(BurnStrategy),
    }
}

/// The validated asset parameters of one transaction.
#[derive(Debug, Clone)]
pub struct AssetLayer {
    pub asset_id: AssetId,
    pub amounts: AmountList,
    pub total: Amount,
    strategy: Arc<dyn AssetStrategy>,
}

impl AssetLayer {
    /// Load and validate the asset parameters.
    ///
    /// `Ok(None)` for a plain base transaction. Validation runs before any
    /// coin is touched: an unknown command code, the base asset id, or an
    /// empty issue/burn amount are all fatal here.
    pub fn load(params: &TxParameters) -> Result<Option<Self>, BuilderError> {
        let Some(code) = params.get::<u8>(ParameterId::AssetCommand)? else {
            return Ok(None);
        };
        let command = AssetCommand::try_from(code).map_err(BuilderError::UnknownAssetCommand)?;

        let asset_id: AssetId = params.get_mandatory(ParameterId::AssetId)?;
        if asset_id.is_base() {
            return Err(BuilderError::ZeroAssetId(command));
        }

        let amounts: AmountList = params.get_or(ParameterId::AssetAmountList, Vec::new())?;
        let total = total_amount(&amounts).ok_or(BuilderError::AmountOverflow("asset amount total"))?;

        let strategy = strategy_for(command);
        if strategy.requires_amounts() && total == 0 {
            return Err(BuilderError::EmptyAssetAmount(command));
        }

        Ok(Some(Self { asset_id, amounts, total, strategy }))
    }

    pub fn command(&self) -> AssetCommand {
        self.strategy.command()
    }

    pub fn spends_asset(&self, role: Role) -> bool {
        self.strategy.spends_asset(role)
    }

    pub fn creates_asset_outputs(&self, role: Role) -> bool {
        self.strategy.creates_asset_outputs(role)
    }

    /// The emission this transaction carries, if any.
    pub fn emission(&self) -> Result<Option<Emission>, BuilderError> {
        Ok(self
            .strategy
            .emission(self.total)?
            .map(|amount| Emission { asset_id: self.asset_id, amount }))
    }
}
