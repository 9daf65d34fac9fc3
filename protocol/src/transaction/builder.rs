//! The transaction builder: one method per pipeline stage.
//!
//! [`TxBuilder`] holds no negotiation state of its own. Every stage reads
//! what it needs from the [`TxParameters`] scope, checks whether its own
//! result is already there, and if not computes it and writes it back
//! before returning. A stage with several outputs writes its marker
//! parameter last, so a crash in the middle re-runs the stage rather than
//! skipping it.
//!
//! Asset behavior is not special-cased here: stages consult the optional
//! [`AssetLayer`] for whether to spend the asset, create asset coins, and
//! emit. Sequencing, async work and failure handling belong to the task
//! driver in [`super::task`].
//!
//! ## Excess and offset
//!
//! ```text
//! X_local = sum(C_in) - sum(C_out) - sum_a (v_in_a - v_out_a) * H_a
//!           - (offset + owner_key) * G
//! ```
//!
//! `owner_key` is present only on the funding side of an emitting
//! transaction; the emission kernel then carries `owner_key * G` so the
//! balance still closes. The key keeper signs with the same adjusted offset.

use std::sync::Arc;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use tracing::{debug, info, warn};

use crate::config::BuilderConfig;
use crate::crypto::commitment::{asset_generator, blinding_generator, random_scalar, sum_commitments, Commitment};
use crate::crypto::schnorr;
use crate::keykeeper::{KeyKeeper, PartialSignRequest};
use crate::storage::{ParameterId, TxParameters};
use crate::transaction::asset::AssetLayer;
use crate::transaction::body::{asset_tag, Input, Output, Transaction};
use crate::transaction::error::BuilderError;
use crate::transaction::kernel::{Emission, TxKernel};
use crate::transaction::pipeline::{AsyncRequest, Stage, StageOutcome};
use crate::transaction::types::{
    total_amount, Amount, AmountList, AssetId, CoinId, KeyId, KeyType, Role, TxId,
};
use crate::vault::{Coin, CoinStatus, CoinStore};

/// Builds one side of a transaction on top of a parameter scope.
pub struct TxBuilder {
    params: TxParameters,
    coins: Arc<dyn CoinStore>,
    keeper: Arc<dyn KeyKeeper>,
    config: BuilderConfig,
    asset: Option<AssetLayer>,
    asset_loaded: bool,
}

impl TxBuilder {
    pub fn new(
        params: TxParameters,
        coins: Arc<dyn CoinStore>,
        keeper: Arc<dyn KeyKeeper>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            params,
            coins,
            keeper,
            config,
            asset: None,
            asset_loaded: false,
        }
    }

    pub fn params(&self) -> &TxParameters {
        &self.params
    }

    pub fn tx_id(&self) -> TxId {
        self.params.tx_id()
    }

    pub fn keeper(&self) -> Arc<dyn KeyKeeper> {
        Arc::clone(&self.keeper)
    }

    pub fn coin_store(&self) -> Arc<dyn CoinStore> {
        Arc::clone(&self.coins)
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Which side of the negotiation the parameters describe.
    pub fn role(&self) -> Result<Role, BuilderError> {
        if self.params.get_or(ParameterId::IsSelfTx, false)? {
            return Ok(Role::SelfTx);
        }
        let is_sender: bool = self.params.get_mandatory(ParameterId::IsSender)?;
        Ok(if is_sender { Role::Sender } else { Role::Receiver })
    }

    /// The validated asset layer, loaded on first use.
    pub fn asset_layer(&mut self) -> Result<Option<AssetLayer>, BuilderError> {
        if !self.asset_loaded {
            self.asset = AssetLayer::load(&self.params)?;
            self.asset_loaded = true;
        }
        Ok(self.asset.clone())
    }

    /// Run one stage for `role`.
    pub fn run_stage(&mut self, stage: Stage, role: Role) -> Result<StageOutcome, BuilderError> {
        match stage {
            Stage::SelectInputs => self.select_inputs(role),
            Stage::GenerateNewCoins => self.generate_new_coins(role),
            Stage::GenerateOffset => self.generate_offset(),
            Stage::CreateInputs => self.create_inputs(),
            Stage::CreateOutputs => self.create_outputs(),
            Stage::PublishLocal => self.publish_local(role),
            Stage::GetPeerInputsAndOutputs => self.get_peer_inputs_and_outputs(role),
            Stage::CreateKernel => self.create_kernel(role),
            Stage::SignPartial => self.sign_partial(role),
            Stage::CreateTransaction => self.create_transaction(role),
        }
    }

    // -- stages -----------------------------------------------------------

    fn select_inputs(&mut self, role: Role) -> Result<StageOutcome, BuilderError> {
        // Asset parameters are validated before any coin is looked at.
        let asset = self.asset_layer()?;

        if self.params.contains(ParameterId::InputCoins)? {
            let selected = self.coin_ids(ParameterId::InputCoins, ParameterId::AssetInputCoins)?;
            self.lock_coins(&selected)?;
            return Ok(StageOutcome::Skipped);
        }

        let mut base: (Vec<CoinId>, Amount) = (Vec::new(), 0);
        let mut spent_asset = None;
        if role.selects_inputs() {
            let amounts: AmountList = self.params.get_or(ParameterId::AmountList, Vec::new())?;
            let fee: Amount = self.params.get_or(ParameterId::Fee, 0)?;
            let required = total_amount(&amounts)
                .and_then(|total| total.checked_add(fee))
                .ok_or(BuilderError::AmountOverflow("base amount plus fee"))?;
            base = self.select(required, AssetId::BASE)?;

            if let Some(layer) = asset.as_ref().filter(|layer| layer.spends_asset(role)) {
                spent_asset = Some(self.select(layer.total, layer.asset_id)?);
            }
        }

        let mut selected = base.0.clone();
        if let Some((coins, change)) = &spent_asset {
            self.params.set(ParameterId::AssetInputCoins, coins)?;
            self.params.set(ParameterId::AssetChange, change)?;
            selected.extend_from_slice(coins);
        }
        self.params.set(ParameterId::Change, &base.1)?;
        self.params.set(ParameterId::InputCoins, &base.0)?;
        self.lock_coins(&selected)?;

        info!(
            tx_id = %self.tx_id(),
            inputs = selected.len(),
            change = base.1,
            "selected inputs"
        );
        Ok(StageOutcome::Done)
    }

    fn generate_new_coins(&mut self, role: Role) -> Result<StageOutcome, BuilderError> {
        if self.params.contains(ParameterId::OutputCoins)? {
            let created = self.coin_ids(ParameterId::OutputCoins, ParameterId::AssetOutputCoins)?;
            self.store_new_coins(&created, true)?;
            return Ok(StageOutcome::Skipped);
        }
        let asset = self.asset_layer()?;

        let mut base = Vec::new();
        if role.receives() {
            let amounts: AmountList = self.params.get_or(ParameterId::AmountList, Vec::new())?;
            base.extend(
                amounts
                    .iter()
                    .filter(|&&value| value > 0)
                    .map(|&value| new_coin(KeyType::Regular, AssetId::BASE, value)),
            );
        }
        if role.selects_inputs() {
            let change: Amount = self.params.get_or(ParameterId::Change, 0)?;
            if change > 0 {
                base.push(new_coin(KeyType::Change, AssetId::BASE, change));
            }
        }

        let mut created = Vec::new();
        if let Some(layer) = &asset {
            let mut coins = Vec::new();
            if layer.creates_asset_outputs(role) {
                coins.extend(
                    layer
                        .amounts
                        .iter()
                        .filter(|&&value| value > 0)
                        .map(|&value| new_coin(KeyType::Regular, layer.asset_id, value)),
                );
            }
            if layer.spends_asset(role) {
                let change: Amount = self.params.get_or(ParameterId::AssetChange, 0)?;
                if change > 0 {
                    coins.push(new_coin(KeyType::Change, layer.asset_id, change));
                }
            }
            self.params.set(ParameterId::AssetOutputCoins, &coins)?;
            created = coins;
        }
        self.params.set(ParameterId::OutputCoins, &base)?;
        created.extend_from_slice(&base);
        self.store_new_coins(&created, false)?;

        debug!(tx_id = %self.tx_id(), coins = created.len(), "created new coins");
        Ok(StageOutcome::Done)
    }

    fn generate_offset(&mut self) -> Result<StageOutcome, BuilderError> {
        if self.params.contains(ParameterId::Offset)? {
            return Ok(StageOutcome::Skipped);
        }
        self.params.set(ParameterId::Offset, &random_scalar())?;
        Ok(StageOutcome::Done)
    }

    fn create_inputs(&mut self) -> Result<StageOutcome, BuilderError> {
        let asset = self.asset_layer()?;
        let mut batches = vec![(ParameterId::InputCoins, ParameterId::Inputs, AssetId::BASE)];
        if let Some(layer) = &asset {
            batches.push((ParameterId::AssetInputCoins, ParameterId::AssetInputs, layer.asset_id));
        }

        let mut outcome = StageOutcome::Skipped;
        for (source, target, asset_id) in batches {
            if self.params.contains(target)? {
                continue;
            }
            let coins: Vec<CoinId> = self.params.get_or(source, Vec::new())?;
            let inputs: Vec<Input> = if coins.is_empty() {
                Vec::new()
            } else {
                self.keeper
                    .generate_public_keys(&coins, true, asset_id)?
                    .into_iter()
                    .map(|commitment| Input { commitment, asset_id: asset_tag(asset_id) })
                    .collect()
            };
            self.params.set(target, &inputs)?;
            outcome = StageOutcome::Done;
        }
        Ok(outcome)
    }

    /// Outputs come from the keeper asynchronously. At most one batch is
    /// requested per call; the driver stores the result under the batch's
    /// target and re-enters.
    fn create_outputs(&mut self) -> Result<StageOutcome, BuilderError> {
        let asset = self.asset_layer()?;
        let mut batches = vec![(ParameterId::OutputCoins, ParameterId::Outputs, AssetId::BASE)];
        if let Some(layer) = &asset {
            batches.push((ParameterId::AssetOutputCoins, ParameterId::AssetOutputs, layer.asset_id));
        }

        let mut outcome = StageOutcome::Skipped;
        for (source, target, asset_id) in batches {
            if self.params.contains(target)? {
                continue;
            }
            let coins: Vec<CoinId> = self.params.get_or(source, Vec::new())?;
            if coins.is_empty() {
                self.params.set(target, &Vec::<Output>::new())?;
                outcome = StageOutcome::Done;
                continue;
            }
            self.params.set(ParameterId::OutputsRequested, &target)?;
            return Ok(StageOutcome::Pending(AsyncRequest::GenerateOutputs {
                min_height: self.min_height()?,
                coins,
                asset: asset_id,
                target,
            }));
        }
        Ok(outcome)
    }

    fn publish_local(&mut self, role: Role) -> Result<StageOutcome, BuilderError> {
        if self.params.contains(ParameterId::PublicExcess)? {
            return Ok(StageOutcome::Skipped);
        }

        let slot = match self.params.get::<u64>(ParameterId::NonceSlot)? {
            Some(slot) => slot,
            None => {
                let slot = self.keeper.allocate_nonce_slot()?;
                self.params.set(ParameterId::NonceSlot, &slot)?;
                slot
            }
        };
        let nonce = self.keeper.public_nonce(slot)?;
        self.params.set_notify(ParameterId::PublicNonce, &nonce)?;

        let excess = self.local_excess(role)?;
        self.params.set_notify(ParameterId::PublicExcess, &excess)?;
        Ok(StageOutcome::Done)
    }

    fn get_peer_inputs_and_outputs(&mut self, role: Role) -> Result<StageOutcome, BuilderError> {
        if !role.has_peer() {
            return Ok(StageOutcome::Skipped);
        }
        if self.params.contains(ParameterId::PeerPublicNonce)?
            && self.params.contains(ParameterId::PeerPublicExcess)?
        {
            Ok(StageOutcome::Skipped)
        } else {
            Ok(StageOutcome::AwaitingPeer)
        }
    }

    fn create_kernel(&mut self, role: Role) -> Result<StageOutcome, BuilderError> {
        if self.params.contains(ParameterId::Kernel)? {
            return Ok(StageOutcome::Skipped);
        }
        let min_height = self.min_height()?;
        let max_height = self.max_height()?;

        if let Some(emission) = self.emission(role)? {
            if !self.params.contains(ParameterId::EmissionKernel)? {
                let owner_key = self.owner_key(emission.asset_id)?;
                let commitment = Commitment::from_point(&(blinding_generator() * owner_key));
                let mut kernel =
                    TxKernel::new(0, min_height, max_height, commitment).with_emission(emission);
                kernel.sign(&owner_key);
                self.params.set(ParameterId::EmissionKernel, &kernel)?;
            }
        }

        let mut excess: RistrettoPoint = self.params.get_mandatory(ParameterId::PublicExcess)?;
        if role.has_peer() {
            excess += self.peer_point(ParameterId::PeerPublicExcess)?;
        }
        let fee: Amount = self.params.get_or(ParameterId::Fee, 0)?;
        let mut kernel = TxKernel::new(fee, min_height, max_height, Commitment::from_point(&excess));
        if let Some(image) = self.params.get::<[u8; 32]>(ParameterId::PeerLockImage)? {
            kernel = kernel.with_hash_lock(image);
        }
        self.params.set(ParameterId::Kernel, &kernel)?;
        Ok(StageOutcome::Done)
    }

    fn sign_partial(&mut self, role: Role) -> Result<StageOutcome, BuilderError> {
        if self.params.contains(ParameterId::PartialSignature)? {
            return Ok(StageOutcome::Skipped);
        }
        let kernel: TxKernel = self.params.get_mandatory(ParameterId::Kernel)?;
        let request = PartialSignRequest {
            inputs: self.coin_ids(ParameterId::InputCoins, ParameterId::AssetInputCoins)?,
            outputs: self.coin_ids(ParameterId::OutputCoins, ParameterId::AssetOutputCoins)?,
            offset: self.signing_offset(role)?,
            nonce_slot: self.params.get_mandatory(ParameterId::NonceSlot)?,
            message: kernel.message(),
            combined_nonce: self.combined_nonce(role)?,
            combined_excess: kernel.excess()?,
        };
        let partial = self.keeper.sign_partial(&request)?;

        let nonce: RistrettoPoint = self.params.get_mandatory(ParameterId::PublicNonce)?;
        let excess: RistrettoPoint = self.params.get_mandatory(ParameterId::PublicExcess)?;
        if !schnorr::verify_partial(
            &partial,
            &nonce,
            &excess,
            &request.combined_nonce,
            &request.combined_excess,
            &request.message,
        ) {
            warn!(tx_id = %self.tx_id(), slot = request.nonce_slot, "own partial signature rejected");
            return Err(BuilderError::InvalidLocalSignature);
        }
        self.params.set_notify(ParameterId::PartialSignature, &partial)?;
        Ok(StageOutcome::Done)
    }

    fn create_transaction(&mut self, role: Role) -> Result<StageOutcome, BuilderError> {
        if self.params.contains(ParameterId::Transaction)? {
            return Ok(StageOutcome::Skipped);
        }
        let mut kernel: TxKernel = self.params.get_mandatory(ParameterId::Kernel)?;
        let message = kernel.message();
        let combined_nonce = self.combined_nonce(role)?;
        let combined_excess = kernel.excess()?;

        let mut partials = vec![self.params.get_mandatory::<Scalar>(ParameterId::PartialSignature)?];
        let mut offset: Scalar = self.params.get_mandatory(ParameterId::Offset)?;
        let mut inputs = self.concat::<Input>(ParameterId::Inputs, ParameterId::AssetInputs)?;
        let mut outputs = self.concat::<Output>(ParameterId::Outputs, ParameterId::AssetOutputs)?;

        if role.has_peer() {
            let Some(peer_partial) = self.params.get::<Scalar>(ParameterId::PeerSignature)? else {
                return Ok(StageOutcome::AwaitingPeer);
            };
            let peer_nonce = self.peer_point(ParameterId::PeerPublicNonce)?;
            let peer_excess = self.peer_point(ParameterId::PeerPublicExcess)?;
            if !schnorr::verify_partial(
                &peer_partial,
                &peer_nonce,
                &peer_excess,
                &combined_nonce,
                &combined_excess,
                &message,
            ) {
                warn!(tx_id = %self.tx_id(), "peer partial signature rejected");
                return Err(BuilderError::InvalidPeerSignature);
            }
            let peer_offset: Scalar = self
                .params
                .get(ParameterId::PeerOffset)?
                .ok_or(BuilderError::IncompletePeerData(ParameterId::PeerOffset))?;

            offset += peer_offset;
            inputs.extend(self.params.get_or::<Vec<Input>>(ParameterId::PeerInputs, Vec::new())?);
            outputs.extend(self.params.get_or::<Vec<Output>>(ParameterId::PeerOutputs, Vec::new())?);
            partials.push(peer_partial);
        }
        kernel.signature = Some(schnorr::combine(combined_nonce, &partials));

        let emission: Option<TxKernel> = self.params.get(ParameterId::EmissionKernel)?;
        let mut kernels: Vec<TxKernel> = emission.iter().cloned().collect();
        kernels.push(kernel.clone());

        let mut tx = Transaction { offset, kernels, inputs, outputs };
        tx.normalize();
        if tx.inputs.len() > self.config.max_inputs || tx.outputs.len() > self.config.max_outputs {
            return Err(BuilderError::TooLarge {
                inputs: tx.inputs.len(),
                outputs: tx.outputs.len(),
            });
        }

        self.params.set(ParameterId::KernelId, &kernel.id())?;
        if let Some(emission) = &emission {
            self.params.set(ParameterId::EmissionKernelId, &emission.id())?;
        }
        self.params.set_notify(ParameterId::Transaction, &tx)?;

        info!(
            tx_id = %self.tx_id(),
            kernel = %kernel.id_hex(),
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            fee = tx.fee(),
            "transaction assembled"
        );
        Ok(StageOutcome::Done)
    }

    // -- helpers ----------------------------------------------------------

    fn min_height(&self) -> Result<u64, BuilderError> {
        Ok(self
            .params
            .get_or(ParameterId::MinHeight, self.config.default_min_height)?)
    }

    fn max_height(&self) -> Result<u64, BuilderError> {
        Ok(self
            .params
            .get_or(ParameterId::MaxHeight, self.config.default_max_height)?)
    }

    /// Selected coins of `asset` covering `required`, and the change.
    fn select(&self, required: Amount, asset: AssetId) -> Result<(Vec<CoinId>, Amount), BuilderError> {
        if required == 0 {
            return Ok((Vec::new(), 0));
        }
        let coins = self.coins.select_coins(required, asset)?;
        let total = coins
            .iter()
            .try_fold(0u64, |acc, coin| acc.checked_add(coin.value()))
            .ok_or(BuilderError::AmountOverflow("selected coin total"))?;
        if total < required {
            let available = self.coins.available_balance(asset)?;
            return Err(BuilderError::InsufficientFunds { asset, required, available });
        }
        Ok((coins.into_iter().map(|coin| coin.id).collect(), total - required))
    }

    /// Mark selected coins as spent by this transaction. Safe to repeat.
    fn lock_coins(&self, ids: &[CoinId]) -> Result<(), BuilderError> {
        let tx_id = self.tx_id();
        for id in ids {
            match self.coins.find_coin(id)? {
                Some(mut coin) => {
                    if coin.status != CoinStatus::Outgoing || coin.spent_tx_id != Some(tx_id) {
                        coin.status = CoinStatus::Outgoing;
                        coin.spent_tx_id = Some(tx_id);
                        self.coins.store_coin(coin)?;
                    }
                }
                None => warn!(%tx_id, idx = id.idx, "selected coin is no longer in the store"),
            }
        }
        Ok(())
    }

    fn store_new_coins(&self, ids: &[CoinId], only_missing: bool) -> Result<(), BuilderError> {
        for id in ids {
            if only_missing && self.coins.find_coin(id)?.is_some() {
                continue;
            }
            self.coins
                .store_coin(Coin::new(*id, CoinStatus::Incoming, Some(self.tx_id())))?;
        }
        Ok(())
    }

    fn coin_ids(&self, base: ParameterId, asset: ParameterId) -> Result<Vec<CoinId>, BuilderError> {
        self.concat(base, asset)
    }

    fn concat<T: serde::de::DeserializeOwned>(
        &self,
        base: ParameterId,
        asset: ParameterId,
    ) -> Result<Vec<T>, BuilderError> {
        let mut items: Vec<T> = self.params.get_or(base, Vec::new())?;
        items.extend(self.params.get_or::<Vec<T>>(asset, Vec::new())?);
        Ok(items)
    }

    fn peer_point(&self, id: ParameterId) -> Result<RistrettoPoint, BuilderError> {
        self.params.get(id)?.ok_or(BuilderError::IncompletePeerData(id))
    }

    fn combined_nonce(&self, role: Role) -> Result<RistrettoPoint, BuilderError> {
        let mut nonce: RistrettoPoint = self.params.get_mandatory(ParameterId::PublicNonce)?;
        if role.has_peer() {
            nonce += self.peer_point(ParameterId::PeerPublicNonce)?;
        }
        Ok(nonce)
    }

    /// The emission this side signs for. Only the funding side emits.
    fn emission(&mut self, role: Role) -> Result<Option<Emission>, BuilderError> {
        if !role.selects_inputs() {
            return Ok(None);
        }
        match self.asset_layer()? {
            Some(layer) => layer.emission(),
            None => Ok(None),
        }
    }

    fn owner_key(&self, asset_id: AssetId) -> Result<Scalar, BuilderError> {
        let idx = self.params.get_or(ParameterId::AssetOwnerIdx, asset_id.0)?;
        Ok(self.keeper.derive_key(&KeyId {
            idx,
            key_type: KeyType::AssetOwner,
            asset_id,
        })?)
    }

    /// The offset the keeper signs with: the local offset, plus the owner
    /// key when this side emits.
    fn signing_offset(&mut self, role: Role) -> Result<Scalar, BuilderError> {
        let offset: Scalar = self.params.get_mandatory(ParameterId::Offset)?;
        match self.emission(role)? {
            Some(emission) => Ok(offset + self.owner_key(emission.asset_id)?),
            None => Ok(offset),
        }
    }

    fn local_excess(&mut self, role: Role) -> Result<RistrettoPoint, BuilderError> {
        let inputs = self.concat::<Input>(ParameterId::Inputs, ParameterId::AssetInputs)?;
        let outputs = self.concat::<Output>(ParameterId::Outputs, ParameterId::AssetOutputs)?;
        let spent = self.coin_ids(ParameterId::InputCoins, ParameterId::AssetInputCoins)?;
        let created = self.coin_ids(ParameterId::OutputCoins, ParameterId::AssetOutputCoins)?;

        let mut excess = sum_commitments(inputs.iter().map(|i| &i.commitment))?
            - sum_commitments(outputs.iter().map(|o| &o.commitment))?;
        for coin in &spent {
            excess -= asset_generator(coin.asset_id) * Scalar::from(coin.value);
        }
        for coin in &created {
            excess += asset_generator(coin.asset_id) * Scalar::from(coin.value);
        }
        excess -= blinding_generator() * self.signing_offset(role)?;
        Ok(excess)
    }
}

fn new_coin(key_type: KeyType, asset_id: AssetId, value: Amount) -> CoinId {
    CoinId {
        idx: rand::random(),
        key_type,
        asset_id,
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keykeeper::LocalKeyKeeper;
    use crate::storage::MemoryParameterStore;
    use crate::transaction::pipeline::Pipeline;
    use crate::transaction::request::TxRequest;
    use crate::transaction::types::SubTxId;
    use crate::transaction::verification::verify_transaction;
    use crate::vault::MemoryCoinStore;

    fn setup(request: TxRequest, coins: &[(u64, Amount)]) -> (TxBuilder, Arc<MemoryCoinStore>) {
        let store = Arc::new(MemoryCoinStore::new());
        for (i, (asset, value)) in coins.iter().enumerate() {
            store.add_available(CoinId {
                idx: i as u64 + 1,
                key_type: KeyType::Regular,
                asset_id: AssetId(*asset),
                value: *value,
            });
        }
        let params =
            TxParameters::new(Arc::new(MemoryParameterStore::new()), TxId::new(), SubTxId::default());
        request.write(&params).unwrap();
        let builder = TxBuilder::new(
            params,
            store.clone(),
            Arc::new(LocalKeyKeeper::generate()),
            BuilderConfig::default(),
        );
        (builder, store)
    }

    /// Walk the self-transaction pipeline, resolving async requests inline.
    async fn run_self(builder: &mut TxBuilder) -> Result<Transaction, BuilderError> {
        let pipeline = Pipeline::for_role(Role::SelfTx);
        let mut idx = 0;
        while idx < pipeline.stages().len() {
            match builder.run_stage(pipeline.stages()[idx], Role::SelfTx)? {
                StageOutcome::Pending(AsyncRequest::GenerateOutputs { min_height, coins, asset, target }) => {
                    let outputs = builder.keeper().generate_outputs(min_height, &coins, asset).await?;
                    builder.params().set(target, &outputs)?;
                }
                StageOutcome::AwaitingPeer => panic!("self transaction waited for a peer"),
                StageOutcome::Done | StageOutcome::Skipped => idx += 1,
            }
        }
        Ok(builder.params().get_mandatory(ParameterId::Transaction)?)
    }

    #[tokio::test]
    async fn self_payment_balances() {
        let (mut builder, store) =
            setup(TxRequest::new(Role::SelfTx).amounts(vec![100]).fee(10), &[(0, 500)]);
        let tx = run_self(&mut builder).await.unwrap();

        verify_transaction(&tx).unwrap();
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.fee(), 10);
        assert_eq!(builder.params().get::<Amount>(ParameterId::Change).unwrap(), Some(390));

        // One locked input plus two incoming coins.
        assert_eq!(store.coins_by_tx(&builder.tx_id()).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn share_that_misses_the_published_nonce_is_rejected() {
        let (mut builder, _) =
            setup(TxRequest::new(Role::SelfTx).amounts(vec![100]).fee(10), &[(0, 500)]);
        for &stage in Pipeline::for_role(Role::SelfTx).stages() {
            if stage == Stage::SignPartial {
                break;
            }
            while let StageOutcome::Pending(AsyncRequest::GenerateOutputs { min_height, coins, asset, target }) =
                builder.run_stage(stage, Role::SelfTx).unwrap()
            {
                let outputs = builder.keeper().generate_outputs(min_height, &coins, asset).await.unwrap();
                builder.params().set(target, &outputs).unwrap();
            }
        }

        // The keeper's nonce for the slot no longer matches what was published.
        let published: RistrettoPoint = builder.params().get_mandatory(ParameterId::PublicNonce).unwrap();
        builder
            .params()
            .set(ParameterId::PublicNonce, &(published + blinding_generator()))
            .unwrap();

        assert_eq!(
            builder.run_stage(Stage::SignPartial, Role::SelfTx),
            Err(BuilderError::InvalidLocalSignature)
        );
        assert!(!builder.params().contains(ParameterId::PartialSignature).unwrap());
    }

    #[tokio::test]
    async fn burn_carries_negative_emission() {
        let request = TxRequest::new(Role::SelfTx).fee(5).burn(AssetId(3), vec![30]);
        let (mut builder, _) = setup(request, &[(0, 100), (3, 50)]);
        let tx = run_self(&mut builder).await.unwrap();

        verify_transaction(&tx).unwrap();
        let emission = tx.emission_kernels().next().and_then(|k| k.emission).unwrap();
        assert_eq!(emission, Emission { asset_id: AssetId(3), amount: -30 });
        assert_eq!(builder.params().get::<Amount>(ParameterId::AssetChange).unwrap(), Some(20));
    }

    #[test]
    fn stages_skip_once_their_result_exists() {
        let (mut builder, _) = setup(TxRequest::new(Role::SelfTx).fee(10), &[(0, 50)]);
        assert_eq!(builder.run_stage(Stage::SelectInputs, Role::SelfTx), Ok(StageOutcome::Done));
        assert_eq!(builder.run_stage(Stage::SelectInputs, Role::SelfTx), Ok(StageOutcome::Skipped));

        assert_eq!(builder.run_stage(Stage::GenerateOffset, Role::SelfTx), Ok(StageOutcome::Done));
        let offset: Scalar = builder.params().get_mandatory(ParameterId::Offset).unwrap();
        assert_eq!(builder.run_stage(Stage::GenerateOffset, Role::SelfTx), Ok(StageOutcome::Skipped));
        assert_eq!(builder.params().get::<Scalar>(ParameterId::Offset).unwrap(), Some(offset));
    }

    #[test]
    fn insufficient_funds_reports_available_balance() {
        let (mut builder, store) = setup(TxRequest::new(Role::SelfTx).amounts(vec![80]).fee(30), &[(0, 100)]);
        assert_eq!(
            builder.run_stage(Stage::SelectInputs, Role::SelfTx),
            Err(BuilderError::InsufficientFunds { asset: AssetId::BASE, required: 110, available: 100 })
        );
        assert_eq!(store.available_balance(AssetId::BASE).unwrap(), 100);
        assert!(!builder.params().contains(ParameterId::InputCoins).unwrap());
    }

    #[test]
    fn asset_shortfall_locks_nothing() {
        let request = TxRequest::new(Role::SelfTx).fee(1).burn(AssetId(4), vec![10]);
        let (mut builder, store) = setup(request, &[(0, 100), (4, 5)]);
        assert!(matches!(
            builder.run_stage(Stage::SelectInputs, Role::SelfTx),
            Err(BuilderError::InsufficientFunds { required: 10, available: 5, .. })
        ));
        assert_eq!(store.available_balance(AssetId::BASE).unwrap(), 100);
    }

    #[test]
    fn receiver_waits_for_peer_before_kernel() {
        let (mut builder, _) = setup(TxRequest::new(Role::Receiver).amounts(vec![10]), &[]);
        assert_eq!(
            builder.run_stage(Stage::GetPeerInputsAndOutputs, Role::Receiver),
            Ok(StageOutcome::AwaitingPeer)
        );
    }
}
