//! # Wallet
//!
//! The wallet-facing entry point. A [`Wallet`] owns the stores and the key
//! keeper, creates one [`TransactionTask`] per negotiation, and keeps them
//! in a concurrent map so RPC-style callers can look tasks up by id.
//!
//! ## Restart
//!
//! Tasks live in memory; their state lives in the parameter store. After a
//! restart, [`Wallet::resume`] walks every stored transaction that is not
//! terminal, recreates its task, and nudges it with `update()`. The key
//! keeper must be rebuilt from the same master secret, or the resumed
//! commitments and signatures will not match.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::info;

use super::coin::Coin;
use super::store::{calc_change, CoinStore, CoinStoreError};
use crate::config::{BuilderConfig, EVENT_CHANNEL_CAPACITY};
use crate::keykeeper::KeyKeeper;
use crate::storage::{ParamError, ParameterId, ParameterStore, TxParameters};
use crate::transaction::{
    Amount, AssetId, PeerPacket, SubTxId, TransactionTask, TxBuilder, TxEvent, TxId, TxRequest,
    TxStatus,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from wallet-level operations.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Params(#[from] ParamError),

    #[error(transparent)]
    Coins(#[from] CoinStoreError),

    /// The transaction id is not known to this wallet.
    #[error("unknown transaction {0}")]
    UnknownTx(TxId),

    /// The transaction id is already in use.
    #[error("transaction {0} already exists")]
    DuplicateTx(TxId),

    /// Only finished transactions can be deleted.
    #[error("transaction {0} is still {1}")]
    NotTerminal(TxId, TxStatus),
}

pub type WalletResult<T> = Result<T, WalletError>;

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// Coordinates every transaction of one wallet.
pub struct Wallet {
    params: Arc<dyn ParameterStore>,
    coins: Arc<dyn CoinStore>,
    keeper: Arc<dyn KeyKeeper>,
    config: BuilderConfig,
    runtime: Handle,
    events: broadcast::Sender<TxEvent>,
    tasks: DashMap<TxId, Arc<TransactionTask>>,
}

impl Wallet {
    /// Must be called inside a tokio runtime; tasks spawn keeper work on it.
    pub fn new(
        params: Arc<dyn ParameterStore>,
        coins: Arc<dyn CoinStore>,
        keeper: Arc<dyn KeyKeeper>,
        config: BuilderConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            params,
            coins,
            keeper,
            config,
            runtime: Handle::current(),
            events,
            tasks: DashMap::new(),
        }
    }

    /// Events of every task this wallet runs.
    pub fn subscribe(&self) -> broadcast::Receiver<TxEvent> {
        self.events.subscribe()
    }

    pub fn coin_store(&self) -> &Arc<dyn CoinStore> {
        &self.coins
    }

    /// Start a new transaction under a fresh id.
    pub fn create(&self, request: &TxRequest) -> WalletResult<Arc<TransactionTask>> {
        self.create_with_id(TxId::new(), request)
    }

    /// Start a transaction under an id agreed with the peer.
    pub fn create_with_id(&self, tx_id: TxId, request: &TxRequest) -> WalletResult<Arc<TransactionTask>> {
        if self.tasks.contains_key(&tx_id) {
            return Err(WalletError::DuplicateTx(tx_id));
        }
        let params = self.scope(tx_id);
        if params.contains(ParameterId::Status)? {
            return Err(WalletError::DuplicateTx(tx_id));
        }
        request.write(&params)?;

        let task = self.spawn_task(params);
        info!(%tx_id, role = ?request.role(), "transaction created");
        task.update();
        Ok(task)
    }

    /// Recreate tasks for stored transactions that have not finished.
    /// Returns how many were resumed.
    pub fn resume(&self) -> WalletResult<usize> {
        let mut resumed = 0;
        for tx_id in self.params.tx_ids()? {
            if self.tasks.contains_key(&tx_id) {
                continue;
            }
            let params = self.scope(tx_id);
            let status: TxStatus = params.get_or(ParameterId::Status, TxStatus::Pending)?;
            if status.is_terminal() {
                continue;
            }
            let task = self.spawn_task(params);
            task.update();
            resumed += 1;
        }
        if resumed > 0 {
            info!(count = resumed, "resumed transactions");
        }
        Ok(resumed)
    }

    pub fn task(&self, tx_id: &TxId) -> WalletResult<Arc<TransactionTask>> {
        self.tasks
            .get(tx_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(WalletError::UnknownTx(*tx_id))
    }

    pub fn cancel(&self, tx_id: &TxId) -> WalletResult<()> {
        self.task(tx_id)?.cancel();
        Ok(())
    }

    /// Drop a finished transaction's parameters and its task. Coins it
    /// created or spent stay in the coin store.
    pub fn delete_tx(&self, tx_id: &TxId) -> WalletResult<usize> {
        if let Some(entry) = self.tasks.get(tx_id) {
            let status = entry.status();
            if !status.is_terminal() {
                return Err(WalletError::NotTerminal(*tx_id, status));
            }
        }
        self.tasks.remove(tx_id);
        Ok(self.params.delete_tx(tx_id)?)
    }

    /// Public values to send to the peer.
    pub fn export_packet(&self, tx_id: &TxId) -> WalletResult<PeerPacket> {
        Ok(PeerPacket::export(&self.task(tx_id)?.params())?)
    }

    /// Take in the peer's values and advance.
    pub fn import_packet(&self, packet: &PeerPacket) -> WalletResult<()> {
        let task = self.task(&packet.tx_id)?;
        packet.import(&task.params())?;
        task.update();
        Ok(())
    }

    pub fn coins_by_tx(&self, tx_id: &TxId) -> WalletResult<Vec<Coin>> {
        Ok(self.coins.coins_by_tx(tx_id)?)
    }

    pub fn calc_change(&self, amount: Amount, asset: AssetId) -> WalletResult<Amount> {
        Ok(calc_change(self.coins.as_ref(), amount, asset)?)
    }

    pub fn available_balance(&self, asset: AssetId) -> WalletResult<Amount> {
        Ok(self.coins.available_balance(asset)?)
    }

    fn scope(&self, tx_id: TxId) -> TxParameters {
        TxParameters::new(Arc::clone(&self.params), tx_id, SubTxId::default())
    }

    fn spawn_task(&self, params: TxParameters) -> Arc<TransactionTask> {
        let tx_id = params.tx_id();
        let builder = TxBuilder::new(
            params,
            Arc::clone(&self.coins),
            Arc::clone(&self.keeper),
            self.config.clone(),
        );
        let task = TransactionTask::new(builder, self.runtime.clone(), self.events.clone());
        self.tasks.insert(tx_id, Arc::clone(&task));
        task
    }
}
