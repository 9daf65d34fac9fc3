//! The task driver: runs a builder's pipeline and owns its lifecycle.
//!
//! A [`TransactionTask`] is shared as `Arc<TransactionTask>`. Every piece of
//! async work it spawns holds a strong reference, so the task outlives its
//! own in-flight requests, and a cancellation flag tells late results to
//! throw themselves away.
//!
//! ## `update()`
//!
//! 1. Terminal status: nothing to do.
//! 2. Canceled: record `Canceled` and stop.
//! 3. Walk the pipeline. Skipped stages are silent; the first stage with
//!    work either finishes it, suspends on the key keeper, or waits for the
//!    peer, and `update()` returns.
//! 4. A fatal error records its failure reason and ends the transaction.
//!    A retryable one is reported and the transaction stays where it was.
//!
//! A panic inside a stage is caught and turned into `Failed(Unknown)`.
//!
//! ## Async work
//!
//! At most one keeper request is in flight per task. Its result is written
//! to the parameter store and the task re-enters `update()` exactly once.
//! Results that arrive after cancellation or failure are dropped. A keeper
//! that panics mid-request fails the task with `Unknown`; the in-flight
//! flag is cleared however the request ends.
//!
//! Reaching any terminal status releases the task's nonce slot.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::storage::{ParamResult, ParameterId, TxParameters};
use crate::transaction::body::Transaction;
use crate::transaction::builder::TxBuilder;
use crate::transaction::error::{BuilderError, TxFailureReason};
use crate::transaction::events::TxEvent;
use crate::transaction::pipeline::{AsyncRequest, Pipeline, Stage, StageOutcome};
use crate::transaction::types::{TxId, TxStatus};

/// A running (or finished) transaction negotiation.
pub struct TransactionTask {
    tx_id: TxId,
    builder: Mutex<TxBuilder>,
    canceled: AtomicBool,
    in_flight: watch::Sender<bool>,
    status: watch::Sender<TxStatus>,
    events: broadcast::Sender<TxEvent>,
    runtime: Handle,
}

impl TransactionTask {
    /// Wrap a builder. The status starts from whatever was persisted, so a
    /// task recreated after a restart picks up where it stopped.
    pub fn new(builder: TxBuilder, runtime: Handle, events: broadcast::Sender<TxEvent>) -> Arc<Self> {
        let tx_id = builder.tx_id();
        let persisted = builder.params().get::<TxStatus>(ParameterId::Status);
        let status = match persisted {
            Ok(status) => status.unwrap_or(TxStatus::Pending),
            Err(err) => {
                warn!(%tx_id, error = %err, "unreadable status, starting as pending");
                TxStatus::Pending
            }
        };
        let (status, _) = watch::channel(status);
        let (in_flight, _) = watch::channel(false);
        Arc::new(Self {
            tx_id,
            builder: Mutex::new(builder),
            canceled: AtomicBool::new(false),
            in_flight,
            status,
            events,
            runtime,
        })
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    pub fn status(&self) -> TxStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TxStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TxEvent> {
        self.events.subscribe()
    }

    pub fn is_in_flight(&self) -> bool {
        *self.in_flight.borrow()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// A handle on this task's parameter scope.
    pub fn params(&self) -> TxParameters {
        self.builder.lock().params().clone()
    }

    pub fn failure_reason(&self) -> ParamResult<Option<TxFailureReason>> {
        self.params().get(ParameterId::FailureReason)
    }

    /// The assembled transaction, once the sender side completes.
    pub fn transaction(&self) -> ParamResult<Option<Transaction>> {
        self.params().get(ParameterId::Transaction)
    }

    /// Wait until the status is terminal.
    pub async fn wait(&self) -> TxStatus {
        let mut rx = self.status.subscribe();
        let result = rx.wait_for(|status| status.is_terminal()).await;
        match result {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    /// Wait until no keeper request is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Advance the pipeline as far as it can go right now.
    pub fn update(self: &Arc<Self>) {
        if self.status().is_terminal() {
            return;
        }
        if self.is_canceled() {
            self.finish_canceled();
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| self.drive())).is_err() {
            error!(tx_id = %self.tx_id, "builder panicked");
            self.finish_failed(TxFailureReason::Unknown);
        }
    }

    /// Request cancellation. In-flight keeper results are discarded when
    /// they land.
    pub fn cancel(self: &Arc<Self>) {
        if self.status().is_terminal() {
            return;
        }
        self.canceled.store(true, Ordering::SeqCst);
        info!(tx_id = %self.tx_id, "cancel requested");
        self.update();
    }

    fn drive(self: &Arc<Self>) {
        let mut builder = self.builder.lock();
        let role = match builder.role() {
            Ok(role) => role,
            Err(err) => {
                drop(builder);
                error!(tx_id = %self.tx_id, error = %err, "cannot determine role");
                self.finish_failed(err.failure_reason());
                return;
            }
        };
        if self.status() == TxStatus::Pending {
            self.set_status(builder.params(), TxStatus::InProgress);
        }

        for &stage in Pipeline::for_role(role).stages() {
            if self.is_canceled() {
                drop(builder);
                self.finish_canceled();
                return;
            }
            match builder.run_stage(stage, role) {
                Ok(StageOutcome::Skipped) => {}
                Ok(StageOutcome::Done) => {
                    debug!(tx_id = %self.tx_id, %stage, "stage completed");
                    self.emit(TxEvent::StageCompleted { tx_id: self.tx_id, stage });
                }
                Ok(StageOutcome::Pending(request)) => {
                    drop(builder);
                    self.issue(stage, request);
                    return;
                }
                Ok(StageOutcome::AwaitingPeer) => {
                    debug!(tx_id = %self.tx_id, %stage, "waiting for peer");
                    self.emit(TxEvent::AwaitingPeer { tx_id: self.tx_id, stage });
                    return;
                }
                Err(err) => {
                    drop(builder);
                    self.stage_failed(stage, err);
                    return;
                }
            }
        }

        drop(builder);
        self.finish_completed();
    }

    fn stage_failed(&self, stage: Stage, err: BuilderError) {
        let fatal = err.is_fatal();
        self.emit(TxEvent::StageFailed {
            tx_id: self.tx_id,
            stage,
            error: err.to_string(),
            fatal,
        });
        if fatal {
            error!(tx_id = %self.tx_id, %stage, error = %err, "stage failed");
            self.finish_failed(err.failure_reason());
        } else {
            warn!(tx_id = %self.tx_id, %stage, error = %err, "stage failed, will retry");
        }
    }

    /// Spawn a keeper request unless one is already in flight.
    fn issue(self: &Arc<Self>, stage: Stage, request: AsyncRequest) {
        if self.in_flight.send_replace(true) {
            debug!(tx_id = %self.tx_id, %stage, "request already in flight");
            return;
        }
        self.emit(TxEvent::AsyncStarted { tx_id: self.tx_id, stage });
        let task = Arc::clone(self);
        self.runtime.spawn(async move {
            task.complete_request(stage, request).await;
        });
    }

    async fn complete_request(self: Arc<Self>, stage: Stage, request: AsyncRequest) {
        let busy = InFlight(&self.in_flight);
        let keeper = self.builder.lock().keeper();
        let AsyncRequest::GenerateOutputs { min_height, coins, asset, target } = request;
        let result = AssertUnwindSafe(keeper.generate_outputs(min_height, &coins, asset))
            .catch_unwind()
            .await;

        if self.status().is_terminal() || self.is_canceled() {
            info!(tx_id = %self.tx_id, %stage, "discarding late keeper result");
            drop(busy);
            self.emit(TxEvent::AsyncFinished { tx_id: self.tx_id, stage, success: false });
            self.update();
            return;
        }

        let Ok(result) = result else {
            drop(busy);
            error!(tx_id = %self.tx_id, %stage, "key keeper panicked");
            self.emit(TxEvent::AsyncFinished { tx_id: self.tx_id, stage, success: false });
            self.finish_failed(TxFailureReason::Unknown);
            return;
        };

        let stored = match result {
            Ok(outputs) => self
                .params()
                .set(target, &outputs)
                .map_err(BuilderError::from),
            Err(err) => Err(BuilderError::from(err)),
        };
        drop(busy);

        match stored {
            Ok(()) => {
                self.emit(TxEvent::AsyncFinished { tx_id: self.tx_id, stage, success: true });
                self.update();
            }
            Err(err) => {
                self.emit(TxEvent::AsyncFinished { tx_id: self.tx_id, stage, success: false });
                let err = match err {
                    BuilderError::KeyKeeper(inner) if inner.is_retryable() => {
                        BuilderError::AsyncFailure(inner.to_string())
                    }
                    other => other,
                };
                self.stage_failed(stage, err);
            }
        }
    }

    fn finish_completed(&self) {
        let params = self.params();
        self.set_status(&params, TxStatus::Completed);
        self.release_nonce_slot(&params);
        info!(tx_id = %self.tx_id, "transaction completed");
        self.emit(TxEvent::Completed { tx_id: self.tx_id });
    }

    fn finish_failed(&self, reason: TxFailureReason) {
        let params = self.params();
        if let Err(err) = params.set(ParameterId::FailureReason, &reason) {
            error!(tx_id = %self.tx_id, error = %err, "could not persist failure reason");
        }
        self.set_status(&params, TxStatus::Failed);
        self.release_nonce_slot(&params);
        self.emit(TxEvent::Failed { tx_id: self.tx_id, reason });
    }

    fn finish_canceled(&self) {
        if self.status().is_terminal() {
            return;
        }
        let params = self.params();
        if let Err(err) = params.set(ParameterId::FailureReason, &TxFailureReason::Canceled) {
            error!(tx_id = %self.tx_id, error = %err, "could not persist failure reason");
        }
        self.set_status(&params, TxStatus::Canceled);
        self.release_nonce_slot(&params);
        info!(tx_id = %self.tx_id, "transaction canceled");
        self.emit(TxEvent::Canceled { tx_id: self.tx_id });
    }

    fn release_nonce_slot(&self, params: &TxParameters) {
        match params.get::<u64>(ParameterId::NonceSlot) {
            Ok(Some(slot)) => self.builder.lock().keeper().release_nonce_slot(slot),
            Ok(None) => {}
            Err(err) => warn!(tx_id = %self.tx_id, error = %err, "could not read nonce slot"),
        }
    }

    fn set_status(&self, params: &TxParameters, status: TxStatus) {
        if let Err(err) = params.set_notify(ParameterId::Status, &status) {
            error!(tx_id = %self.tx_id, error = %err, "could not persist status");
        }
        self.status.send_replace(status);
    }

    fn emit(&self, event: TxEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Clears the in-flight flag when dropped, including on unwind.
struct InFlight<'a>(&'a watch::Sender<bool>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuilderConfig, EVENT_CHANNEL_CAPACITY};
    use crate::crypto::commitment::Commitment;
    use crate::keykeeper::{KeyKeeper, KeyKeeperError, LocalKeyKeeper, PartialSignRequest};
    use crate::storage::MemoryParameterStore;
    use crate::transaction::body::Output;
    use crate::transaction::request::TxRequest;
    use crate::transaction::types::{AssetId, CoinId, KeyId, KeyType, Role, SubTxId};
    use async_trait::async_trait;
    use curve25519_dalek::ristretto::RistrettoPoint;
    use curve25519_dalek::scalar::Scalar;
    use crate::vault::{CoinStore, MemoryCoinStore};
    use std::time::Duration;

    /// Signs like a local keeper but never produces outputs.
    struct BrokenOutputs {
        inner: LocalKeyKeeper,
        panics: bool,
    }

    #[async_trait]
    impl KeyKeeper for BrokenOutputs {
        fn derive_key(&self, id: &KeyId) -> Result<Scalar, KeyKeeperError> {
            self.inner.derive_key(id)
        }

        fn generate_public_keys(
            &self,
            coins: &[CoinId],
            is_input: bool,
            asset: AssetId,
        ) -> Result<Vec<Commitment>, KeyKeeperError> {
            self.inner.generate_public_keys(coins, is_input, asset)
        }

        async fn generate_outputs(
            &self,
            _min_height: u64,
            _coins: &[CoinId],
            asset: AssetId,
        ) -> Result<Vec<Output>, KeyKeeperError> {
            if self.panics {
                panic!("signer crashed");
            }
            Err(KeyKeeperError::AssetMismatch { expected: asset, found: AssetId(99), is_input: false })
        }

        fn allocate_nonce_slot(&self) -> Result<u64, KeyKeeperError> {
            self.inner.allocate_nonce_slot()
        }

        fn public_nonce(&self, slot: u64) -> Result<RistrettoPoint, KeyKeeperError> {
            self.inner.public_nonce(slot)
        }

        fn sign_partial(&self, request: &PartialSignRequest) -> Result<Scalar, KeyKeeperError> {
            self.inner.sign_partial(request)
        }

        fn release_nonce_slot(&self, slot: u64) {
            self.inner.release_nonce_slot(slot)
        }
    }

    fn task(request: TxRequest, keeper: Arc<dyn KeyKeeper>) -> (Arc<TransactionTask>, Arc<MemoryCoinStore>) {
        let coins = Arc::new(MemoryCoinStore::new());
        coins.add_available(CoinId { idx: 1, key_type: KeyType::Regular, asset_id: AssetId::BASE, value: 500 });
        let params =
            TxParameters::new(Arc::new(MemoryParameterStore::new()), TxId::new(), SubTxId::default());
        request.write(&params).unwrap();
        let builder = TxBuilder::new(params, coins.clone(), keeper, BuilderConfig::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (TransactionTask::new(builder, Handle::current(), events), coins)
    }

    #[tokio::test]
    async fn self_transaction_runs_to_completion() {
        let (task, _) = task(
            TxRequest::new(Role::SelfTx).amounts(vec![100]).fee(10),
            Arc::new(LocalKeyKeeper::generate()),
        );
        let mut events = task.subscribe_events();
        task.update();
        assert_eq!(task.wait().await, TxStatus::Completed);
        assert!(task.transaction().unwrap().is_some());

        let mut saw_async = false;
        while let Ok(event) = events.try_recv() {
            saw_async |= matches!(event, TxEvent::AsyncStarted { stage: Stage::CreateOutputs, .. });
        }
        assert!(saw_async);
    }

    #[tokio::test]
    async fn cancel_discards_in_flight_outputs() {
        let keeper = Arc::new(LocalKeyKeeper::generate().with_latency(Duration::from_millis(50)));
        let (task, coins) = task(TxRequest::new(Role::SelfTx).amounts(vec![100]).fee(10), keeper);
        task.update();
        assert!(task.is_in_flight());

        task.cancel();
        assert_eq!(task.status(), TxStatus::Canceled);
        task.wait_idle().await;

        let params = task.params();
        assert!(!params.contains(ParameterId::Outputs).unwrap());
        assert_eq!(task.failure_reason().unwrap(), Some(TxFailureReason::Canceled));
        // Coins stay as they were; releasing them is the wallet's call.
        assert_eq!(coins.coins_by_tx(&task.tx_id()).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn repeated_updates_issue_one_request() {
        let keeper = Arc::new(LocalKeyKeeper::generate().with_latency(Duration::from_millis(20)));
        let (task, _) = task(TxRequest::new(Role::SelfTx).amounts(vec![100]).fee(10), keeper);
        let mut events = task.subscribe_events();
        task.update();
        task.update();
        task.update();
        assert_eq!(task.wait().await, TxStatus::Completed);

        let mut started = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TxEvent::AsyncStarted { .. }) {
                started += 1;
            }
        }
        // Base outputs only; there is no asset batch.
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn terminal_task_ignores_update() {
        let (task, _) = task(
            TxRequest::new(Role::SelfTx).amounts(vec![1_000]),
            Arc::new(LocalKeyKeeper::generate()),
        );
        task.update();
        assert_eq!(task.status(), TxStatus::Failed);
        assert_eq!(task.failure_reason().unwrap(), Some(TxFailureReason::InsufficientFunds));
        task.update();
        assert_eq!(task.status(), TxStatus::Failed);
    }

    #[tokio::test]
    async fn panicking_keeper_fails_the_task_and_clears_in_flight() {
        let keeper = Arc::new(BrokenOutputs { inner: LocalKeyKeeper::generate(), panics: true });
        let (task, _) = task(TxRequest::new(Role::SelfTx).amounts(vec![100]).fee(10), keeper);
        task.update();
        assert_eq!(task.wait().await, TxStatus::Failed);
        tokio::time::timeout(Duration::from_secs(1), task.wait_idle())
            .await
            .expect("in-flight flag cleared");
        assert!(!task.is_in_flight());
        assert_eq!(task.failure_reason().unwrap(), Some(TxFailureReason::Unknown));

        task.update();
        assert_eq!(task.status(), TxStatus::Failed);
    }

    #[tokio::test]
    async fn non_retryable_keeper_error_is_fatal() {
        let keeper = Arc::new(BrokenOutputs { inner: LocalKeyKeeper::generate(), panics: false });
        let (task, _) = task(TxRequest::new(Role::SelfTx).amounts(vec![100]).fee(10), keeper);
        let mut events = task.subscribe_events();
        task.update();
        assert_eq!(task.wait().await, TxStatus::Failed);
        assert!(!task.is_in_flight());
        assert_eq!(task.failure_reason().unwrap(), Some(TxFailureReason::KeyKeeperError));

        let mut fatal = false;
        while let Ok(event) = events.try_recv() {
            fatal |= matches!(event, TxEvent::StageFailed { stage: Stage::CreateOutputs, fatal: true, .. });
        }
        assert!(fatal);
    }

    #[tokio::test]
    async fn finished_task_releases_its_nonce_slot() {
        let keeper = Arc::new(LocalKeyKeeper::generate());
        let (task, _) = task(TxRequest::new(Role::SelfTx).amounts(vec![100]).fee(10), keeper.clone());
        task.update();
        assert_eq!(task.wait().await, TxStatus::Completed);
        assert!(task.params().contains(ParameterId::NonceSlot).unwrap());
        assert_eq!(keeper.live_slots(), 0);
    }
}
