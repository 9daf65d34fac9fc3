//! Integration tests for asset issue and burn, failure handling, and
//! resumption from a persisted parameter store at several crash points.
//!
//! Every test builds its own stores and key keeper. The key keeper is
//! in-process, optionally wrapped to count or fail `generate_outputs`
//! calls, so the async paths run for real on the tokio test runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use nova_mw::config::{BuilderConfig, EVENT_CHANNEL_CAPACITY};
use nova_mw::crypto::commitment::Commitment;
use nova_mw::keykeeper::{KeyKeeper, KeyKeeperError, LocalKeyKeeper, PartialSignRequest};
use nova_mw::storage::{MemoryParameterStore, ParameterId, ParameterStore, SledParameterStore, TxParameters};
use nova_mw::transaction::{
    verify_transaction, Amount, AssetId, AsyncRequest, CoinId, Emission, KeyId, KeyType, Output, Pipeline, Role,
    Stage, StageOutcome, SubTxId, TransactionTask, TxBuilder, TxEvent, TxFailureReason, TxId,
    TxRequest, TxStatus,
};
use nova_mw::vault::{CoinStatus, CoinStore, MemoryCoinStore};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// Forwards to a local keeper, counting output requests and failing the
/// first `failures` of them as unavailable.
struct ScriptedKeeper {
    inner: LocalKeyKeeper,
    output_calls: AtomicUsize,
    failures: usize,
}

impl ScriptedKeeper {
    fn new(failures: usize) -> Self {
        Self {
            inner: LocalKeyKeeper::generate(),
            output_calls: AtomicUsize::new(0),
            failures,
        }
    }

    fn output_calls(&self) -> usize {
        self.output_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyKeeper for ScriptedKeeper {
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
        min_height: u64,
        coins: &[CoinId],
        asset: AssetId,
    ) -> Result<Vec<Output>, KeyKeeperError> {
        let call = self.output_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(KeyKeeperError::Unavailable("signer offline".into()));
        }
        self.inner.generate_outputs(min_height, coins, asset).await
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

fn coin(idx: u64, asset: u64, value: Amount) -> CoinId {
    CoinId { idx, key_type: KeyType::Regular, asset_id: AssetId(asset), value }
}

fn funded(coins: &[CoinId]) -> Arc<MemoryCoinStore> {
    let store = Arc::new(MemoryCoinStore::new());
    for id in coins {
        store.add_available(*id);
    }
    store
}

fn start(
    request: &TxRequest,
    params: Arc<dyn ParameterStore>,
    coins: Arc<MemoryCoinStore>,
    keeper: Arc<dyn KeyKeeper>,
) -> Arc<TransactionTask> {
    let scope = TxParameters::new(params, TxId::new(), SubTxId::default());
    request.write(&scope).expect("write request");
    let builder = TxBuilder::new(scope, coins, keeper, BuilderConfig::default());
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    TransactionTask::new(builder, Handle::current(), events)
}

/// Run the self-transaction pipeline in-line, answering keeper requests
/// directly, until `last` has run.
async fn run_through(builder: &mut TxBuilder, keeper: &LocalKeyKeeper, last: Stage) {
    for &stage in Pipeline::for_role(Role::SelfTx).stages() {
        loop {
            match builder.run_stage(stage, Role::SelfTx).unwrap() {
                StageOutcome::Pending(AsyncRequest::GenerateOutputs { min_height, coins, asset, target }) => {
                    let outputs = keeper.generate_outputs(min_height, &coins, asset).await.unwrap();
                    builder.params().set(target, &outputs).unwrap();
                }
                _ => break,
            }
        }
        if stage == last {
            return;
        }
    }
}

/// Crash a self transaction right after `last`, restart on the same sled
/// directory with a keeper rebuilt from the same seed, and finish it. The
/// new keeper hands out a slot to some other transaction before the resume.
async fn crash_and_resume(last: Stage) {
    let dir = tempfile::tempdir().expect("tempdir");
    let coins = funded(&[coin(1, 0, 400)]);
    let seed = [11u8; 32];
    let tx_id = TxId::new();
    let request = TxRequest::new(Role::SelfTx).amounts(vec![150]).fee(10);

    let published = {
        let store: Arc<dyn ParameterStore> = Arc::new(SledParameterStore::open(dir.path()).unwrap());
        let scope = TxParameters::new(store, tx_id, SubTxId::default());
        request.write(&scope).unwrap();
        let keeper = Arc::new(LocalKeyKeeper::from_seed(seed));
        let mut builder =
            TxBuilder::new(scope.clone(), coins.clone(), keeper.clone(), BuilderConfig::default());
        run_through(&mut builder, &keeper, last).await;
        scope.get::<RistrettoPoint>(ParameterId::PublicNonce).unwrap().unwrap()
    };

    let keeper = Arc::new(LocalKeyKeeper::from_seed(seed));
    let other = keeper.allocate_nonce_slot().unwrap();

    let store: Arc<dyn ParameterStore> = Arc::new(SledParameterStore::open(dir.path()).unwrap());
    let scope = TxParameters::new(store, tx_id, SubTxId::default());
    let builder = TxBuilder::new(scope.clone(), coins.clone(), keeper.clone(), BuilderConfig::default());
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let task = TransactionTask::new(builder, Handle::current(), events);
    task.update();
    assert_eq!(task.wait().await, TxStatus::Completed);

    assert_eq!(scope.get::<RistrettoPoint>(ParameterId::PublicNonce).unwrap(), Some(published));
    verify_transaction(&task.transaction().unwrap().unwrap()).unwrap();

    // Only the other transaction's slot is still live.
    assert_eq!(keeper.live_slots(), 1);
    assert_ne!(keeper.public_nonce(other).unwrap(), published);
}

fn memory_task(request: &TxRequest, coins: Arc<MemoryCoinStore>) -> Arc<TransactionTask> {
    start(
        request,
        Arc::new(MemoryParameterStore::new()),
        coins,
        Arc::new(LocalKeyKeeper::generate()),
    )
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn issue_mints_asset_behind_an_emission_kernel() {
    let coins = funded(&[coin(1, 0, 500)]);
    let request = TxRequest::new(Role::SelfTx).fee(10).issue(AssetId(7), vec![100]);
    let task = memory_task(&request, coins.clone());

    task.update();
    assert_eq!(task.wait().await, TxStatus::Completed);

    let tx = task.transaction().unwrap().expect("assembled transaction");
    verify_transaction(&tx).expect("issued transaction must verify");

    assert_eq!(tx.kernels.len(), 2);
    assert_eq!(tx.kernels[0].emission, Some(Emission { asset_id: AssetId(7), amount: 100 }));
    assert_eq!(tx.kernels[0].fee, 0);
    assert_eq!(tx.kernels[1].fee, 10);
    assert_eq!(tx.inputs.len(), 1);
    assert_eq!(tx.outputs.iter().filter(|o| o.asset_id == Some(AssetId(7))).count(), 1);
    assert_eq!(tx.outputs.iter().filter(|o| o.asset_id.is_none()).count(), 1);

    let params = task.params();
    assert_eq!(params.get::<[u8; 32]>(ParameterId::KernelId).unwrap(), Some(tx.kernels[1].id()));
    assert_eq!(params.get::<[u8; 32]>(ParameterId::EmissionKernelId).unwrap(), Some(tx.kernels[0].id()));

    let touched = coins.coins_by_tx(&task.tx_id()).unwrap();
    let spent: Vec<_> = touched.iter().filter(|c| c.status == CoinStatus::Outgoing).collect();
    assert_eq!(spent.len(), 1);
    assert!(touched.iter().any(|c| c.status == CoinStatus::Incoming && c.id.value == 490 && c.id.key_type == KeyType::Change));
    assert!(touched.iter().any(|c| c.id.asset_id == AssetId(7) && c.id.value == 100));
}

#[tokio::test]
async fn issue_with_base_asset_id_fails_before_selection() {
    let coins = funded(&[coin(1, 0, 500)]);
    let request = TxRequest::new(Role::SelfTx).fee(10).issue(AssetId::BASE, vec![100]);
    let task = memory_task(&request, coins.clone());

    task.update();
    assert_eq!(task.status(), TxStatus::Failed);
    assert_eq!(task.failure_reason().unwrap(), Some(TxFailureReason::InvalidTransaction));
    assert!(coins.coins_by_tx(&task.tx_id()).unwrap().is_empty());
    assert_eq!(coins.available_balance(AssetId::BASE).unwrap(), 500);
}

#[tokio::test]
async fn unknown_asset_command_is_fatal() {
    let coins = funded(&[coin(1, 0, 500)]);
    let request = TxRequest::new(Role::SelfTx).fee(10).issue(AssetId(7), vec![100]);
    let task = memory_task(&request, coins.clone());
    task.params().set(ParameterId::AssetCommand, &9u8).unwrap();

    let mut events = task.subscribe_events();
    task.update();
    assert_eq!(task.status(), TxStatus::Failed);
    assert_eq!(task.failure_reason().unwrap(), Some(TxFailureReason::InvalidTransaction));

    let failure = events.try_recv().unwrap();
    assert!(matches!(
        failure,
        TxEvent::StageFailed { stage: Stage::SelectInputs, fatal: true, .. }
    ));
    assert!(coins.coins_by_tx(&task.tx_id()).unwrap().is_empty());
}

#[tokio::test]
async fn outputs_are_requested_once_per_batch() {
    let coins = funded(&[coin(1, 0, 500)]);
    let keeper = Arc::new(ScriptedKeeper::new(0));
    let request = TxRequest::new(Role::SelfTx).fee(10).issue(AssetId(7), vec![60, 40]);
    let task = start(&request, Arc::new(MemoryParameterStore::new()), coins.clone(), keeper.clone());

    task.update();
    task.update();
    assert_eq!(task.wait().await, TxStatus::Completed);
    // One base batch (change), one asset batch (two issued coins).
    assert_eq!(keeper.output_calls(), 2);

    let before = coins.len();
    task.update();
    assert_eq!(keeper.output_calls(), 2);
    assert_eq!(coins.len(), before);
}

// ---------------------------------------------------------------------------
// Burn
// ---------------------------------------------------------------------------

#[tokio::test]
async fn burn_destroys_units_and_keeps_change() {
    let coins = funded(&[coin(1, 0, 100), coin(2, 7, 60)]);
    let request = TxRequest::new(Role::SelfTx).fee(5).burn(AssetId(7), vec![25]);
    let task = memory_task(&request, coins.clone());

    task.update();
    assert_eq!(task.wait().await, TxStatus::Completed);

    let tx = task.transaction().unwrap().unwrap();
    verify_transaction(&tx).expect("burn must verify");
    assert_eq!(tx.kernels[0].emission, Some(Emission { asset_id: AssetId(7), amount: -25 }));
    assert_eq!(tx.inputs.len(), 2);

    let asset_change: Vec<_> = coins
        .coins_by_tx(&task.tx_id())
        .unwrap()
        .into_iter()
        .filter(|c| c.id.asset_id == AssetId(7) && c.status == CoinStatus::Incoming)
        .collect();
    assert_eq!(asset_change.len(), 1);
    assert_eq!(asset_change[0].id.value, 35);
    assert_eq!(asset_change[0].id.key_type, KeyType::Change);
}

#[tokio::test]
async fn burn_beyond_holdings_reports_insufficient_funds() {
    let coins = funded(&[coin(1, 0, 100), coin(2, 7, 10)]);
    let request = TxRequest::new(Role::SelfTx).fee(5).burn(AssetId(7), vec![25]);
    let task = memory_task(&request, coins.clone());

    task.update();
    assert_eq!(task.status(), TxStatus::Failed);
    assert_eq!(task.failure_reason().unwrap(), Some(TxFailureReason::InsufficientFunds));
    assert_eq!(coins.available_balance(AssetId::BASE).unwrap(), 100);
    assert_eq!(coins.available_balance(AssetId(7)).unwrap(), 10);
}

// ---------------------------------------------------------------------------
// Async failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unavailable_keeper_is_retried_on_next_update() {
    let coins = funded(&[coin(1, 0, 500)]);
    let keeper = Arc::new(ScriptedKeeper::new(1));
    let request = TxRequest::new(Role::SelfTx).amounts(vec![200]).fee(10);
    let task = start(&request, Arc::new(MemoryParameterStore::new()), coins, keeper.clone());
    let mut events = task.subscribe_events();

    task.update();
    task.wait_idle().await;
    assert_eq!(task.status(), TxStatus::InProgress);
    assert!(!task.params().contains(ParameterId::Outputs).unwrap());

    let mut saw_retryable = false;
    while let Ok(event) = events.try_recv() {
        saw_retryable |= matches!(event, TxEvent::StageFailed { stage: Stage::CreateOutputs, fatal: false, .. });
    }
    assert!(saw_retryable);

    task.update();
    assert_eq!(task.wait().await, TxStatus::Completed);
    assert_eq!(keeper.output_calls(), 2);
    verify_transaction(&task.transaction().unwrap().unwrap()).unwrap();
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn builder_resumes_from_sled_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coins = funded(&[coin(1, 0, 300), coin(2, 0, 300)]);
    let seed = [42u8; 32];
    let tx_id = TxId::new();
    let request = TxRequest::new(Role::SelfTx).amounts(vec![350]).fee(10);

    // First process: run up to the async boundary, then "crash".
    let selected = {
        let store: Arc<dyn ParameterStore> = Arc::new(SledParameterStore::open(dir.path()).unwrap());
        let scope = TxParameters::new(store, tx_id, SubTxId::default());
        request.write(&scope).unwrap();
        let mut builder = TxBuilder::new(
            scope.clone(),
            coins.clone(),
            Arc::new(LocalKeyKeeper::from_seed(seed)),
            BuilderConfig::default(),
        );
        for &stage in Pipeline::for_role(Role::SelfTx).stages() {
            match builder.run_stage(stage, Role::SelfTx).unwrap() {
                StageOutcome::Pending(_) => break,
                _ => continue,
            }
        }
        scope.get::<Vec<CoinId>>(ParameterId::InputCoins).unwrap().unwrap()
    };
    let coins_before = coins.len();

    // Second process: same directory, same seed.
    let store: Arc<dyn ParameterStore> = Arc::new(SledParameterStore::open(dir.path()).unwrap());
    let scope = TxParameters::new(store, tx_id, SubTxId::default());
    let builder = TxBuilder::new(
        scope.clone(),
        coins.clone(),
        Arc::new(LocalKeyKeeper::from_seed(seed)),
        BuilderConfig::default(),
    );
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let task = TransactionTask::new(builder, Handle::current(), events);
    task.update();
    assert_eq!(task.wait().await, TxStatus::Completed);

    assert_eq!(scope.get::<Vec<CoinId>>(ParameterId::InputCoins).unwrap(), Some(selected));
    assert_eq!(coins.len(), coins_before, "resuming must not create coins twice");
    verify_transaction(&task.transaction().unwrap().unwrap()).unwrap();
}

#[tokio::test]
async fn resumes_after_publishing_nonce() {
    crash_and_resume(Stage::PublishLocal).await;
}

#[tokio::test]
async fn resumes_after_signing() {
    crash_and_resume(Stage::SignPartial).await;
}
