//! # Sled Parameter Store
//!
//! Durable transaction parameters on top of sled's embedded key-value store.
//! A wallet that crashes mid-negotiation reopens the same directory and
//! every builder resumes from its last persisted parameter.
//!
//! ## Tree Layout
//!
//! | Tree     | Key                                         | Value          |
//! |----------|---------------------------------------------|----------------|
//! | `params` | `tx_id` (16B) `sub_tx_id` (1B) `param` (2B BE) | raw value bytes |
//!
//! The transaction id leads the key, so everything belonging to one
//! transaction is a contiguous prefix: deleting a transaction is a prefix
//! scan, and listing transactions is a walk over distinct prefixes.
//!
//! ## Durability
//!
//! Each `set` is a single sled insert, which is atomic. We do not flush on
//! every write; sled flushes on its own schedule and on drop. Callers that
//! need a hard durability point call [`SledParameterStore::flush`].

use std::path::Path;

use sled::{Db, Tree};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{ParamError, ParamResult, ParameterChanged, ParameterId, ParameterStore};
use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::transaction::types::{SubTxId, TxId};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("malformed key of length {0}")]
    MalformedKey(usize),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for ParamError {
    fn from(err: DbError) -> Self {
        ParamError::Storage(err.to_string())
    }
}

const KEY_LEN: usize = 16 + 1 + 2;

fn encode_key(tx_id: &TxId, sub_tx_id: SubTxId, id: ParameterId) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[..16].copy_from_slice(tx_id.as_bytes());
    key[16] = sub_tx_id.0;
    key[17..].copy_from_slice(&id.code().to_be_bytes());
    key
}

fn decode_tx_id(key: &[u8]) -> DbResult<TxId> {
    if key.len() != KEY_LEN {
        return Err(DbError::MalformedKey(key.len()));
    }
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&key[..16]);
    Ok(TxId(Uuid::from_bytes(raw)))
}

// ---------------------------------------------------------------------------
// SledParameterStore
// ---------------------------------------------------------------------------

/// Persistent parameter store.
///
/// sled trees are thread-safe; the store can be shared as
/// `Arc<dyn ParameterStore>` without extra locking.
pub struct SledParameterStore {
    db: Db,
    params: Tree,
    changes: broadcast::Sender<ParameterChanged>,
}

impl SledParameterStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A store that lives in a temporary directory and is removed on drop.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let params = db.open_tree("params")?;
        let (changes, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self { db, params, changes })
    }

    /// Flush dirty buffers to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl ParameterStore for SledParameterStore {
    fn get(&self, tx_id: &TxId, sub_tx_id: SubTxId, id: ParameterId) -> ParamResult<Option<Vec<u8>>> {
        let key = encode_key(tx_id, sub_tx_id, id);
        let value = self.params.get(key).map_err(DbError::from)?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn set(
        &self,
        tx_id: &TxId,
        sub_tx_id: SubTxId,
        id: ParameterId,
        value: Vec<u8>,
        notify: bool,
    ) -> ParamResult<()> {
        let key = encode_key(tx_id, sub_tx_id, id);
        self.params.insert(key, value).map_err(DbError::from)?;
        if notify {
            let _ = self.changes.send(ParameterChanged {
                tx_id: *tx_id,
                sub_tx_id,
                param: id,
            });
        }
        Ok(())
    }

    fn delete_tx(&self, tx_id: &TxId) -> ParamResult<usize> {
        let mut removed = 0;
        for entry in self.params.scan_prefix(tx_id.as_bytes()) {
            let (key, _) = entry.map_err(DbError::from)?;
            self.params.remove(key).map_err(DbError::from)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn tx_ids(&self) -> ParamResult<Vec<TxId>> {
        let mut ids: Vec<TxId> = Vec::new();
        for entry in self.params.iter() {
            let (key, _) = entry.map_err(DbError::from)?;
            let tx_id = decode_tx_id(&key)?;
            // Keys are sorted, so equal prefixes are adjacent.
            if ids.last() != Some(&tx_id) {
                ids.push(tx_id);
            }
        }
        Ok(ids)
    }

    fn subscribe(&self) -> broadcast::Receiver<ParameterChanged> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TxParameters;
    use std::sync::Arc;

    #[test]
    fn open_temporary_database() {
        let store = SledParameterStore::open_temporary().expect("should create temp db");
        assert!(store.is_empty());
    }

    #[test]
    fn parameters_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tx = TxId::new();

        {
            let store = SledParameterStore::open(dir.path()).expect("should open db");
            let params = TxParameters::new(Arc::new(store), tx, SubTxId::default());
            params.set(ParameterId::AmountList, &vec![100u64, 250]).unwrap();
            params.set(ParameterId::Fee, &10u64).unwrap();
        }

        let store = SledParameterStore::open(dir.path()).expect("should reopen db");
        let params = TxParameters::new(Arc::new(store), tx, SubTxId::default());
        let amounts: Vec<u64> = params.get_mandatory(ParameterId::AmountList).unwrap();
        assert_eq!(amounts, vec![100, 250]);
        assert_eq!(params.get::<u64>(ParameterId::Fee).unwrap(), Some(10));
    }

    #[test]
    fn keys_keep_transactions_contiguous() {
        let store = SledParameterStore::open_temporary().unwrap();
        let (a, b) = (TxId::new(), TxId::new());
        for id in [ParameterId::Fee, ParameterId::Offset, ParameterId::Status] {
            store.set(&a, SubTxId(1), id, vec![0], false).unwrap();
            store.set(&b, SubTxId(1), id, vec![0], false).unwrap();
        }
        store.set(&a, SubTxId(2), ParameterId::Fee, vec![0], false).unwrap();

        let mut ids = store.tx_ids().unwrap();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);

        assert_eq!(store.delete_tx(&a).unwrap(), 4);
        assert_eq!(store.tx_ids().unwrap(), vec![b]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn notify_reaches_subscribers() {
        let store = SledParameterStore::open_temporary().unwrap();
        let mut rx = store.subscribe();
        let tx = TxId::new();
        store.set(&tx, SubTxId(1), ParameterId::PartialSignature, vec![9], true).unwrap();
        assert_eq!(rx.try_recv().unwrap().param, ParameterId::PartialSignature);
    }
}
