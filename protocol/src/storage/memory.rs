//! In-memory parameter store.
//!
//! A `DashMap` keyed by `(TxId, SubTxId, ParameterId)`. Nothing survives the
//! process, which is exactly what tests and throwaway CLI runs want.

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{ParamResult, ParameterChanged, ParameterId, ParameterStore};
use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::transaction::types::{SubTxId, TxId};

type Key = (TxId, SubTxId, ParameterId);

/// Parameter store held in a concurrent hash map.
pub struct MemoryParameterStore {
    values: DashMap<Key, Vec<u8>>,
    changes: broadcast::Sender<ParameterChanged>,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            values: DashMap::new(),
            changes,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for MemoryParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterStore for MemoryParameterStore {
    fn get(&self, tx_id: &TxId, sub_tx_id: SubTxId, id: ParameterId) -> ParamResult<Option<Vec<u8>>> {
        Ok(self.values.get(&(*tx_id, sub_tx_id, id)).map(|v| v.value().clone()))
    }

    fn set(
        &self,
        tx_id: &TxId,
        sub_tx_id: SubTxId,
        id: ParameterId,
        value: Vec<u8>,
        notify: bool,
    ) -> ParamResult<()> {
        self.values.insert((*tx_id, sub_tx_id, id), value);
        if notify {
            // No subscribers is fine.
            let _ = self.changes.send(ParameterChanged {
                tx_id: *tx_id,
                sub_tx_id,
                param: id,
            });
        }
        Ok(())
    }

    fn delete_tx(&self, tx_id: &TxId) -> ParamResult<usize> {
        let before = self.values.len();
        self.values.retain(|(tx, _, _), _| tx != tx_id);
        Ok(before - self.values.len())
    }

    fn tx_ids(&self) -> ParamResult<Vec<TxId>> {
        let mut ids: Vec<TxId> = self.values.iter().map(|entry| entry.key().0).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn subscribe(&self) -> broadcast::Receiver<ParameterChanged> {
        self.changes.subscribe()
    }
}
