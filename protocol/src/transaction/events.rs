//! Observability events emitted by the task driver at stage boundaries.
//!
//! The driver broadcasts a [`TxEvent`] whenever a stage finishes, fails,
//! starts or finishes async work, or the transaction reaches a terminal
//! state. Builder logic never emits events itself; subscribers (metrics,
//! UIs, tests) see the same stream regardless of which stage produced it.

use serde::Serialize;

use crate::transaction::error::TxFailureReason;
use crate::transaction::pipeline::Stage;
use crate::transaction::types::TxId;

/// A transaction lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TxEvent {
    StageCompleted { tx_id: TxId, stage: Stage },
    StageFailed { tx_id: TxId, stage: Stage, error: String, fatal: bool },
    AsyncStarted { tx_id: TxId, stage: Stage },
    AsyncFinished { tx_id: TxId, stage: Stage, success: bool },
    AwaitingPeer { tx_id: TxId, stage: Stage },
    Completed { tx_id: TxId },
    Failed { tx_id: TxId, reason: TxFailureReason },
    Canceled { tx_id: TxId },
}

impl TxEvent {
    pub fn tx_id(&self) -> TxId {
        match self {
            Self::StageCompleted { tx_id, .. }
            | Self::StageFailed { tx_id, .. }
            | Self::AsyncStarted { tx_id, .. }
            | Self::AsyncFinished { tx_id, .. }
            | Self::AwaitingPeer { tx_id, .. }
            | Self::Completed { tx_id }
            | Self::Failed { tx_id, .. }
            | Self::Canceled { tx_id } => *tx_id,
        }
    }

    /// Whether the transaction is over after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. } | Self::Canceled { .. })
    }
}
