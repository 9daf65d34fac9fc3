//! The builder pipeline: named stages and what a stage can report.
//!
//! A negotiation is a fixed sequence of stages. Every stage is idempotent
//! against the parameter store, so the driver simply walks the sequence
//! from the top on every `update()`: stages that already persisted their
//! result report [`StageOutcome::Skipped`] and the first stage with work
//! left either finishes it, suspends on async work, or waits for the peer.
//!
//! ```text
//! SelectInputs → GenerateNewCoins → GenerateOffset → CreateInputs
//!   → CreateOutputs (async) → PublishLocal → GetPeerInputsAndOutputs
//!   → CreateKernel → SignPartial → CreateTransaction (sender / self only)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::ParameterId;
use crate::transaction::types::{AssetId, CoinId, Role};

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    SelectInputs,
    GenerateNewCoins,
    GenerateOffset,
    CreateInputs,
    CreateOutputs,
    PublishLocal,
    GetPeerInputsAndOutputs,
    CreateKernel,
    SignPartial,
    CreateTransaction,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectInputs => "select_inputs",
            Self::GenerateNewCoins => "generate_new_coins",
            Self::GenerateOffset => "generate_offset",
            Self::CreateInputs => "create_inputs",
            Self::CreateOutputs => "create_outputs",
            Self::PublishLocal => "publish_local",
            Self::GetPeerInputsAndOutputs => "get_peer_inputs_and_outputs",
            Self::CreateKernel => "create_kernel",
            Self::SignPartial => "sign_partial",
            Self::CreateTransaction => "create_transaction",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Async work a stage needs before it can finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncRequest {
    /// Ask the key keeper for outputs; store them under `target`.
    GenerateOutputs {
        min_height: u64,
        coins: Vec<CoinId>,
        asset: AssetId,
        target: ParameterId,
    },
}

/// What a stage reports back to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage did its work and persisted the result.
    Done,
    /// The result was already persisted; nothing to do.
    Skipped,
    /// Suspended on async work; the driver issues it and re-enters later.
    Pending(AsyncRequest),
    /// Needs data from the peer that has not arrived yet.
    AwaitingPeer,
}

/// The ordered stage list for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Receivers stop after signing; the sender assembles.
    pub fn for_role(role: Role) -> Self {
        let mut stages = vec![
            Stage::SelectInputs,
            Stage::GenerateNewCoins,
            Stage::GenerateOffset,
            Stage::CreateInputs,
            Stage::CreateOutputs,
            Stage::PublishLocal,
            Stage::GetPeerInputsAndOutputs,
            Stage::CreateKernel,
            Stage::SignPartial,
        ];
        if role.assembles() {
            stages.push(Stage::CreateTransaction);
        }
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}
