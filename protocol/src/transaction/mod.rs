//! # Transaction Module
//!
//! Confidential transaction construction: the data model (kernels, inputs,
//! outputs), the resumable builder, the asset layer on top of it, and the
//! task driver that runs it all.
//!
//! ## Architecture
//!
//! ```text
//! types.rs       : Amounts, asset ids, coin ids, roles, statuses
//! kernel.rs      : TxKernel, emission kernels, kernel message and id
//! body.rs        : Input, Output, Transaction, normalization
//! verification.rs: Structure, signature and balance checks
//! error.rs       : BuilderError and TxFailureReason
//! pipeline.rs    : Stage list per role, stage outcomes
//! asset.rs       : Issue / Transfer / Burn strategies
//! request.rs     : Fluent TxRequest for initial parameters
//! builder.rs     : TxBuilder, one method per stage
//! task.rs        : TransactionTask: driver, async work, cancellation
//! events.rs      : TxEvent stream
//! exchange.rs    : PeerPacket between the two parties
//! ```
//!
//! ## Transaction Lifecycle
//!
//! 1. **Request**: write agreed parameters with [`TxRequest`].
//! 2. **Drive**: wrap a [`TxBuilder`] in a [`TransactionTask`] and call
//!    `update()` whenever something changes.
//! 3. **Exchange**: for two-party transactions, pass [`PeerPacket`]s
//!    between the sides until both are done.
//! 4. **Verify**: the assembled [`Transaction`] passes
//!    [`verify_transaction`] before it goes anywhere.

pub mod asset;
pub mod body;
pub mod builder;
pub mod error;
pub mod events;
pub mod exchange;
pub mod kernel;
pub mod pipeline;
pub mod request;
pub mod task;
pub mod types;
pub mod verification;

pub use asset::{AssetLayer, AssetStrategy};
pub use body::{Input, Output, Transaction};
pub use builder::TxBuilder;
pub use error::{BuilderError, TxFailureReason};
pub use events::TxEvent;
pub use exchange::PeerPacket;
pub use kernel::{Emission, KernelId, TxKernel};
pub use pipeline::{AsyncRequest, Pipeline, Stage, StageOutcome};
pub use request::TxRequest;
pub use task::TransactionTask;
pub use types::{
    Amount, AmountList, AssetCommand, AssetId, CoinId, KeyId, KeyType, Role, SubTxId, TxId, TxStatus,
};
pub use verification::{verify_transaction, VerificationError};
