//! herald-core
//!
//! Ordered, confirmable outbound message delivery.
//!
//! Each `(recipient, queue)` pair is a FIFO with at most one message in
//! flight. The next message goes out only after the provider confirms the
//! previous one delivered, or it has failed its last retry.
//!
//! # Modules
//! - **domain**: entries, statuses, ids, errors
//! - **ports**: QueueStore, DeliveryTransport, Clock, IdGenerator
//! - **app**: QueueEngine, EngineBuilder, StallSweeper
//! - **impls**: in-memory store and transport for development and tests
//! - **config**: layered settings (defaults, TOML file, `HERALD__*` env)

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{
    AdvanceOutcome, BuildError, ConfirmOutcome, EngineBuilder, IgnoreReason, QueueEngine,
    QueueStatus, StallSweeper, SweepReport,
};
pub use config::HeraldConfig;
pub use domain::{
    DeliveryStatus, EntryId, EntryStatus, HeraldError, MessagePayload, ProviderMessageId,
    QueueEntry, QueueKey,
};
