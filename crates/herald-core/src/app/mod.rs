//! App - application layer.
//!
//! Combines the ports into delivery behaviour.
//!
//! # Components
//! - **QueueEngine**: enqueue, advance, confirmations, stall sweep, operator views
//! - **EngineBuilder**: wiring and start-up validation
//! - **StallSweeper**: background task driving the sweep and backoff resumption
//! - **RetryPolicy**: delay before a failed entry is re-sent

pub mod builder;
pub mod engine;
pub mod retry;
pub mod status;
pub mod sweeper;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::engine::{
    AdvanceOutcome, ConfirmOutcome, IgnoreReason, QueueEngine, STALL_TIMEOUT_REASON, SweepReport,
};
pub use self::retry::RetryPolicy;
pub use self::status::{BlockedOn, QueueStatus};
pub use self::sweeper::StallSweeper;
