//! Impls - in-process implementations of the ports (development / tests).
//!
//! # Included
//! - **InMemoryQueueStore**: queue store behind a single mutex
//! - **InMemoryTransport**: scriptable provider stand-in
//!
//! Production implementations (SQL store, provider client) live outside this
//! crate and implement the same traits.

pub mod memory_store;
pub mod memory_transport;

pub use self::memory_store::InMemoryQueueStore;
pub use self::memory_transport::{InMemoryTransport, SentMessage};
