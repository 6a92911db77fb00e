//! Ports - abstraction layer.
//!
//! Each trait is the boundary to something outside the engine: durable
//! storage, the delivery provider, time, and id minting.
//!
//! # Principles
//! - The queue store is the source of truth; the engine is stateless.
//! - No lock is held across a transport call; the in-flight guarantee lives
//!   in entry status.

pub mod clock;
pub mod id_generator;
pub mod queue_store;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue_store::{Expected, QueueStore};
pub use self::transport::DeliveryTransport;
