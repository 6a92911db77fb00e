//! Domain model (ids, queue keys, payloads, entries, states, errors).

pub mod delivery;
pub mod entry;
pub mod errors;
pub mod ids;
pub mod payload;
pub mod queue_key;
pub mod status;

pub use self::delivery::DeliveryStatus;
pub use self::entry::{EntryChange, NewEntry, QueueEntry};
pub use self::errors::{ErrorKind, HeraldError, StoreError, TransportError};
pub use self::ids::{EntryId, ProviderMessageId};
pub use self::payload::MessagePayload;
pub use self::queue_key::QueueKey;
pub use self::status::{EntryStatus, QueueCounts};
