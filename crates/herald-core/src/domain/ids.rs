//! Domain identifiers (strongly-typed IDs).
//!
//! Entry ids are ULID-backed so they sort by creation time and can be minted
//! on any node without coordination. The generic `Id<T>` carries a phantom
//! marker so different id kinds cannot be mixed up at compile time.
//!
//! Provider message ids are assigned by the delivery provider, so they are
//! plain opaque strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for id kinds; supplies the display prefix.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used by `Display` (e.g. "entry-").
    fn prefix() -> &'static str;
}

/// Generic ULID-backed id.
///
/// `T` is only a compile-time marker and costs no memory.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker for queue entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entry {}

impl IdMarker for Entry {
    fn prefix() -> &'static str {
        "entry-"
    }
}

/// Identifier of a queue entry (one unit of ordered delivery work).
pub type EntryId = Id<Entry>;

/// Identifier the delivery provider assigned to an accepted send.
///
/// Webhook callbacks carry this id; it is how a callback is correlated back
/// to the entry that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderMessageId(String);

impl ProviderMessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderMessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProviderMessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_displays_with_prefix() {
        let ulid = Ulid::new();
        let id = EntryId::from_ulid(ulid);

        assert_eq!(id.as_ulid(), ulid);
        assert_eq!(id.to_string(), format!("entry-{ulid}"));
    }

    #[test]
    fn entry_ids_sort_by_creation_time() {
        let first = EntryId::from_ulid(Ulid::from_parts(1_000, 42));
        let second = EntryId::from_ulid(Ulid::from_parts(2_000, 7));

        assert!(first < second);
    }

    #[test]
    fn entry_id_serializes_as_bare_ulid() {
        let id = EntryId::from_ulid(Ulid::new());

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));

        let back: EntryId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn id_is_as_small_as_a_ulid() {
        assert_eq!(std::mem::size_of::<EntryId>(), std::mem::size_of::<Ulid>());
    }

    #[test]
    fn provider_message_id_is_transparent() {
        let id = ProviderMessageId::from("SM123");
        assert_eq!(id.as_str(), "SM123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"SM123\"");
    }
}
