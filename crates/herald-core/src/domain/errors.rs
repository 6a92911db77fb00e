//! Errors and their operational classification.

use std::time::Duration;

use thiserror::Error;

use super::ids::EntryId;
use super::status::EntryStatus;

/// Operational classification of a failure.
///
/// - Transient: worth retrying (network, provider 5xx, timeouts).
/// - Permanent: retrying will not help (invalid number, content rejected).
/// - Infrastructure: the queue store itself is failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Engine-level error returned to producers and operators.
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HeraldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeraldError::Validation(_) => ErrorKind::Permanent,
            HeraldError::Store(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Failure reported by a `QueueStore`.
///
/// A conditional update whose precondition no longer holds is *not* an error;
/// stores report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entry not found: {0}")]
    NotFound(EntryId),

    #[error("illegal transition for {entry}: {from} -> {to}")]
    IllegalTransition {
        entry: EntryId,
        from: EntryStatus,
        to: EntryStatus,
    },

    #[error("queue store unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a `DeliveryTransport`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transient transport error: {0}")]
    Transient(String),

    #[error("permanent transport error: {0}")]
    Permanent(String),

    #[error("transport call timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Transient(_) | TransportError::Timeout(_) => ErrorKind::Transient,
            TransportError::Permanent(_) => ErrorKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn transport_errors_are_classified() {
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            TransportError::Permanent("invalid number".into()).kind(),
            ErrorKind::Permanent
        );
    }

    #[test]
    fn store_errors_convert_into_engine_errors() {
        let id = EntryId::from_ulid(Ulid::new());
        let err: HeraldError = StoreError::NotFound(id).into();

        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(err.to_string().contains("entry not found"));
    }

    #[test]
    fn illegal_transition_names_both_states() {
        let err = StoreError::IllegalTransition {
            entry: EntryId::from_ulid(Ulid::new()),
            from: EntryStatus::Delivered,
            to: EntryStatus::Pending,
        };
        assert!(err.to_string().ends_with("delivered -> pending"));
    }
}
