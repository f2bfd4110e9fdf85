//! Error types for DKLs23 operations

use crate::ShareholderId;
use thiserror::Error;

/// Result type alias for DKLs23 operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
///
/// Every error returned by a round method ends the party's participation in
/// the session; the kind tells the caller what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed arguments or configuration, surfaced before any round runs.
    Validation,
    /// A round method was called out of order.
    RoundOrder,
    /// An expected peer contribution is absent (or an unexpected one is present).
    MissingMessage,
    /// A specific peer failed a consistency check.
    IdentifiableAbort,
    /// A check failed and no single peer can be blamed.
    TotalAbort,
    /// An internal invariant was broken; this is a bug, not an attack.
    Invariant,
    /// Encoding, transport and other ambient failures.
    Other,
}

/// Errors that can occur during protocol execution
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid argument or configuration
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Round method called out of order
    #[error("Round mismatch: expected round {expected}, instance is at round {actual}")]
    RoundMismatch { expected: u32, actual: u32 },

    /// Expected peer message absent from the round input
    #[error("Missing message from party {from}")]
    MissingMessage { from: ShareholderId },

    /// Round input contains a message from a party outside the quorum
    #[error("Unexpected message from party {from}")]
    UnexpectedSender { from: ShareholderId },

    /// A single peer's data failed a consistency check
    #[error("Identifiable abort, party {party}: {reason}")]
    IdentifiableAbort { party: ShareholderId, reason: String },

    /// A global check failed without a party to blame
    #[error("Total abort: {0}")]
    TotalAbort(String),

    /// Internal invariant violated
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Network/router error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid signature
    #[error("Invalid signature")]
    InvalidSignature,

    /// Key derivation error
    #[error("Key derivation error: {0}")]
    Derivation(String),
}

impl Error {
    /// Shorthand for an identifiable abort against `party`.
    pub fn abort(party: ShareholderId, reason: impl Into<String>) -> Self {
        Error::IdentifiableAbort {
            party,
            reason: reason.into(),
        }
    }

    /// The party to blame, if any.
    pub fn culprit(&self) -> Option<ShareholderId> {
        match self {
            Error::IdentifiableAbort { party, .. } => Some(*party),
            _ => None,
        }
    }

    /// Which of the error categories this error falls into.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) | Error::Derivation(_) => ErrorKind::Validation,
            Error::RoundMismatch { .. } => ErrorKind::RoundOrder,
            Error::MissingMessage { .. } | Error::UnexpectedSender { .. } => {
                ErrorKind::MissingMessage
            }
            Error::IdentifiableAbort { .. } => ErrorKind::IdentifiableAbort,
            Error::TotalAbort(_) | Error::InvalidSignature => ErrorKind::TotalAbort,
            Error::InvariantViolation(_) => ErrorKind::Invariant,
            Error::Serialization(_) | Error::Deserialization(_) | Error::Transport(_) => {
                ErrorKind::Other
            }
        }
    }

    /// Re-tag a deserialization failure of a peer payload as that peer's fault.
    pub(crate) fn blame(self, party: ShareholderId) -> Self {
        match self {
            Error::Deserialization(reason) => Error::abort(party, reason),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_culprit_only_for_identifiable_abort() {
        let err = Error::abort(3, "bad opening");
        assert_eq!(err.culprit(), Some(3));
        assert_eq!(err.kind(), ErrorKind::IdentifiableAbort);

        let err = Error::TotalAbort("public key mismatch".into());
        assert_eq!(err.culprit(), None);
        assert_eq!(err.kind(), ErrorKind::TotalAbort);
    }

    #[test]
    fn test_blame_rewrites_decoding_failures() {
        let err = Error::Deserialization("short point".into()).blame(2);
        assert_eq!(err.culprit(), Some(2));

        let err = Error::Transport("closed".into()).blame(2);
        assert_eq!(err.culprit(), None);
    }
}
