//! Error taxonomy for the access-control core.
//!
//! Authentication and authorization failures are routine outcomes and are
//! returned as values; nothing here unwinds past the access-check
//! boundary. `DecryptionFailed` is the exception: it signals data
//! corruption, not policy, and callers should surface it loudly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The principal has no voiceprints on file.
    #[error("no voice enrollment on file")]
    NotEnrolled,

    /// Voice similarity fell below the denial threshold.
    #[error("authentication denied")]
    AuthenticationDenied { score: f64 },

    /// Voice similarity landed in the ambiguous band; a second factor is
    /// required before a session can be issued.
    #[error("additional verification required")]
    ChallengeRequired { score: f64 },

    #[error("session expired")]
    SessionExpired,

    #[error("session not found")]
    SessionNotFound,

    /// Denied by policy. The display string is deliberately identical to
    /// `RecordNotFound` so record existence cannot leak through error
    /// text; `reason` is audit-side detail only.
    #[error("access denied")]
    AuthorizationDenied { reason: String },

    /// Unknown record id. Same display as `AuthorizationDenied` — a
    /// non-owner must not be able to distinguish the two.
    #[error("access denied")]
    RecordNotFound,

    /// Ciphertext failed to open. Integrity fault, not a policy decision.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// An injected capability (embedding extractor, intent classifier)
    /// failed.
    #[error("external capability error: {0}")]
    Capability(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl CoreError {
    /// Uniform denial with an audit-side reason.
    pub fn denied(reason: impl Into<String>) -> Self {
        CoreError::AuthorizationDenied {
            reason: reason.into(),
        }
    }
}
