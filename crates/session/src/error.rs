//! Provider errors.
//!
//! A provider returns one of these when it declines to start an operation.
//! The orchestrator never propagates them: it logs the error and surfaces the
//! failure on the matching completion event.

use thiserror::Error;

/// Synchronous rejection reported by a session provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// No session capability is active.
    #[error("session provider unavailable")]
    Unavailable,

    /// A session with this name already exists.
    #[error("session '{0}' already exists")]
    SessionExists(String),

    /// No session with this name exists.
    #[error("no session named '{0}'")]
    NoSession(String),

    /// The provider does not support this kind of request.
    #[error("unsupported by provider: {0}")]
    Unsupported(String),

    /// The provider declined for a provider-specific reason.
    #[error("rejected by provider: {0}")]
    Rejected(String),
}
