//! Session provider contract.
//!
//! The provider owns the real session machinery (discovery, NAT traversal,
//! presence). The orchestrator only sees this trait.

use crate::error::ProviderError;
use crate::{FindSessionsOutcome, JoinResult, SessionSearch};
use matchlobby_wire::{SessionSearchResult, SessionSettings};

/// One-shot completion callback handed to a provider.
///
/// `fire` consumes the hook, so a provider cannot complete an operation twice.
/// Dropping an unfired hook abandons the completion.
pub struct CompletionHook<T> {
    callback: Box<dyn FnOnce(T)>,
}

impl<T> CompletionHook<T> {
    pub fn new(callback: impl FnOnce(T) + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Deliver the outcome.
    pub fn fire(self, outcome: T) {
        (self.callback)(outcome)
    }
}

impl<T> std::fmt::Debug for CompletionHook<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHook").finish_non_exhaustive()
    }
}

/// Asynchronous session capability consumed by the orchestrator.
///
/// Each request method returns `Err` when the provider declines to start the
/// operation; the hook is then dropped unfired. `Ok(())` means the provider
/// fires the hook exactly once, possibly before returning.
///
/// At most one request per kind is outstanding at a time.
pub trait SessionProvider {
    /// Identity of the active subsystem (`"NULL"` for the offline/LAN provider).
    fn subsystem_name(&self) -> &str;

    /// Whether a session with this name currently exists locally.
    fn has_named_session(&self, session_name: &str) -> bool;

    fn create_session(
        &self,
        session_name: &str,
        settings: &SessionSettings,
        on_complete: CompletionHook<bool>,
    ) -> Result<(), ProviderError>;

    fn find_sessions(
        &self,
        search: &SessionSearch,
        on_complete: CompletionHook<FindSessionsOutcome>,
    ) -> Result<(), ProviderError>;

    fn join_session(
        &self,
        session_name: &str,
        result: &SessionSearchResult,
        on_complete: CompletionHook<JoinResult>,
    ) -> Result<(), ProviderError>;

    fn start_session(
        &self,
        session_name: &str,
        on_complete: CompletionHook<bool>,
    ) -> Result<(), ProviderError>;

    fn destroy_session(
        &self,
        session_name: &str,
        on_complete: CompletionHook<bool>,
    ) -> Result<(), ProviderError>;

    /// Address a joined client travels to, once the join has resolved.
    fn resolved_connect_string(&self, session_name: &str) -> Option<String>;
}
