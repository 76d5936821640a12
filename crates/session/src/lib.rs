//! Matchlobby Session Orchestration
//!
//! The orchestrator sequences requests to an external session provider
//! (create, find, join, start, destroy), remembers in-flight request
//! parameters, and rebroadcasts every completion on a durable multicast event
//! so any number of listeners can react.
//!
//! # Execution Model
//!
//! Single-threaded and cooperative. No request blocks: the provider accepts or
//! rejects synchronously and later fires a one-shot [`CompletionHook`]. Every
//! broadcast runs on whatever context fires that hook.
//!
//! # Modules
//!
//! - [`orchestrator`]: request entry points and completion handling
//! - [`events`]: durable multicast channels
//! - [`provider`]: the consumed provider contract
//! - [`matching`]: first-match-wins match type filtering
//! - [`loopback`]: in-memory LAN provider

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod loopback;
pub mod matching;
pub mod orchestrator;
pub mod provider;

pub use config::{GAME_SESSION_NAME, NULL_SUBSYSTEM_NAME, OrchestratorConfig};
pub use error::ProviderError;
pub use events::{Multicast, SessionEvents, SubscriptionId};
pub use loopback::{LanSegment, LoopbackProvider};
pub use matching::find_match;
pub use matchlobby_wire::{MATCH_TYPE_KEY, SessionSearchResult, SessionSettings};
pub use orchestrator::{SessionOrchestrator, SessionRequestState};
pub use provider::{CompletionHook, SessionProvider};

// ============================================================================
// Request Descriptors
// ============================================================================

/// Search descriptor handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSearch {
    pub max_search_results: u32,
    pub is_lan_query: bool,
    /// Only return presence sessions.
    pub search_presence: bool,
    pub build_unique_id: u32,
}

// ============================================================================
// Completion Payloads
// ============================================================================

/// Result set and success flag of a find request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindSessionsOutcome {
    pub results: Vec<SessionSearchResult>,
    pub success: bool,
}

impl FindSessionsOutcome {
    /// Empty, unsuccessful outcome.
    pub fn failed() -> Self {
        Self::default()
    }
}

/// Outcome of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinResult {
    Success,
    SessionIsFull,
    SessionDoesNotExist,
    CouldNotRetrieveAddress,
    AlreadyInSession,
    UnknownError,
}

impl JoinResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SessionIsFull => "session_is_full",
            Self::SessionDoesNotExist => "session_does_not_exist",
            Self::CouldNotRetrieveAddress => "could_not_retrieve_address",
            Self::AlreadyInSession => "already_in_session",
            Self::UnknownError => "unknown_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for JoinResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Operation Kinds
// ============================================================================

/// The five request kinds. Each has one hook slot and one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Find,
    Join,
    Start,
    Destroy,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        Self::Create,
        Self::Find,
        Self::Join,
        Self::Start,
        Self::Destroy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Find => "find",
            Self::Join => "join",
            Self::Start => "start",
            Self::Destroy => "destroy",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Create => 0,
            Self::Find => 1,
            Self::Join => 2,
            Self::Start => 3,
            Self::Destroy => 4,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
