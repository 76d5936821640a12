//! In-memory LAN provider.
//!
//! Providers sharing a [`LanSegment`] discover each other's advertised
//! sessions. Beacons are stored Protobuf-encoded, the way they would travel
//! over a real segment. Completions are queued and delivered by
//! [`LoopbackProvider::pump`], so callers drive the cooperative loop.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use log::{debug, warn};
use matchlobby_wire::{AdvertisedSession, SessionSearchResult, SessionSettings};

use crate::config::NULL_SUBSYSTEM_NAME;
use crate::error::ProviderError;
use crate::provider::{CompletionHook, SessionProvider};
use crate::{FindSessionsOutcome, JoinResult, SessionSearch};

// ============================================================================
// LAN Segment
// ============================================================================

/// Shared beacon board, keyed by session id.
#[derive(Default)]
pub struct LanSegment {
    beacons: RefCell<BTreeMap<String, Vec<u8>>>,
}

impl LanSegment {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of published beacons.
    pub fn len(&self) -> usize {
        self.beacons.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.borrow().is_empty()
    }

    fn publish(&self, beacon: &AdvertisedSession) {
        self.beacons
            .borrow_mut()
            .insert(beacon.session_id.clone(), beacon.encode_beacon());
    }

    fn withdraw(&self, session_id: &str) {
        self.beacons.borrow_mut().remove(session_id);
    }

    fn beacon(&self, session_id: &str) -> Option<AdvertisedSession> {
        let beacons = self.beacons.borrow();
        let bytes = beacons.get(session_id)?;
        decode_or_warn(session_id, bytes)
    }

    /// Every decodable beacon, ordered by session id.
    fn beacons(&self) -> Vec<AdvertisedSession> {
        self.beacons
            .borrow()
            .iter()
            .filter_map(|(id, bytes)| decode_or_warn(id, bytes))
            .collect()
    }

    #[cfg(test)]
    fn publish_raw(&self, session_id: &str, bytes: Vec<u8>) {
        self.beacons
            .borrow_mut()
            .insert(session_id.to_string(), bytes);
    }
}

fn decode_or_warn(session_id: &str, bytes: &[u8]) -> Option<AdvertisedSession> {
    match AdvertisedSession::decode_beacon(bytes) {
        Ok(beacon) => Some(beacon),
        Err(e) => {
            warn!("skipping undecodable beacon '{session_id}': {e}");
            None
        }
    }
}

// ============================================================================
// Loopback Provider
// ============================================================================

/// Lifecycle of a local named session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSessionState {
    Pending,
    InProgress,
}

#[derive(Debug, Clone)]
struct LocalSession {
    session_id: String,
    hosting: bool,
    state: LocalSessionState,
    /// Host address, for joined sessions.
    connect_address: Option<String>,
}

/// `"NULL"` provider backed by a shared [`LanSegment`].
pub struct LoopbackProvider {
    user_name: String,
    host_address: String,
    lan: Rc<LanSegment>,
    sessions: RefCell<HashMap<String, LocalSession>>,
    /// Sessions hosted so far; each create advertises under a fresh id.
    hosted: Cell<u64>,
    queue: RefCell<VecDeque<Box<dyn FnOnce()>>>,
}

impl LoopbackProvider {
    /// `host_address` is what joining clients travel to.
    pub fn new(
        user_name: impl Into<String>,
        host_address: impl Into<String>,
        lan: Rc<LanSegment>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            host_address: host_address.into(),
            lan,
            sessions: RefCell::new(HashMap::new()),
            hosted: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
        }
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Deliver queued completions, including any queued while pumping.
    /// Returns how many were delivered.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(complete) => {
                    complete();
                    delivered += 1;
                }
                None => return delivered,
            }
        }
    }

    pub fn pending_completions(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn session_state(&self, session_name: &str) -> Option<LocalSessionState> {
        self.sessions.borrow().get(session_name).map(|s| s.state)
    }

    fn defer(&self, complete: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(complete));
    }

    fn advertise(&self, session_id: String, settings: &SessionSettings) {
        self.lan.publish(&AdvertisedSession {
            session_id,
            owning_user_name: self.user_name.clone(),
            host_address: self.host_address.clone(),
            open_public_connections: settings.num_public_connections,
            settings: Some(settings.clone()),
        });
    }

    fn join_outcome(&self, session_name: &str, result: &SessionSearchResult) -> JoinResult {
        if self.sessions.borrow().contains_key(session_name) {
            return JoinResult::AlreadyInSession;
        }
        let Some(mut beacon) = self.lan.beacon(&result.session_id) else {
            return JoinResult::SessionDoesNotExist;
        };
        if beacon.open_public_connections == 0 {
            return JoinResult::SessionIsFull;
        }
        if beacon.host_address.is_empty() {
            return JoinResult::CouldNotRetrieveAddress;
        }

        beacon.open_public_connections -= 1;
        self.lan.publish(&beacon);
        self.sessions.borrow_mut().insert(
            session_name.to_string(),
            LocalSession {
                session_id: beacon.session_id,
                hosting: false,
                state: LocalSessionState::Pending,
                connect_address: Some(beacon.host_address),
            },
        );
        JoinResult::Success
    }
}

impl SessionProvider for LoopbackProvider {
    fn subsystem_name(&self) -> &str {
        NULL_SUBSYSTEM_NAME
    }

    fn has_named_session(&self, session_name: &str) -> bool {
        self.sessions.borrow().contains_key(session_name)
    }

    fn create_session(
        &self,
        session_name: &str,
        settings: &SessionSettings,
        on_complete: CompletionHook<bool>,
    ) -> Result<(), ProviderError> {
        if self.has_named_session(session_name) {
            return Err(ProviderError::SessionExists(session_name.to_string()));
        }

        let generation = self.hosted.get() + 1;
        self.hosted.set(generation);
        let session_id = format!("{}:{session_name}#{generation}", self.user_name);
        if settings.should_advertise {
            self.advertise(session_id.clone(), settings);
        }
        debug!("{}: hosting '{session_id}'", self.user_name);

        self.sessions.borrow_mut().insert(
            session_name.to_string(),
            LocalSession {
                session_id,
                hosting: true,
                state: LocalSessionState::Pending,
                connect_address: None,
            },
        );
        self.defer(move || on_complete.fire(true));
        Ok(())
    }

    fn find_sessions(
        &self,
        search: &SessionSearch,
        on_complete: CompletionHook<FindSessionsOutcome>,
    ) -> Result<(), ProviderError> {
        if !search.is_lan_query {
            return Err(ProviderError::Unsupported("online session search".to_string()));
        }

        let results: Vec<SessionSearchResult> = self
            .lan
            .beacons()
            .into_iter()
            .filter(|b| b.owning_user_name != self.user_name)
            .filter(|b| b.build_unique_id() == search.build_unique_id)
            .filter(|b| {
                !search.search_presence || b.settings.as_ref().is_some_and(|s| s.uses_presence)
            })
            .take(search.max_search_results as usize)
            .map(Into::into)
            .collect();

        debug!("{}: found {} session(s)", self.user_name, results.len());
        self.defer(move || {
            on_complete.fire(FindSessionsOutcome {
                results,
                success: true,
            })
        });
        Ok(())
    }

    fn join_session(
        &self,
        session_name: &str,
        result: &SessionSearchResult,
        on_complete: CompletionHook<JoinResult>,
    ) -> Result<(), ProviderError> {
        let outcome = self.join_outcome(session_name, result);
        debug!(
            "{}: join '{}' -> {outcome}",
            self.user_name, result.session_id
        );
        self.defer(move || on_complete.fire(outcome));
        Ok(())
    }

    fn start_session(
        &self,
        session_name: &str,
        on_complete: CompletionHook<bool>,
    ) -> Result<(), ProviderError> {
        {
            let mut sessions = self.sessions.borrow_mut();
            let session = sessions
                .get_mut(session_name)
                .ok_or_else(|| ProviderError::NoSession(session_name.to_string()))?;
            session.state = LocalSessionState::InProgress;
        }
        self.defer(move || on_complete.fire(true));
        Ok(())
    }

    fn destroy_session(
        &self,
        session_name: &str,
        on_complete: CompletionHook<bool>,
    ) -> Result<(), ProviderError> {
        let session = self
            .sessions
            .borrow_mut()
            .remove(session_name)
            .ok_or_else(|| ProviderError::NoSession(session_name.to_string()))?;

        if session.hosting {
            self.lan.withdraw(&session.session_id);
        } else if let Some(mut beacon) = self.lan.beacon(&session.session_id) {
            // Leaving frees the slot this client held.
            let capacity = beacon
                .settings
                .as_ref()
                .map_or(0, |s| s.num_public_connections);
            if beacon.open_public_connections < capacity {
                beacon.open_public_connections += 1;
                self.lan.publish(&beacon);
            }
        }

        self.defer(move || on_complete.fire(true));
        Ok(())
    }

    fn resolved_connect_string(&self, session_name: &str) -> Option<String> {
        self.sessions
            .borrow()
            .get(session_name)
            .and_then(|s| s.connect_address.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
