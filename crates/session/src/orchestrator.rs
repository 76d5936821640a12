//! Session orchestrator.
//!
//! Sequences requests to the provider and rebroadcasts completions. Each
//! request kind owns one hook slot: a slot holds the ticket of the outstanding
//! request and is cleared when that request's hook fires, when the provider
//! rejects it synchronously, or when the request is cancelled. A completion
//! whose ticket no longer matches its slot is stale and ignored.
//!
//! Creating a session while one already exists destroys it first. The create
//! resumes from the destroy completion, through the public entry point, so the
//! existing-session check runs again.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use log::{debug, info, warn};
use matchlobby_wire::{MATCH_TYPE_KEY, SessionSearchResult, SessionSettings};

use crate::config::OrchestratorConfig;
use crate::events::SessionEvents;
use crate::matching::find_match;
use crate::provider::{CompletionHook, SessionProvider};
use crate::{FindSessionsOutcome, JoinResult, OperationKind, SessionSearch};

// ============================================================================
// Request State
// ============================================================================

/// Parameters of the most recent requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionRequestState {
    /// Set between a create-triggered destroy and that destroy's completion.
    pub pending_recreate_after_destroy: bool,
    pub last_requested_public_connections: u32,
    pub last_requested_match_type: String,
    /// Results of the last find, replaced wholesale on each completion.
    pub last_search_results: Vec<SessionSearchResult>,
    /// Settings most recently submitted to the provider.
    pub last_session_settings: Option<SessionSettings>,
    pub last_session_search: Option<SessionSearch>,
}

type Ticket = u64;

struct Inner {
    provider: Option<Rc<dyn SessionProvider>>,
    config: OrchestratorConfig,
    state: RefCell<SessionRequestState>,
    /// Outstanding ticket per request kind, indexed by `OperationKind::index`.
    hooks: RefCell<[Option<Ticket>; 5]>,
    next_ticket: Cell<Ticket>,
    events: SessionEvents,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Stateful façade over a [`SessionProvider`].
///
/// Cloning yields another handle to the same orchestrator, so listeners can
/// hold one and issue follow-up requests from inside a broadcast.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Rc<Inner>,
}

impl SessionOrchestrator {
    /// Create an orchestrator driving `provider`.
    pub fn new(provider: Rc<dyn SessionProvider>, config: OrchestratorConfig) -> Self {
        Self::build(Some(provider), config)
    }

    /// Create an orchestrator with no session capability.
    ///
    /// Every request fails immediately through its completion event.
    pub fn without_provider(config: OrchestratorConfig) -> Self {
        Self::build(None, config)
    }

    fn build(provider: Option<Rc<dyn SessionProvider>>, config: OrchestratorConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                provider,
                config,
                state: RefCell::new(SessionRequestState::default()),
                hooks: RefCell::new([None; 5]),
                next_ticket: Cell::new(1),
                events: SessionEvents::new(),
            }),
        }
    }

    /// Completion events.
    pub fn events(&self) -> &SessionEvents {
        &self.inner.events
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn has_provider(&self) -> bool {
        self.inner.provider.is_some()
    }

    /// Snapshot of the request state.
    pub fn request_state(&self) -> SessionRequestState {
        self.inner.state.borrow().clone()
    }

    /// Results of the last find.
    pub fn last_search_results(&self) -> Vec<SessionSearchResult> {
        self.inner.state.borrow().last_search_results.clone()
    }

    /// Whether a request of `kind` is outstanding.
    ///
    /// A create waiting on its forced destroy counts as outstanding.
    pub fn is_in_flight(&self, kind: OperationKind) -> bool {
        let armed = self.inner.hooks.borrow()[kind.index()].is_some();
        armed
            || (kind == OperationKind::Create
                && self.inner.state.borrow().pending_recreate_after_destroy)
    }

    /// Address to travel to after a successful join.
    pub fn resolved_connect_string(&self) -> Option<String> {
        self.inner
            .provider
            .as_ref()?
            .resolved_connect_string(&self.inner.config.session_name)
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Create the well-known session.
    ///
    /// Result arrives on `create_session_completed`. If the session already
    /// exists it is destroyed first and creation resumes once that succeeds.
    pub fn create_session(&self, public_connections: u32, match_type: &str) {
        let Some(provider) = self.inner.provider.clone() else {
            warn!("create_session: no session provider");
            self.inner.events.create_session_completed.broadcast(&false);
            return;
        };
        if self.is_in_flight(OperationKind::Create) {
            warn!("create_session: a create request is already in flight, dropping");
            return;
        }

        {
            let mut state = self.inner.state.borrow_mut();
            state.last_requested_public_connections = public_connections;
            state.last_requested_match_type = match_type.to_string();
        }

        let session_name = self.inner.config.session_name.as_str();
        if provider.has_named_session(session_name) {
            info!("create_session: '{session_name}' exists, destroying it first");
            self.inner.state.borrow_mut().pending_recreate_after_destroy = true;
            self.destroy_session();
            return;
        }

        let settings = self.session_settings(provider.as_ref(), public_connections, match_type);
        self.inner.state.borrow_mut().last_session_settings = Some(settings.clone());

        let Some(ticket) = self.arm(OperationKind::Create) else {
            return;
        };
        let hook = self.hook(ticket, Self::on_create_complete);

        info!(
            "create_session: '{session_name}' connections={public_connections} match_type={match_type}"
        );
        if let Err(e) = provider.create_session(session_name, &settings, hook)
            && self.disarm(OperationKind::Create, ticket)
        {
            warn!("create_session rejected: {e}");
            self.inner.events.create_session_completed.broadcast(&false);
        }
    }

    /// Search for sessions. Result arrives on `find_sessions_completed`.
    pub fn find_sessions(&self, max_search_results: u32) {
        let Some(provider) = self.inner.provider.clone() else {
            warn!("find_sessions: no session provider");
            self.fail_find();
            return;
        };
        if self.is_in_flight(OperationKind::Find) {
            warn!("find_sessions: a find request is already in flight, dropping");
            return;
        }

        let search = SessionSearch {
            max_search_results,
            is_lan_query: self.is_lan(provider.as_ref()),
            search_presence: true,
            build_unique_id: self.inner.config.build_unique_id,
        };
        self.inner.state.borrow_mut().last_session_search = Some(search.clone());

        let Some(ticket) = self.arm(OperationKind::Find) else {
            return;
        };
        let hook = self.hook(ticket, Self::on_find_complete);

        info!(
            "find_sessions: max={max_search_results} lan={}",
            search.is_lan_query
        );
        if let Err(e) = provider.find_sessions(&search, hook)
            && self.disarm(OperationKind::Find, ticket)
        {
            warn!("find_sessions rejected: {e}");
            self.fail_find();
        }
    }

    /// Join a search result. Result arrives on `join_session_completed`.
    pub fn join_session(&self, result: &SessionSearchResult) {
        self.request_join(result);
    }

    /// Returns false when the request was dropped as a duplicate, in which
    /// case no join event follows.
    fn request_join(&self, result: &SessionSearchResult) -> bool {
        let Some(provider) = self.inner.provider.clone() else {
            warn!("join_session: no session provider");
            self.inner
                .events
                .join_session_completed
                .broadcast(&JoinResult::UnknownError);
            return true;
        };
        if self.is_in_flight(OperationKind::Join) {
            warn!("join_session: a join request is already in flight, dropping");
            return false;
        }

        let Some(ticket) = self.arm(OperationKind::Join) else {
            return false;
        };
        let hook = self.hook(ticket, Self::on_join_complete);

        let session_name = self.inner.config.session_name.as_str();
        info!("join_session: '{}' as '{session_name}'", result.session_id);
        if let Err(e) = provider.join_session(session_name, result, hook)
            && self.disarm(OperationKind::Join, ticket)
        {
            warn!("join_session rejected: {e}");
            self.inner
                .events
                .join_session_completed
                .broadcast(&JoinResult::UnknownError);
        }
        true
    }

    /// Join the first result advertising `match_type`.
    ///
    /// Returns true when a join was issued, so a `join_session_completed`
    /// event follows. Returns false when nothing matches or a join is
    /// already in flight.
    pub fn join_first_matching(&self, results: &[SessionSearchResult], match_type: &str) -> bool {
        match find_match(results, match_type) {
            Some(result) => self.request_join(result),
            None => {
                debug!("join_first_matching: no result with match type '{match_type}'");
                false
            }
        }
    }

    /// Start the session. Result arrives on `start_session_completed`.
    pub fn start_session(&self) {
        let Some(provider) = self.inner.provider.clone() else {
            warn!("start_session: no session provider");
            self.inner.events.start_session_completed.broadcast(&false);
            return;
        };
        if self.is_in_flight(OperationKind::Start) {
            warn!("start_session: a start request is already in flight, dropping");
            return;
        }

        let Some(ticket) = self.arm(OperationKind::Start) else {
            return;
        };
        let hook = self.hook(ticket, Self::on_start_complete);

        let session_name = self.inner.config.session_name.as_str();
        info!("start_session: '{session_name}'");
        if let Err(e) = provider.start_session(session_name, hook)
            && self.disarm(OperationKind::Start, ticket)
        {
            warn!("start_session rejected: {e}");
            self.inner.events.start_session_completed.broadcast(&false);
        }
    }

    /// Destroy the session. Result arrives on `destroy_session_completed`.
    pub fn destroy_session(&self) {
        let Some(provider) = self.inner.provider.clone() else {
            warn!("destroy_session: no session provider");
            self.inner.events.destroy_session_completed.broadcast(&false);
            return;
        };
        if self.is_in_flight(OperationKind::Destroy) {
            warn!("destroy_session: a destroy request is already in flight, dropping");
            return;
        }

        let Some(ticket) = self.arm(OperationKind::Destroy) else {
            return;
        };
        let hook = self.hook(ticket, Self::on_destroy_complete);

        let session_name = self.inner.config.session_name.as_str();
        info!("destroy_session: '{session_name}'");
        if let Err(e) = provider.destroy_session(session_name, hook)
            && self.disarm(OperationKind::Destroy, ticket)
        {
            warn!("destroy_session rejected: {e}");
            self.inner.events.destroy_session_completed.broadcast(&false);
            self.abandon_pending_recreate();
        }
    }

    /// Abandon the outstanding request of `kind` and broadcast its failure.
    ///
    /// A completion arriving later for the abandoned request is ignored.
    /// Returns false if nothing of that kind was outstanding.
    pub fn cancel(&self, kind: OperationKind) -> bool {
        let armed = self.inner.hooks.borrow_mut()[kind.index()].take().is_some();
        let events = &self.inner.events;

        match kind {
            OperationKind::Create => {
                let pending = self.take_pending_recreate();
                if !armed && !pending {
                    return false;
                }
                warn!("create_session cancelled");
                events.create_session_completed.broadcast(&false);
            }
            OperationKind::Find => {
                if !armed {
                    return false;
                }
                warn!("find_sessions cancelled");
                self.fail_find();
            }
            OperationKind::Join => {
                if !armed {
                    return false;
                }
                warn!("join_session cancelled");
                events
                    .join_session_completed
                    .broadcast(&JoinResult::UnknownError);
            }
            OperationKind::Start => {
                if !armed {
                    return false;
                }
                warn!("start_session cancelled");
                events.start_session_completed.broadcast(&false);
            }
            OperationKind::Destroy => {
                if !armed {
                    return false;
                }
                warn!("destroy_session cancelled");
                events.destroy_session_completed.broadcast(&false);
                self.abandon_pending_recreate();
            }
        }
        true
    }

    // ------------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------------

    fn on_create_complete(&self, ticket: Ticket, success: bool) {
        if !self.disarm(OperationKind::Create, ticket) {
            debug!("ignoring stale create completion (ticket {ticket})");
            return;
        }
        info!("create_session completed: success={success}");
        self.inner.events.create_session_completed.broadcast(&success);
    }

    fn on_find_complete(&self, ticket: Ticket, outcome: FindSessionsOutcome) {
        if !self.disarm(OperationKind::Find, ticket) {
            debug!("ignoring stale find completion (ticket {ticket})");
            return;
        }

        let FindSessionsOutcome { results, success } = outcome;
        if results.is_empty() {
            info!("find_sessions completed: no results (provider success={success})");
            self.fail_find();
            return;
        }

        info!(
            "find_sessions completed: {} result(s), success={success}",
            results.len()
        );
        self.inner.state.borrow_mut().last_search_results = results.clone();
        self.inner
            .events
            .find_sessions_completed
            .broadcast(&FindSessionsOutcome { results, success });
    }

    fn on_join_complete(&self, ticket: Ticket, result: JoinResult) {
        if !self.disarm(OperationKind::Join, ticket) {
            debug!("ignoring stale join completion (ticket {ticket})");
            return;
        }
        info!("join_session completed: {result}");
        self.inner.events.join_session_completed.broadcast(&result);
    }

    fn on_start_complete(&self, ticket: Ticket, success: bool) {
        if !self.disarm(OperationKind::Start, ticket) {
            debug!("ignoring stale start completion (ticket {ticket})");
            return;
        }
        info!("start_session completed: success={success}");
        self.inner.events.start_session_completed.broadcast(&success);
    }

    fn on_destroy_complete(&self, ticket: Ticket, success: bool) {
        if !self.disarm(OperationKind::Destroy, ticket) {
            debug!("ignoring stale destroy completion (ticket {ticket})");
            return;
        }
        info!("destroy_session completed: success={success}");

        // Cleared before the create below so a nested destroy cannot loop.
        let recreate = self.take_pending_recreate();
        if recreate && success {
            let (public_connections, match_type) = {
                let state = self.inner.state.borrow();
                (
                    state.last_requested_public_connections,
                    state.last_requested_match_type.clone(),
                )
            };
            self.create_session(public_connections, &match_type);
        }

        self.inner.events.destroy_session_completed.broadcast(&success);

        if recreate && !success {
            warn!("forced destroy failed, abandoning create");
            self.inner.events.create_session_completed.broadcast(&false);
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn is_lan(&self, provider: &dyn SessionProvider) -> bool {
        provider.subsystem_name() == self.inner.config.null_subsystem_name
    }

    fn session_settings(
        &self,
        provider: &dyn SessionProvider,
        public_connections: u32,
        match_type: &str,
    ) -> SessionSettings {
        let mut settings = SessionSettings {
            num_public_connections: public_connections,
            is_lan_match: self.is_lan(provider),
            allow_join_in_progress: true,
            allow_join_via_presence: true,
            should_advertise: true,
            uses_presence: true,
            use_lobbies_if_available: true,
            build_unique_id: self.inner.config.build_unique_id,
            ..Default::default()
        };
        settings.set(MATCH_TYPE_KEY, match_type);
        settings
    }

    /// Claim the hook slot for `kind`. None if it is already taken.
    fn arm(&self, kind: OperationKind) -> Option<Ticket> {
        let mut hooks = self.inner.hooks.borrow_mut();
        let slot = &mut hooks[kind.index()];
        if slot.is_some() {
            return None;
        }
        let ticket = self.inner.next_ticket.get();
        self.inner.next_ticket.set(ticket + 1);
        *slot = Some(ticket);
        Some(ticket)
    }

    /// Release the slot for `kind` if it still holds `ticket`.
    fn disarm(&self, kind: OperationKind, ticket: Ticket) -> bool {
        let mut hooks = self.inner.hooks.borrow_mut();
        let slot = &mut hooks[kind.index()];
        if *slot == Some(ticket) {
            *slot = None;
            true
        } else {
            false
        }
    }

    fn hook<T: 'static>(
        &self,
        ticket: Ticket,
        handler: fn(&SessionOrchestrator, Ticket, T),
    ) -> CompletionHook<T> {
        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        CompletionHook::new(move |outcome| match weak.upgrade() {
            Some(inner) => handler(&SessionOrchestrator { inner }, ticket, outcome),
            None => debug!("completion for ticket {ticket} after orchestrator dropped"),
        })
    }

    /// Forget the previous results, then report an empty failed search.
    fn fail_find(&self) {
        self.inner.state.borrow_mut().last_search_results.clear();
        self.inner
            .events
            .find_sessions_completed
            .broadcast(&FindSessionsOutcome::failed());
    }

    fn take_pending_recreate(&self) -> bool {
        std::mem::take(&mut self.inner.state.borrow_mut().pending_recreate_after_destroy)
    }

    fn abandon_pending_recreate(&self) {
        if self.take_pending_recreate() {
            warn!("forced destroy failed, abandoning create");
            self.inner.events.create_session_completed.broadcast(&false);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderError;
    use std::collections::{HashMap, HashSet, VecDeque};

    /// Scripted provider: counts calls and parks hooks until a test fires them.
    #[derive(Default)]
    struct MockProvider {
        name: String,
        /// Answers for successive `has_named_session` checks; false once exhausted.
        existing: RefCell<VecDeque<bool>>,
        existence_checks: Cell<usize>,
        reject: RefCell<HashSet<OperationKind>>,
        calls: RefCell<HashMap<OperationKind, usize>>,
        create_hooks: RefCell<VecDeque<CompletionHook<bool>>>,
        find_hooks: RefCell<VecDeque<CompletionHook<FindSessionsOutcome>>>,
        join_hooks: RefCell<VecDeque<CompletionHook<JoinResult>>>,
        start_hooks: RefCell<VecDeque<CompletionHook<bool>>>,
        destroy_hooks: RefCell<VecDeque<CompletionHook<bool>>>,
        last_settings: RefCell<Option<SessionSettings>>,
        last_search: RefCell<Option<SessionSearch>>,
        joined: RefCell<Vec<String>>,
    }

    impl MockProvider {
        fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                ..Default::default()
            }
        }

        fn with_existing(self, answers: &[bool]) -> Self {
            *self.existing.borrow_mut() = answers.iter().copied().collect();
            self
        }

        fn rejecting(self, kind: OperationKind) -> Self {
            self.reject.borrow_mut().insert(kind);
            self
        }

        fn calls(&self, kind: OperationKind) -> usize {
            self.calls.borrow().get(&kind).copied().unwrap_or(0)
        }

        fn record(&self, kind: OperationKind) -> Result<(), ProviderError> {
            *self.calls.borrow_mut().entry(kind).or_insert(0) += 1;
            if self.reject.borrow().contains(&kind) {
                return Err(ProviderError::Rejected(format!("{kind} refused")));
            }
            Ok(())
        }

        fn complete_create(&self, success: bool) {
            let hook = self.create_hooks.borrow_mut().pop_front().unwrap();
            hook.fire(success);
        }

        fn complete_find(&self, outcome: FindSessionsOutcome) {
            let hook = self.find_hooks.borrow_mut().pop_front().unwrap();
            hook.fire(outcome);
        }

        fn complete_join(&self, result: JoinResult) {
            let hook = self.join_hooks.borrow_mut().pop_front().unwrap();
            hook.fire(result);
        }

        fn complete_start(&self, success: bool) {
            let hook = self.start_hooks.borrow_mut().pop_front().unwrap();
            hook.fire(success);
        }

        fn complete_destroy(&self, success: bool) {
            let hook = self.destroy_hooks.borrow_mut().pop_front().unwrap();
            hook.fire(success);
        }
    }

    impl SessionProvider for MockProvider {
        fn subsystem_name(&self) -> &str {
            &self.name
        }

        fn has_named_session(&self, _session_name: &str) -> bool {
            self.existence_checks.set(self.existence_checks.get() + 1);
            self.existing.borrow_mut().pop_front().unwrap_or(false)
        }

        fn create_session(
            &self,
            _session_name: &str,
            settings: &SessionSettings,
            on_complete: CompletionHook<bool>,
        ) -> Result<(), ProviderError> {
            self.record(OperationKind::Create)?;
            *self.last_settings.borrow_mut() = Some(settings.clone());
            self.create_hooks.borrow_mut().push_back(on_complete);
            Ok(())
        }

        fn find_sessions(
            &self,
            search: &SessionSearch,
            on_complete: CompletionHook<FindSessionsOutcome>,
        ) -> Result<(), ProviderError> {
            *self.last_search.borrow_mut() = Some(search.clone());
            self.record(OperationKind::Find)?;
            self.find_hooks.borrow_mut().push_back(on_complete);
            Ok(())
        }

        fn join_session(
            &self,
            _session_name: &str,
            result: &SessionSearchResult,
            on_complete: CompletionHook<JoinResult>,
        ) -> Result<(), ProviderError> {
            self.record(OperationKind::Join)?;
            self.joined.borrow_mut().push(result.session_id.clone());
            self.join_hooks.borrow_mut().push_back(on_complete);
            Ok(())
        }

        fn start_session(
            &self,
            _session_name: &str,
            on_complete: CompletionHook<bool>,
        ) -> Result<(), ProviderError> {
            self.record(OperationKind::Start)?;
            self.start_hooks.borrow_mut().push_back(on_complete);
            Ok(())
        }

        fn destroy_session(
            &self,
            _session_name: &str,
            on_complete: CompletionHook<bool>,
        ) -> Result<(), ProviderError> {
            self.record(OperationKind::Destroy)?;
            self.destroy_hooks.borrow_mut().push_back(on_complete);
            Ok(())
        }

        fn resolved_connect_string(&self, _session_name: &str) -> Option<String> {
            Some("10.0.0.2:7777".to_string())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Create(bool),
        Find(usize, bool),
        Join(JoinResult),
        Start(bool),
        Destroy(bool),
    }

    type Log = Rc<RefCell<Vec<Seen>>>;

    fn record_all(orchestrator: &SessionOrchestrator) -> Log {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let events = orchestrator.events();

        let l = Rc::clone(&log);
        events
            .create_session_completed
            .subscribe(move |ok| l.borrow_mut().push(Seen::Create(*ok)));
        let l = Rc::clone(&log);
        events
            .find_sessions_completed
            .subscribe(move |o| l.borrow_mut().push(Seen::Find(o.results.len(), o.success)));
        let l = Rc::clone(&log);
        events
            .join_session_completed
            .subscribe(move |r| l.borrow_mut().push(Seen::Join(*r)));
        let l = Rc::clone(&log);
        events
            .start_session_completed
            .subscribe(move |ok| l.borrow_mut().push(Seen::Start(*ok)));
        let l = Rc::clone(&log);
        events
            .destroy_session_completed
            .subscribe(move |ok| l.borrow_mut().push(Seen::Destroy(*ok)));

        log
    }

    fn setup(provider: MockProvider) -> (Rc<MockProvider>, SessionOrchestrator, Log) {
        let provider = Rc::new(provider);
        let orchestrator = SessionOrchestrator::new(provider.clone(), OrchestratorConfig::default());
        let log = record_all(&orchestrator);
        (provider, orchestrator, log)
    }

    fn tagged(id: &str, match_type: &str) -> SessionSearchResult {
        let mut settings = SessionSettings::default();
        settings.set(MATCH_TYPE_KEY, match_type);
        SessionSearchResult {
            session_id: id.to_string(),
            settings: Some(settings),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_builds_settings_and_broadcasts_completion() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        orchestrator.create_session(4, "FreeForAll");
        assert_eq!(provider.calls(OperationKind::Create), 1);
        assert!(orchestrator.is_in_flight(OperationKind::Create));
        assert!(log.borrow().is_empty());

        let settings = provider.last_settings.borrow().clone().unwrap();
        assert_eq!(settings.num_public_connections, 4);
        assert!(settings.is_lan_match);
        assert!(settings.allow_join_in_progress);
        assert!(settings.allow_join_via_presence);
        assert!(settings.should_advertise);
        assert!(settings.uses_presence);
        assert!(settings.use_lobbies_if_available);
        assert_eq!(settings.build_unique_id, 1);
        assert_eq!(settings.match_type(), Some("FreeForAll"));
        assert_eq!(
            orchestrator.request_state().last_session_settings,
            Some(settings)
        );

        provider.complete_create(true);
        assert_eq!(*log.borrow(), vec![Seen::Create(true)]);
        assert!(!orchestrator.is_in_flight(OperationKind::Create));
    }

    #[test]
    fn test_online_provider_is_not_lan() {
        let (provider, orchestrator, _log) = setup(MockProvider::named("Steam"));

        orchestrator.create_session(8, "Teams");
        orchestrator.find_sessions(50);

        assert!(!provider.last_settings.borrow().as_ref().unwrap().is_lan_match);
        assert!(!provider.last_search.borrow().as_ref().unwrap().is_lan_query);
    }

    #[test]
    fn test_create_over_existing_session_destroys_then_creates_once() {
        let (provider, orchestrator, log) =
            setup(MockProvider::named("NULL").with_existing(&[true]));

        orchestrator.create_session(4, "FreeForAll");
        assert_eq!(provider.calls(OperationKind::Destroy), 1);
        assert_eq!(provider.calls(OperationKind::Create), 0);
        let state = orchestrator.request_state();
        assert!(state.pending_recreate_after_destroy);
        assert_eq!(state.last_requested_public_connections, 4);
        assert_eq!(state.last_requested_match_type, "FreeForAll");
        assert!(orchestrator.is_in_flight(OperationKind::Create));

        provider.complete_destroy(true);
        assert_eq!(provider.calls(OperationKind::Create), 1);
        assert!(!orchestrator.request_state().pending_recreate_after_destroy);
        assert_eq!(*log.borrow(), vec![Seen::Destroy(true)]);

        provider.complete_create(true);
        assert_eq!(*log.borrow(), vec![Seen::Destroy(true), Seen::Create(true)]);
        assert_eq!(provider.calls(OperationKind::Destroy), 1);
        assert_eq!(provider.existence_checks.get(), 2);
    }

    #[test]
    fn test_recreate_recursion_is_bounded() {
        // The session reappears once: each destroy completion re-checks.
        let (provider, orchestrator, log) =
            setup(MockProvider::named("NULL").with_existing(&[true, true]));

        orchestrator.create_session(2, "Duel");
        provider.complete_destroy(true);

        // Nested create saw the session again and issued a second destroy.
        assert_eq!(provider.calls(OperationKind::Destroy), 2);
        assert_eq!(provider.calls(OperationKind::Create), 0);
        assert!(orchestrator.request_state().pending_recreate_after_destroy);

        provider.complete_destroy(true);
        assert_eq!(provider.calls(OperationKind::Destroy), 2);
        assert_eq!(provider.calls(OperationKind::Create), 1);
        assert!(!orchestrator.request_state().pending_recreate_after_destroy);

        provider.complete_create(true);
        let creates = log
            .borrow()
            .iter()
            .filter(|s| matches!(s, Seen::Create(_)))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn test_failed_forced_destroy_abandons_create() {
        let (provider, orchestrator, log) =
            setup(MockProvider::named("NULL").with_existing(&[true]));

        orchestrator.create_session(4, "FreeForAll");
        provider.complete_destroy(false);

        assert_eq!(provider.calls(OperationKind::Create), 0);
        assert!(!orchestrator.request_state().pending_recreate_after_destroy);
        assert!(!orchestrator.is_in_flight(OperationKind::Create));
        assert_eq!(*log.borrow(), vec![Seen::Destroy(false), Seen::Create(false)]);
    }

    #[test]
    fn test_rejected_forced_destroy_abandons_create() {
        let (provider, orchestrator, log) = setup(
            MockProvider::named("NULL")
                .with_existing(&[true])
                .rejecting(OperationKind::Destroy),
        );

        orchestrator.create_session(4, "FreeForAll");

        assert_eq!(provider.calls(OperationKind::Create), 0);
        assert!(!orchestrator.request_state().pending_recreate_after_destroy);
        assert_eq!(*log.borrow(), vec![Seen::Destroy(false), Seen::Create(false)]);
    }

    #[test]
    fn test_plain_destroy_does_not_create() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        orchestrator.destroy_session();
        provider.complete_destroy(true);

        assert_eq!(provider.calls(OperationKind::Create), 0);
        assert_eq!(*log.borrow(), vec![Seen::Destroy(true)]);
    }

    #[test]
    fn test_create_rejection_broadcasts_failure() {
        let (provider, orchestrator, log) =
            setup(MockProvider::named("NULL").rejecting(OperationKind::Create));

        orchestrator.create_session(4, "FreeForAll");

        assert_eq!(provider.calls(OperationKind::Create), 1);
        assert!(!orchestrator.is_in_flight(OperationKind::Create));
        assert_eq!(*log.borrow(), vec![Seen::Create(false)]);
    }

    #[test]
    fn test_find_builds_search_descriptor() {
        let (provider, orchestrator, _log) = setup(MockProvider::named("NULL"));

        orchestrator.find_sessions(10000);

        let search = provider.last_search.borrow().clone().unwrap();
        assert_eq!(search.max_search_results, 10000);
        assert!(search.is_lan_query);
        assert!(search.search_presence);
        assert_eq!(search.build_unique_id, 1);
    }

    #[test]
    fn test_find_empty_results_is_failure_even_if_provider_succeeded() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        orchestrator.find_sessions(10);
        provider.complete_find(FindSessionsOutcome {
            results: Vec::new(),
            success: true,
        });

        assert_eq!(*log.borrow(), vec![Seen::Find(0, false)]);
        assert!(orchestrator.last_search_results().is_empty());
    }

    #[test]
    fn test_find_results_delivered_with_provider_failure_flag() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        orchestrator.find_sessions(10);
        provider.complete_find(FindSessionsOutcome {
            results: vec![tagged("a", "A"), tagged("b", "B")],
            success: false,
        });

        assert_eq!(*log.borrow(), vec![Seen::Find(2, false)]);
        assert_eq!(orchestrator.last_search_results().len(), 2);
    }

    #[test]
    fn test_find_results_replace_previous_results() {
        let (provider, orchestrator, _log) = setup(MockProvider::named("NULL"));

        orchestrator.find_sessions(10);
        provider.complete_find(FindSessionsOutcome {
            results: vec![tagged("a", "A"), tagged("b", "B")],
            success: true,
        });
        orchestrator.find_sessions(10);
        provider.complete_find(FindSessionsOutcome {
            results: vec![tagged("c", "C")],
            success: true,
        });

        let results = orchestrator.last_search_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].session_id, "c");
    }

    #[test]
    fn test_find_rejection_broadcasts_empty_failure() {
        let (_provider, orchestrator, log) =
            setup(MockProvider::named("NULL").rejecting(OperationKind::Find));

        orchestrator.find_sessions(10);

        assert_eq!(*log.borrow(), vec![Seen::Find(0, false)]);
        assert!(!orchestrator.is_in_flight(OperationKind::Find));
    }

    #[test]
    fn test_failed_find_clears_previous_results() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        orchestrator.find_sessions(10);
        provider.complete_find(FindSessionsOutcome {
            results: vec![tagged("a", "A")],
            success: true,
        });
        assert_eq!(orchestrator.last_search_results().len(), 1);

        orchestrator.find_sessions(10);
        assert!(orchestrator.cancel(OperationKind::Find));
        assert!(orchestrator.last_search_results().is_empty());

        provider.complete_find(FindSessionsOutcome {
            results: vec![tagged("b", "B")],
            success: true,
        });
        assert!(orchestrator.last_search_results().is_empty());

        provider.reject.borrow_mut().insert(OperationKind::Find);
        orchestrator.find_sessions(10);
        assert!(orchestrator.last_search_results().is_empty());
        assert_eq!(
            *log.borrow(),
            vec![Seen::Find(1, true), Seen::Find(0, false), Seen::Find(0, false)]
        );
    }

    #[test]
    fn test_join_result_is_rebroadcast_verbatim() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        orchestrator.join_session(&tagged("host", "FreeForAll"));
        provider.complete_join(JoinResult::SessionIsFull);

        assert_eq!(*provider.joined.borrow(), vec!["host".to_string()]);
        assert_eq!(*log.borrow(), vec![Seen::Join(JoinResult::SessionIsFull)]);
    }

    #[test]
    fn test_join_rejection_is_unknown_error() {
        let (_provider, orchestrator, log) =
            setup(MockProvider::named("NULL").rejecting(OperationKind::Join));

        orchestrator.join_session(&tagged("host", "FreeForAll"));

        assert_eq!(*log.borrow(), vec![Seen::Join(JoinResult::UnknownError)]);
    }

    #[test]
    fn test_requests_without_provider_fail_synchronously() {
        let orchestrator = SessionOrchestrator::without_provider(OrchestratorConfig::default());
        let log = record_all(&orchestrator);

        orchestrator.join_session(&tagged("host", "FreeForAll"));
        assert_eq!(*log.borrow(), vec![Seen::Join(JoinResult::UnknownError)]);

        orchestrator.create_session(4, "FreeForAll");
        orchestrator.find_sessions(10);
        orchestrator.start_session();
        orchestrator.destroy_session();

        assert_eq!(
            *log.borrow(),
            vec![
                Seen::Join(JoinResult::UnknownError),
                Seen::Create(false),
                Seen::Find(0, false),
                Seen::Start(false),
                Seen::Destroy(false),
            ]
        );
        assert!(!orchestrator.has_provider());
        assert_eq!(orchestrator.resolved_connect_string(), None);
    }

    #[test]
    fn test_start_listeners_run_in_order_exactly_once() {
        let (provider, orchestrator, _log) = setup(MockProvider::named("NULL"));
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = Rc::clone(&order);
        orchestrator
            .events()
            .start_session_completed
            .subscribe(move |ok| o.borrow_mut().push(("first", *ok)));
        let o = Rc::clone(&order);
        orchestrator
            .events()
            .start_session_completed
            .subscribe(move |ok| o.borrow_mut().push(("second", *ok)));

        orchestrator.start_session();
        provider.complete_start(true);

        assert_eq!(*order.borrow(), vec![("first", true), ("second", true)]);
    }

    #[test]
    fn test_start_rejection_broadcasts_failure() {
        let (_provider, orchestrator, log) =
            setup(MockProvider::named("NULL").rejecting(OperationKind::Start));

        orchestrator.start_session();

        assert_eq!(*log.borrow(), vec![Seen::Start(false)]);
    }

    #[test]
    fn test_duplicate_request_is_dropped() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        orchestrator.find_sessions(10);
        orchestrator.find_sessions(10);
        assert_eq!(provider.calls(OperationKind::Find), 1);
        assert!(log.borrow().is_empty());

        provider.complete_find(FindSessionsOutcome {
            results: vec![tagged("a", "A")],
            success: true,
        });
        orchestrator.find_sessions(10);
        assert_eq!(provider.calls(OperationKind::Find), 2);
    }

    #[test]
    fn test_create_while_awaiting_forced_destroy_is_dropped() {
        let (provider, orchestrator, _log) =
            setup(MockProvider::named("NULL").with_existing(&[true]));

        orchestrator.create_session(4, "FreeForAll");
        orchestrator.create_session(8, "Teams");

        assert_eq!(provider.calls(OperationKind::Destroy), 1);
        assert_eq!(provider.existence_checks.get(), 1);

        provider.complete_destroy(true);
        let settings = provider.last_settings.borrow().clone().unwrap();
        assert_eq!(settings.num_public_connections, 4);
        assert_eq!(settings.match_type(), Some("FreeForAll"));
    }

    #[test]
    fn test_cancel_ignores_late_completion() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        orchestrator.find_sessions(10);
        assert!(orchestrator.cancel(OperationKind::Find));
        assert!(!orchestrator.is_in_flight(OperationKind::Find));
        assert_eq!(*log.borrow(), vec![Seen::Find(0, false)]);

        provider.complete_find(FindSessionsOutcome {
            results: vec![tagged("a", "A")],
            success: true,
        });
        assert_eq!(*log.borrow(), vec![Seen::Find(0, false)]);
        assert!(!orchestrator.cancel(OperationKind::Find));
    }

    #[test]
    fn test_late_completion_does_not_clear_newer_request() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        orchestrator.join_session(&tagged("old", "A"));
        orchestrator.cancel(OperationKind::Join);
        orchestrator.join_session(&tagged("new", "A"));

        // The abandoned join completes first; the newer one stays armed.
        provider.complete_join(JoinResult::Success);
        assert!(orchestrator.is_in_flight(OperationKind::Join));

        provider.complete_join(JoinResult::AlreadyInSession);
        assert_eq!(
            *log.borrow(),
            vec![
                Seen::Join(JoinResult::UnknownError),
                Seen::Join(JoinResult::AlreadyInSession),
            ]
        );
    }

    #[test]
    fn test_cancel_create_awaiting_forced_destroy() {
        let (provider, orchestrator, log) =
            setup(MockProvider::named("NULL").with_existing(&[true]));

        orchestrator.create_session(4, "FreeForAll");
        assert!(orchestrator.cancel(OperationKind::Create));
        assert_eq!(*log.borrow(), vec![Seen::Create(false)]);

        provider.complete_destroy(true);
        assert_eq!(provider.calls(OperationKind::Create), 0);
        assert_eq!(*log.borrow(), vec![Seen::Create(false), Seen::Destroy(true)]);
    }

    #[test]
    fn test_cancel_idle_kind_is_noop() {
        let (_provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        for kind in OperationKind::ALL {
            assert!(!orchestrator.cancel(kind));
        }
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_join_first_matching_picks_first() {
        let (provider, orchestrator, _log) = setup(MockProvider::named("NULL"));
        let results = vec![tagged("one", "A"), tagged("two", "B"), tagged("three", "A")];

        assert!(orchestrator.join_first_matching(&results, "A"));
        assert_eq!(*provider.joined.borrow(), vec!["one".to_string()]);

        provider.complete_join(JoinResult::Success);
        assert!(!orchestrator.join_first_matching(&results, "C"));
        assert_eq!(provider.calls(OperationKind::Join), 1);
    }

    #[test]
    fn test_join_first_matching_reports_dropped_duplicate() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));
        let results = vec![tagged("one", "A"), tagged("two", "A")];

        assert!(orchestrator.join_first_matching(&results, "A"));
        assert!(!orchestrator.join_first_matching(&results, "A"));
        assert_eq!(provider.calls(OperationKind::Join), 1);

        provider.complete_join(JoinResult::Success);
        assert_eq!(*log.borrow(), vec![Seen::Join(JoinResult::Success)]);
        assert!(orchestrator.join_first_matching(&results[1..], "A"));
        assert_eq!(
            *provider.joined.borrow(),
            vec!["one".to_string(), "two".to_string()]
        );
    }

    #[test]
    fn test_listener_can_issue_request_during_broadcast() {
        let (provider, orchestrator, log) = setup(MockProvider::named("NULL"));

        let handle = orchestrator.clone();
        orchestrator
            .events()
            .find_sessions_completed
            .subscribe(move |outcome| {
                handle.join_first_matching(&outcome.results, "FreeForAll");
            });

        orchestrator.find_sessions(10000);
        provider.complete_find(FindSessionsOutcome {
            results: vec![tagged("teams", "Teams"), tagged("ffa", "FreeForAll")],
            success: true,
        });

        assert_eq!(*provider.joined.borrow(), vec!["ffa".to_string()]);
        provider.complete_join(JoinResult::Success);
        assert_eq!(
            *log.borrow(),
            vec![Seen::Find(2, true), Seen::Join(JoinResult::Success)]
        );
        assert_eq!(
            orchestrator.resolved_connect_string(),
            Some("10.0.0.2:7777".to_string())
        );
    }

    #[test]
    fn test_completion_after_orchestrator_dropped_is_ignored() {
        let provider = Rc::new(MockProvider::named("NULL"));
        let orchestrator =
            SessionOrchestrator::new(provider.clone(), OrchestratorConfig::default());

        let log = record_all(&orchestrator);
        orchestrator.start_session();
        assert_eq!(Rc::strong_count(&log), 6);
        drop(orchestrator);

        // Dropping the orchestrator releases its listeners; the hook it left
        // with the provider still holds nothing alive.
        assert_eq!(Rc::strong_count(&log), 1);
        provider.complete_start(true);
        assert!(log.borrow().is_empty());
        assert_eq!(provider.calls(OperationKind::Start), 1);
        assert!(provider.start_hooks.borrow().is_empty());
    }
}
