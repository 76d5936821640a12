//! Matchlobby Menu Controller
//!
//! Headless host/join menu. It turns button presses into orchestrator
//! requests and reacts to the orchestrator's completion events:
//! - Host: create a session, then travel to the lobby as a listen server
//! - Join: search, join the first session with our match type, then travel
//!   to the host
//!
//! A button is disabled while its request is outstanding and re-enabled when
//! the request ends without travel.
//!
//! Travel is a side effect owned by the embedding application, injected
//! through [`Travel`].

#![deny(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, info, warn};
use matchlobby_session::{
    FindSessionsOutcome, JoinResult, Multicast, SessionOrchestrator, SubscriptionId,
};

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_NUM_PUBLIC_CONNECTIONS: u32 = 4;

pub const DEFAULT_MATCH_TYPE: &str = "FreeForAll";

pub const DEFAULT_LOBBY_PATH: &str = "/Game/ThirdPerson/Maps/Lobby";

/// Search cap used by the join button.
pub const DEFAULT_MAX_SEARCH_RESULTS: u32 = 10000;

/// Menu configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuConfig {
    pub num_public_connections: u32,
    pub match_type: String,
    pub lobby_path: String,
    pub max_search_results: u32,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            num_public_connections: DEFAULT_NUM_PUBLIC_CONNECTIONS,
            match_type: DEFAULT_MATCH_TYPE.to_string(),
            lobby_path: DEFAULT_LOBBY_PATH.to_string(),
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
        }
    }
}

impl MenuConfig {
    /// Lobby URL the host travels to, opened as a listen server.
    pub fn lobby_travel_url(&self) -> String {
        format!("{}?listen", self.lobby_path)
    }
}

// ============================================================================
// Travel
// ============================================================================

/// Travel side effects triggered by the menu.
pub trait Travel {
    /// Host: load `url` and accept connections.
    fn server_travel(&self, url: &str);

    /// Client: connect to the host at `address`.
    fn client_travel(&self, address: &str);
}

// ============================================================================
// Menu Controller
// ============================================================================

struct Subscriptions {
    create: SubscriptionId,
    find: SubscriptionId,
    join: SubscriptionId,
    destroy: SubscriptionId,
    start: SubscriptionId,
}

/// Host/join menu bound to one orchestrator.
///
/// Listeners hold the menu weakly; dropping the menu tears it down.
pub struct MenuController {
    orchestrator: SessionOrchestrator,
    config: MenuConfig,
    travel: Rc<dyn Travel>,
    host_enabled: Cell<bool>,
    join_enabled: Cell<bool>,
    subscriptions: RefCell<Option<Subscriptions>>,
}

impl MenuController {
    /// Build the menu and subscribe it to every completion event.
    pub fn setup(
        orchestrator: SessionOrchestrator,
        config: MenuConfig,
        travel: Rc<dyn Travel>,
    ) -> Rc<Self> {
        let menu = Rc::new(Self {
            orchestrator,
            config,
            travel,
            host_enabled: Cell::new(true),
            join_enabled: Cell::new(true),
            subscriptions: RefCell::new(None),
        });

        let events = menu.orchestrator.events();
        let subscriptions = Subscriptions {
            create: listen(&events.create_session_completed, &menu, Self::on_create_session),
            find: listen(&events.find_sessions_completed, &menu, Self::on_find_sessions),
            join: listen(&events.join_session_completed, &menu, Self::on_join_session),
            destroy: listen(&events.destroy_session_completed, &menu, Self::on_destroy_session),
            start: listen(&events.start_session_completed, &menu, Self::on_start_session),
        };
        *menu.subscriptions.borrow_mut() = Some(subscriptions);

        info!(
            "menu ready: connections={} match_type={} lobby={}",
            menu.config.num_public_connections,
            menu.config.match_type,
            menu.config.lobby_travel_url()
        );
        menu
    }

    pub fn config(&self) -> &MenuConfig {
        &self.config
    }

    pub fn is_host_enabled(&self) -> bool {
        self.host_enabled.get()
    }

    pub fn is_join_enabled(&self) -> bool {
        self.join_enabled.get()
    }

    pub fn host_clicked(&self) {
        self.host_enabled.set(false);
        self.orchestrator
            .create_session(self.config.num_public_connections, &self.config.match_type);
    }

    pub fn join_clicked(&self) {
        self.join_enabled.set(false);
        self.orchestrator
            .find_sessions(self.config.max_search_results);
    }

    /// Unsubscribe from the orchestrator. Idempotent.
    pub fn teardown(&self) {
        let Some(subs) = self.subscriptions.borrow_mut().take() else {
            return;
        };
        let events = self.orchestrator.events();
        events.create_session_completed.unsubscribe(subs.create);
        events.find_sessions_completed.unsubscribe(subs.find);
        events.join_session_completed.unsubscribe(subs.join);
        events.destroy_session_completed.unsubscribe(subs.destroy);
        events.start_session_completed.unsubscribe(subs.start);
        debug!("menu torn down");
    }

    fn on_create_session(&self, success: &bool) {
        if *success {
            self.travel.server_travel(&self.config.lobby_travel_url());
        } else {
            self.host_enabled.set(true);
        }
    }

    fn on_find_sessions(&self, outcome: &FindSessionsOutcome) {
        if !self
            .orchestrator
            .join_first_matching(&outcome.results, &self.config.match_type)
        {
            self.join_enabled.set(true);
        }
    }

    fn on_join_session(&self, result: &JoinResult) {
        if !result.is_success() {
            self.join_enabled.set(true);
            return;
        }
        match self.orchestrator.resolved_connect_string() {
            Some(address) => self.travel.client_travel(&address),
            None => {
                warn!("joined but the host address did not resolve");
                self.join_enabled.set(true);
            }
        }
    }

    fn on_destroy_session(&self, success: &bool) {
        debug!("session destroyed: success={success}");
    }

    fn on_start_session(&self, success: &bool) {
        if *success {
            info!("Session started");
        } else {
            warn!("Session failed to start");
        }
    }
}

impl Drop for MenuController {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn listen<T: 'static>(
    channel: &Multicast<T>,
    menu: &Rc<MenuController>,
    handler: fn(&MenuController, &T),
) -> SubscriptionId {
    let weak = Rc::downgrade(menu);
    channel.subscribe(move |payload| {
        if let Some(menu) = weak.upgrade() {
            handler(&menu, payload);
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
