//! Durable multicast events.
//!
//! Every subscriber receives every broadcast for the lifetime of the channel
//! (or until it unsubscribes). Listeners run synchronously, in subscription
//! order, on the broadcasting context.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::debug;

use crate::{FindSessionsOutcome, JoinResult};

/// Handle returned by [`Multicast::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Listener<T> = Rc<dyn Fn(&T)>;

/// Ordered list of listeners for one event kind.
pub struct Multicast<T> {
    name: &'static str,
    listeners: RefCell<Vec<(SubscriptionId, Listener<T>)>>,
    next_id: Cell<u64>,
}

impl<T> Multicast<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    /// Append a listener. It receives every later broadcast.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let listener: Listener<T> = Rc::new(listener);
        self.listeners.borrow_mut().push((id, listener));
        debug!("{}: subscribed listener {}", self.name, id.0);
        id
    }

    /// Remove a listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        let removed = listeners.len() != before;
        if removed {
            debug!("{}: unsubscribed listener {}", self.name, id.0);
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Invoke every listener with `payload`. No listeners is a no-op.
    ///
    /// The listener list is snapshotted first: listeners may subscribe,
    /// unsubscribe, or issue new requests while the broadcast runs. A listener
    /// added during a broadcast first hears the next one.
    pub fn broadcast(&self, payload: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();

        for listener in snapshot {
            listener(payload);
        }
    }
}

/// The five completion events an orchestrator exposes.
pub struct SessionEvents {
    pub create_session_completed: Multicast<bool>,
    pub find_sessions_completed: Multicast<FindSessionsOutcome>,
    pub join_session_completed: Multicast<JoinResult>,
    pub destroy_session_completed: Multicast<bool>,
    pub start_session_completed: Multicast<bool>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self {
            create_session_completed: Multicast::new("create_session_completed"),
            find_sessions_completed: Multicast::new("find_sessions_completed"),
            join_session_completed: Multicast::new("join_session_completed"),
            destroy_session_completed: Multicast::new("destroy_session_completed"),
            start_session_completed: Multicast::new("start_session_completed"),
        }
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
