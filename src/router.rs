//! `EventRouter`: delivers decoded server events to local handlers.
//!
//! One handler per [`EventKind`], last registration wins.  Events whose
//! kind has no handler yet are held back only when the kind is listed in
//! [`BUFFERED_KINDS`]; they are replayed in arrival order the moment a
//! handler for that kind registers.  Everything else unclaimed is dropped.

use std::collections::{HashMap, VecDeque};

use crate::protocol::{EventKind, ServerEvent};

/// Kinds whose loss before the world view subscribes would leave the
/// entity table out of sync with the server.
pub const BUFFERED_KINDS: [EventKind; 6] = [
    EventKind::AuthSuccess,
    EventKind::PlayerJoined,
    EventKind::PlayerLeft,
    EventKind::PlayerMoved,
    EventKind::NpcSpawned,
    EventKind::NpcDespawned,
];

pub type Handler = Box<dyn FnMut(ServerEvent)>;

pub struct EventRouter {
    handlers: HashMap<EventKind, Handler>,
    buffer: VecDeque<ServerEvent>,
    capacity: usize,
}

impl EventRouter {
    /// `capacity` bounds the number of held-back events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            buffer: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn is_buffered_kind(kind: EventKind) -> bool {
        BUFFERED_KINDS.contains(&kind)
    }

    /// Register `handler` for `kind`, replacing any previous one.
    ///
    /// Buffered events of that kind are replayed before this returns.
    /// Returns how many were replayed.
    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> usize
    where
        F: FnMut(ServerEvent) + 'static,
    {
        let mut handler: Handler = Box::new(handler);

        let mut replayed = 0;
        let mut kept = VecDeque::with_capacity(self.buffer.len());
        for event in self.buffer.drain(..) {
            if event.kind() == kind {
                handler(event);
                replayed += 1;
            } else {
                kept.push_back(event);
            }
        }
        self.buffer = kept;

        if replayed > 0 {
            log::debug!("[router] Replayed {} buffered '{}' event(s)", replayed, kind);
        }
        self.handlers.insert(kind, handler);
        replayed
    }

    /// Remove the handler for `kind`.  Returns whether one was registered.
    pub fn off(&mut self, kind: EventKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Deliver one event.
    pub fn dispatch(&mut self, event: ServerEvent) {
        let kind = event.kind();
        if let Some(handler) = self.handlers.get_mut(&kind) {
            handler(event);
            return;
        }

        if !Self::is_buffered_kind(kind) {
            log::debug!("[router] No handler for '{}' – dropping", kind);
            return;
        }

        if self.buffer.len() >= self.capacity {
            if let Some(oldest) = self.buffer.pop_front() {
                log::warn!(
                    "[router] Event buffer full – dropping oldest '{}'",
                    oldest.kind()
                );
            }
        }
        self.buffer.push_back(event);
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard held-back events (called when the session is torn down).
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("buffered", &self.buffer.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatMessage, PlayerJoined, PlayerLeft};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn joined(id: &str) -> ServerEvent {
        ServerEvent::PlayerJoined(PlayerJoined {
            player_id: id.into(),
            display_name: None,
            x: 0,
            y: 0,
        })
    }

    fn recorder() -> (Rc<RefCell<Vec<ServerEvent>>>, impl FnMut(ServerEvent)) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |ev| sink.borrow_mut().push(ev))
    }

    #[test]
    fn late_handler_receives_buffered_events_in_order_once() {
        let mut router = EventRouter::default();
        router.dispatch(joined("a"));
        router.dispatch(joined("b"));
        router.dispatch(joined("c"));
        assert_eq!(router.buffered_len(), 3);

        let (seen, handler) = recorder();
        assert_eq!(router.on(EventKind::PlayerJoined, handler), 3);
        assert_eq!(router.buffered_len(), 0);
        assert_eq!(*seen.borrow(), vec![joined("a"), joined("b"), joined("c")]);

        router.dispatch(joined("d"));
        assert_eq!(router.buffered_len(), 0);
        assert_eq!(seen.borrow().len(), 4);
        assert_eq!(seen.borrow()[3], joined("d"));
    }

    #[test]
    fn replay_only_touches_matching_kind() {
        let mut router = EventRouter::default();
        router.dispatch(joined("a"));
        router.dispatch(ServerEvent::PlayerLeft(PlayerLeft {
            player_id: "a".into(),
        }));

        let (seen, handler) = recorder();
        router.on(EventKind::PlayerJoined, handler);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(router.buffered_len(), 1);

        let (left, handler) = recorder();
        router.on(EventKind::PlayerLeft, handler);
        assert_eq!(left.borrow().len(), 1);
        assert_eq!(router.buffered_len(), 0);
    }

    #[test]
    fn non_lifecycle_events_are_dropped_when_unhandled() {
        let mut router = EventRouter::default();
        router.dispatch(ServerEvent::ChatMessage(ChatMessage {
            message: "hi".into(),
            sender: None,
        }));
        assert_eq!(router.buffered_len(), 0);

        let (seen, handler) = recorder();
        assert_eq!(router.on(EventKind::ChatMessage, handler), 0);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn last_registration_wins() {
        let mut router = EventRouter::default();
        let (first, h1) = recorder();
        let (second, h2) = recorder();
        router.on(EventKind::PlayerJoined, h1);
        router.on(EventKind::PlayerJoined, h2);

        router.dispatch(joined("x"));
        assert!(first.borrow().is_empty());
        assert_eq!(second.borrow().len(), 1);
    }

    #[test]
    fn off_resumes_buffering() {
        let mut router = EventRouter::default();
        let (seen, handler) = recorder();
        router.on(EventKind::PlayerJoined, handler);
        assert!(router.off(EventKind::PlayerJoined));
        assert!(!router.off(EventKind::PlayerJoined));

        router.dispatch(joined("z"));
        assert!(seen.borrow().is_empty());
        assert_eq!(router.buffered_len(), 1);
    }

    #[test]
    fn full_buffer_drops_oldest() {
        let mut router = EventRouter::new(2);
        router.dispatch(joined("a"));
        router.dispatch(joined("b"));
        router.dispatch(joined("c"));
        assert_eq!(router.buffered_len(), 2);

        let (seen, handler) = recorder();
        router.on(EventKind::PlayerJoined, handler);
        assert_eq!(*seen.borrow(), vec![joined("b"), joined("c")]);
    }
}
