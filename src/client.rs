//! `GameClient`: wires discovery, the world session and the entity mirror
//! together the way a front-end drives them.
//!
//! ```text
//! refresh_worlds ─▶ join_world(id, token) ─▶ enter_world ─▶ loop { handle_input / pump }
//!                                                   │
//!                  buffered lifecycle events ◀──────┘ replayed into the reconciler
//! ```
//!
//! `join_world` and `enter_world` are separate steps: events that arrive
//! between authentication and the world view coming up are held by the
//! router and replayed when `enter_world` subscribes the reconciler.

use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::time::Instant;

use crate::config::ClientSettings;
use crate::directory::{world_address, DirectoryStore, WorldDirectoryClient};
use crate::error::ClientError;
use crate::protocol::{AuthSuccess, ClientCommand, EventKind, ServerEvent};
use crate::reconciler::WorldStateReconciler;
use crate::router::BUFFERED_KINDS;
use crate::session::{Channel, SessionConnection, SessionControl};
use crate::types::{ConnectionState, Direction, MovementConfig, WorldDescriptor};

pub struct GameClient<S, C> {
    directory: WorldDirectoryClient<S>,
    session: SessionConnection<C>,
    world: Rc<RefCell<WorldStateReconciler>>,
    current_world: Option<String>,
}

impl<S: DirectoryStore, C: Channel> GameClient<S, C> {
    pub fn new(
        directory: WorldDirectoryClient<S>,
        session: SessionConnection<C>,
        movement: MovementConfig,
    ) -> Self {
        Self {
            directory,
            session,
            world: Rc::new(RefCell::new(WorldStateReconciler::new(movement))),
            current_world: None,
        }
    }

    pub fn from_settings(store: S, channel: C, settings: &ClientSettings) -> Self {
        Self::new(
            WorldDirectoryClient::new(store, settings.directory.clone()),
            SessionConnection::new(channel, settings.session.clone()),
            settings.movement.clone(),
        )
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    pub async fn refresh_worlds(&mut self) -> Vec<WorldDescriptor> {
        self.directory.fetch_worlds().await
    }

    pub fn worlds(&self) -> &[WorldDescriptor] {
        self.directory.cached_worlds()
    }

    pub fn directory(&self) -> &WorldDirectoryClient<S> {
        &self.directory
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Connect to a world from the last refresh and authenticate.
    pub async fn join_world(
        &mut self,
        world_id: &str,
        token: &str,
    ) -> Result<AuthSuccess, ClientError> {
        let address = match self.directory.world(world_id) {
            Some(world) => world_address(world),
            None => {
                log::warn!("[client] Unknown world '{}'", world_id);
                return Err(ClientError::UnknownWorld(world_id.to_string()));
            }
        };

        let auth = self.session.connect(&address, token).await?;
        self.current_world = Some(world_id.to_string());
        Ok(auth)
    }

    /// Subscribe the entity mirror to lifecycle events.  Anything buffered
    /// since authentication is applied before this returns.
    pub fn enter_world(&mut self) -> usize {
        let mut replayed = 0;
        for kind in BUFFERED_KINDS {
            let world = self.world.clone();
            replayed += self
                .session
                .on(kind, move |event| world.borrow_mut().apply_event(&event));
        }
        log::info!(
            "[client] Entered world ({} buffered event(s) applied, {} entities)",
            replayed,
            self.world.borrow().entity_count()
        );
        replayed
    }

    /// Register an application handler.  Registering one of the lifecycle
    /// kinds replaces the entity mirror's subscription for that kind.
    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> usize
    where
        F: FnMut(ServerEvent) + 'static,
    {
        self.session.on(kind, handler)
    }

    /// Movement key held at `now`.  Returns whether a move was sent.
    ///
    /// Nothing is predicted unless the move can go out; a move the transport
    /// refuses is rolled back.
    pub async fn handle_input(&mut self, direction: Direction, now: Instant) -> bool {
        if !self.session.is_connected() {
            log::debug!(
                "[client] Ignoring '{}' input – session is {}",
                direction,
                self.session.state()
            );
            return false;
        }

        let accepted = self.world.borrow_mut().predict_local_move(direction, now);
        let Some(direction) = accepted else {
            return false;
        };
        if self.session.send(ClientCommand::move_to(direction)).await {
            return true;
        }
        self.world.borrow_mut().rollback_pending();
        false
    }

    pub fn release_input(&mut self) {
        self.world.borrow_mut().release_input();
    }

    /// Receive and apply one inbound event.  See [`SessionConnection::pump`].
    pub async fn pump(&mut self) -> Result<bool, ClientError> {
        match self.session.pump().await {
            Ok(live) => Ok(live),
            Err(e) => {
                self.world.borrow_mut().clear();
                self.current_world = None;
                Err(e.into())
            }
        }
    }

    /// Leave the current world.  The world list is kept.
    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
        self.world.borrow_mut().clear();
        if let Some(id) = self.current_world.take() {
            log::info!("[client] Left world '{}'", id);
        }
    }

    /// Leave the world and release the directory connection.
    pub async fn shutdown(&mut self) {
        self.disconnect().await;
        self.directory.disconnect().await;
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn control(&self) -> SessionControl {
        self.session.control()
    }

    pub fn current_world(&self) -> Option<&str> {
        self.current_world.as_deref()
    }

    pub fn session(&self) -> &SessionConnection<C> {
        &self.session
    }

    /// Borrow the entity mirror.  Do not hold across `pump`.
    pub fn world(&self) -> Ref<'_, WorldStateReconciler> {
        self.world.borrow()
    }
}
