//! `SessionConnection`: one authenticated channel to a world server.
//!
//! ## State machine
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──open──▶ Authenticating ──authSuccess──▶ Connected
//!       ▲                                                ▲                            │
//!       │                                                │ open                 transport lost
//!       │                                                └──────── Reconnecting ◀─────┘
//!       └──────────── disconnect (from any state) / reconnect attempts exhausted
//! ```
//!
//! ## Threading model
//!
//! Everything runs on one logical thread.  The connection owns the channel
//! and is driven through `&mut self`; a cloneable [`SessionControl`] shares
//! only the state cell and a cancellation signal (`Rc` + `Cell` + `Notify`),
//! so the UI can abandon an attempt that is still suspended.  Each explicit
//! disconnect bumps an epoch; work started under an older epoch is stale and
//! its result is discarded.
//!
//! ## Outbound policy
//!
//! Commands issued while not `Connected` are dropped with a warning.  They
//! are never queued: a movement command replayed after a reconnect would be
//! wrong.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{ProtocolError, SessionError, TransportError};
use crate::protocol::{AuthSuccess, ClientCommand, EventKind, Frame, ServerEvent};
use crate::router::EventRouter;
use crate::types::{ConnectionState, SessionConfig};

// ---------------------------------------------------------------------------
// Channel trait (transport seam)
// ---------------------------------------------------------------------------

/// Something the transport reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Frame(Frame),
    /// The transport is gone; `reason` is human-readable.
    Closed { reason: String },
}

/// Bidirectional message channel to a world server.
///
/// Framing, encryption and low-level keep-alive belong to the
/// implementation.  `open` may be called again after `Closed` or `close`.
#[allow(async_fn_in_trait)]
pub trait Channel {
    async fn open(&mut self, address: &str) -> Result<(), TransportError>;

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Next inbound event, in transport order.
    async fn recv(&mut self) -> ChannelEvent;

    async fn close(&mut self);
}

// ---------------------------------------------------------------------------
// Shared state + control handle
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Shared {
    state: Cell<ConnectionState>,
    epoch: Cell<u64>,
    lost: Cell<bool>,
    cancel: Notify,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.replace(next);
        if prev != next {
            log::debug!("[session] {} → {}", prev, next);
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.get() == epoch
    }

    fn request_disconnect(&self) {
        self.epoch.set(self.epoch.get().wrapping_add(1));
        self.set_state(ConnectionState::Disconnected);
        self.cancel.notify_waiters();
    }
}

/// Cloneable handle for observing the session and abandoning it from
/// outside the task that drives it.
#[derive(Debug, Clone)]
pub struct SessionControl {
    shared: Rc<Shared>,
}

impl SessionControl {
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnection gave up since the last successful connect.
    pub fn connection_lost(&self) -> bool {
        self.shared.lost.get()
    }

    /// Move to `Disconnected` now.  An in-flight connect resolves with
    /// [`SessionError::Cancelled`]; the channel is closed by the owner on
    /// its next call.
    pub fn disconnect(&self) {
        log::info!("[session] Disconnect requested");
        self.shared.request_disconnect();
    }
}

// ---------------------------------------------------------------------------
// Bounded / cancellable waits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Await `fut` unless the epoch moves on or `limit` elapses.
async fn guarded<F: Future>(
    shared: &Shared,
    epoch: u64,
    limit: Option<Duration>,
    fut: F,
) -> Result<F::Output, Interrupt> {
    if !shared.is_current(epoch) {
        return Err(Interrupt::Cancelled);
    }
    let cancelled = shared.cancel.notified();

    let out = match limit {
        Some(limit) => tokio::select! {
            res = tokio::time::timeout(limit, fut) => res.map_err(|_| Interrupt::TimedOut),
            _ = cancelled => Err(Interrupt::Cancelled),
        },
        None => tokio::select! {
            res = fut => Ok(res),
            _ = cancelled => Err(Interrupt::Cancelled),
        },
    };

    if !shared.is_current(epoch) {
        return Err(Interrupt::Cancelled);
    }
    out
}

/// Resets the state if a connect future is dropped half-way.
struct AttemptGuard {
    shared: Rc<Shared>,
    epoch: u64,
    armed: bool,
}

impl AttemptGuard {
    fn new(shared: Rc<Shared>, epoch: u64) -> Self {
        Self {
            shared,
            epoch,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if self.armed && self.shared.is_current(self.epoch) {
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConnection
// ---------------------------------------------------------------------------

pub struct SessionConnection<C> {
    channel: C,
    router: EventRouter,
    config: SessionConfig,
    shared: Rc<Shared>,
    /// Where and how to re-authenticate after a transport loss.
    address: Option<String>,
    token: Option<String>,
    /// The channel has been opened and not yet closed by us.
    channel_open: bool,
}

impl<C: Channel> SessionConnection<C> {
    pub fn new(channel: C, config: SessionConfig) -> Self {
        Self {
            channel,
            router: EventRouter::new(config.event_buffer),
            config,
            shared: Rc::new(Shared::default()),
            address: None,
            token: None,
            channel_open: false,
        }
    }

    pub fn control(&self) -> SessionControl {
        SessionControl {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn connection_lost(&self) -> bool {
        self.shared.lost.get()
    }

    /// Address of the most recent connect.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    // ------------------------------------------------------------------
    // Handler registration (delegated to the router)
    // ------------------------------------------------------------------

    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> usize
    where
        F: FnMut(ServerEvent) + 'static,
    {
        self.router.on(kind, handler)
    }

    pub fn off(&mut self, kind: EventKind) -> bool {
        self.router.off(kind)
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    // ------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------

    /// Open the channel, authenticate with `token`, and resolve with the
    /// server's `authSuccess` payload.
    pub async fn connect(
        &mut self,
        address: &str,
        token: &str,
    ) -> Result<AuthSuccess, SessionError> {
        let current = self.state();
        if current != ConnectionState::Disconnected {
            return Err(SessionError::AlreadyConnected(current));
        }
        self.close_stale_channel().await;

        let epoch = self.shared.epoch.get();
        let mut guard = AttemptGuard::new(self.shared.clone(), epoch);

        self.address = Some(address.to_string());
        self.token = Some(token.to_string());
        self.shared.lost.set(false);
        self.shared.set_state(ConnectionState::Connecting);
        log::info!("[session] Connecting to {}", address);

        let result = self.establish(address, token, epoch).await;
        guard.disarm();

        match result {
            Ok(auth) => {
                self.shared.set_state(ConnectionState::Connected);
                log::info!(
                    "[session] Authenticated as '{}' ({})",
                    auth.display_name,
                    auth.player_id
                );
                self.router.dispatch(ServerEvent::AuthSuccess(auth.clone()));
                Ok(auth)
            }
            Err(e) => {
                log::warn!("[session] Connect to {} failed: {}", address, e);
                self.close_channel().await;
                if self.shared.is_current(epoch) {
                    self.shared.set_state(ConnectionState::Disconnected);
                }
                Err(e)
            }
        }
    }

    async fn establish(
        &mut self,
        address: &str,
        token: &str,
        epoch: u64,
    ) -> Result<AuthSuccess, SessionError> {
        let opened = guarded(
            &self.shared,
            epoch,
            Some(self.config.connect_timeout()),
            self.channel.open(address),
        )
        .await;
        match opened {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SessionError::Connection(e)),
            Err(Interrupt::Cancelled) => return Err(SessionError::Cancelled),
            Err(Interrupt::TimedOut) => return Err(SessionError::Timeout("opening the channel")),
        }
        self.channel_open = true;

        self.shared.set_state(ConnectionState::Authenticating);
        self.authenticate(token, epoch).await
    }

    /// Send the auth frame and wait for the verdict.  Anything else that
    /// arrives first is routed as usual.
    async fn authenticate(&mut self, token: &str, epoch: u64) -> Result<AuthSuccess, SessionError> {
        let frame = ClientCommand::auth(token).to_frame()?;
        let sent = guarded(
            &self.shared,
            epoch,
            Some(self.config.connect_timeout()),
            self.channel.send(frame),
        )
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SessionError::Connection(e)),
            Err(Interrupt::Cancelled) => return Err(SessionError::Cancelled),
            Err(Interrupt::TimedOut) => return Err(SessionError::Timeout("sending credentials")),
        }

        let deadline = tokio::time::Instant::now() + self.config.auth_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = match guarded(&self.shared, epoch, Some(remaining), self.channel.recv()).await
            {
                Ok(event) => event,
                Err(Interrupt::Cancelled) => return Err(SessionError::Cancelled),
                Err(Interrupt::TimedOut) => {
                    return Err(SessionError::Timeout("waiting for authentication"))
                }
            };

            match event {
                ChannelEvent::Closed { reason } => {
                    self.channel_open = false;
                    return Err(SessionError::Connection(TransportError::Closed(reason)));
                }
                ChannelEvent::Frame(frame) => match decode_inbound(frame) {
                    Some(ServerEvent::AuthSuccess(auth)) => return Ok(auth),
                    Some(ServerEvent::Error(err)) => return Err(SessionError::Auth(err.message)),
                    Some(other) => self.router.dispatch(other),
                    None => {}
                },
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Hand `command` to the transport.  Returns `false` (after logging)
    /// when it was dropped.
    pub async fn send(&mut self, command: ClientCommand) -> bool {
        let state = self.state();
        if state != ConnectionState::Connected {
            log::warn!(
                "[session] Cannot send '{}' – session is {}",
                command.name(),
                state
            );
            return false;
        }

        let frame = match command.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[session] {}", e);
                return false;
            }
        };
        match self.channel.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[session] Failed to send '{}': {}", command.name(), e);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Receive and dispatch one inbound event.
    ///
    /// Returns `Ok(false)` once the session is no longer connected (explicit
    /// disconnect included).  A transport loss triggers the reconnection
    /// policy before this returns.
    pub async fn pump(&mut self) -> Result<bool, SessionError> {
        if self.state() != ConnectionState::Connected {
            self.close_stale_channel().await;
            return Ok(false);
        }

        let epoch = self.shared.epoch.get();
        let event = match guarded(&self.shared, epoch, None, self.channel.recv()).await {
            Ok(event) => event,
            Err(_) => {
                self.close_stale_channel().await;
                return Ok(false);
            }
        };

        match event {
            ChannelEvent::Frame(frame) => {
                if let Some(event) = decode_inbound(frame) {
                    self.router.dispatch(event);
                }
                Ok(true)
            }
            ChannelEvent::Closed { reason } => {
                log::warn!("[session] Transport lost: {}", reason);
                self.channel_open = false;
                self.reconnect(epoch).await
            }
        }
    }

    /// Pump until the session ends.  `Ok(())` after an explicit disconnect.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        while self.pump().await? {}
        Ok(())
    }

    async fn reconnect(&mut self, epoch: u64) -> Result<bool, SessionError> {
        self.shared.set_state(ConnectionState::Reconnecting);

        let (Some(address), Some(token)) = (self.address.clone(), self.token.clone()) else {
            self.shared.set_state(ConnectionState::Disconnected);
            return Err(SessionError::ConnectionLost { attempts: 0 });
        };

        let max_attempts = self.config.max_reconnect_attempts;
        for attempt in 1..=max_attempts {
            let delay = self.config.reconnect_delay();
            if guarded(&self.shared, epoch, None, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                return Ok(false);
            }

            log::info!(
                "[session] Reconnect attempt {}/{} to {}",
                attempt,
                max_attempts,
                address
            );
            let opened = guarded(
                &self.shared,
                epoch,
                Some(self.config.connect_timeout()),
                self.channel.open(&address),
            )
            .await;
            match opened {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("[session] Reconnect attempt {} failed: {}", attempt, e);
                    continue;
                }
                Err(Interrupt::TimedOut) => {
                    log::warn!("[session] Reconnect attempt {} timed out", attempt);
                    continue;
                }
                Err(Interrupt::Cancelled) => return Ok(false),
            }
            self.channel_open = true;

            self.shared.set_state(ConnectionState::Authenticating);
            match self.authenticate(&token, epoch).await {
                Ok(auth) => {
                    self.shared.set_state(ConnectionState::Connected);
                    log::info!("[session] Reconnected as '{}'", auth.player_id);
                    self.router.dispatch(ServerEvent::AuthSuccess(auth));
                    return Ok(true);
                }
                Err(SessionError::Cancelled) => {
                    self.close_channel().await;
                    return Ok(false);
                }
                Err(SessionError::Auth(message)) => {
                    log::error!("[session] Re-authentication rejected: {}", message);
                    self.close_channel().await;
                    self.shared.set_state(ConnectionState::Disconnected);
                    return Err(SessionError::Auth(message));
                }
                Err(e) => {
                    log::warn!("[session] Reconnect attempt {} failed: {}", attempt, e);
                    self.close_channel().await;
                    self.shared.set_state(ConnectionState::Reconnecting);
                }
            }
        }

        log::error!(
            "[session] Connection lost – giving up after {} reconnect attempt(s)",
            max_attempts
        );
        self.shared.lost.set(true);
        self.shared.set_state(ConnectionState::Disconnected);
        Err(SessionError::ConnectionLost {
            attempts: max_attempts,
        })
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Close the channel and return to `Disconnected`.  Always succeeds.
    pub async fn disconnect(&mut self) {
        self.shared.request_disconnect();
        self.close_channel().await;
        self.router.clear_buffer();
        log::info!("[session] Disconnected");
    }

    async fn close_channel(&mut self) {
        if self.channel_open {
            self.channel.close().await;
            self.channel_open = false;
        }
    }

    /// Finish a disconnect requested through [`SessionControl`].
    async fn close_stale_channel(&mut self) {
        if self.channel_open && self.state() == ConnectionState::Disconnected {
            self.close_channel().await;
            self.router.clear_buffer();
        }
    }
}

impl<C> std::fmt::Debug for SessionConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConnection")
            .field("state", &self.shared.state())
            .field("address", &self.address)
            .field("channel_open", &self.channel_open)
            .field("router", &self.router)
            .finish()
    }
}

/// Decode at the boundary; bad frames are logged and absorbed.
fn decode_inbound(frame: Frame) -> Option<ServerEvent> {
    match ServerEvent::decode_frame(frame) {
        Ok(event) => Some(event),
        Err(ProtocolError::UnknownEvent(name)) => {
            log::debug!("[session] Ignoring unknown event '{}'", name);
            None
        }
        Err(e) => {
            log::warn!("[session] Dropping frame: {}", e);
            None
        }
    }
}
