//! Realm session core
//!
//! Client-side plumbing for a tile-based online world: find the advertised
//! world servers, hold one authenticated session to one of them, and keep a
//! local mirror of the entities it reports.
//!
//! ## Architecture
//!
//! ```text
//! GameClient  (client.rs)
//!   ├── WorldDirectoryClient  (directory.rs)  ← world discovery, address resolution
//!   ├── SessionConnection     (session.rs)    ← connect / auth / reconnect state machine
//!   │     └── EventRouter     (router.rs)     ← handlers + pre-subscription buffer
//!   └── WorldStateReconciler  (reconciler.rs) ← entity table, local prediction
//! ```
//!
//! Wire shapes live in `protocol.rs`; plain data and config structs in
//! `types.rs`.  Storage and transport are behind the [`DirectoryStore`] and
//! [`Channel`] traits; `testing.rs` carries in-process implementations.
//!
//! Everything runs on a single logical thread (`Rc`/`RefCell`, no locks).
//! Drive it from a current-thread tokio runtime or `tokio_test::block_on`.

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod reconciler;
pub mod router;
pub mod session;
pub mod testing;
pub mod types;

pub use client::GameClient;
pub use crate::config::ClientSettings;
pub use directory::{world_address, DirectoryStore, MemoryDirectoryStore, WorldDirectoryClient};
pub use error::{ClientError, DirectoryError, ProtocolError, SessionError, StoreError, TransportError};
pub use protocol::{ClientCommand, EventKind, Frame, ServerEvent};
pub use reconciler::WorldStateReconciler;
pub use router::EventRouter;
pub use session::{Channel, ChannelEvent, SessionConnection, SessionControl};
pub use types::{
    ConnectionState, Direction, DirectoryConfig, Entity, EntityKind, MovementConfig,
    MovementPolicy, SessionConfig, WorldDescriptor, WorldStatus,
};
