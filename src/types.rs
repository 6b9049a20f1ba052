//! Core types shared across all modules.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// World directory records
// ---------------------------------------------------------------------------

/// Advertised availability of a world server.
///
/// Decoded case-insensitively; anything unrecognised becomes `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum WorldStatus {
    #[default]
    Online,
    Full,
    Offline,
    Unknown,
}

impl From<String> for WorldStatus {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "online" => Self::Online,
            "full" => Self::Full,
            "offline" => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for WorldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Full => "full",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        };
        f.pad(s)
    }
}

/// Snapshot of one world as advertised in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldDescriptor {
    pub world_id: String,
    pub name: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub current_players: u32,
    #[serde(default)]
    pub max_players: u32,
    #[serde(default)]
    pub status: WorldStatus,
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Tile delta for one step.  North is `+y`.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Self::North => (0, 1),
            Self::South => (0, -1),
            Self::East => (1, 0),
            Self::West => (-1, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::North => "north",
            Self::South => "south",
            Self::East => "east",
            Self::West => "west",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "north" => Ok(Self::North),
            "south" => Ok(Self::South),
            "east" => Ok(Self::East),
            "west" => Ok(Self::West),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Npc,
}

/// A player or NPC in the local entity table.  Positions are tile
/// coordinates; pixel conversion belongs to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    pub display_name: String,
    pub tile_x: i32,
    pub tile_y: i32,
    pub is_local: bool,
    pub kind: EntityKind,
}

impl Entity {
    pub fn player(id: impl Into<String>, display_name: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            tile_x: x,
            tile_y: y,
            is_local: false,
            kind: EntityKind::Player,
        }
    }

    pub fn npc(id: impl Into<String>, display_name: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            kind: EntityKind::Npc,
            ..Self::player(id, display_name, x, y)
        }
    }

    /// Mark this entity as the one controlled by this client.
    pub fn local(mut self) -> Self {
        self.is_local = true;
        self
    }

    pub fn tile(&self) -> (i32, i32) {
        (self.tile_x, self.tile_y)
    }
}

/// The one outstanding optimistic move of the controlled entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingLocalMove {
    pub direction: Direction,
    pub predicted_x: i32,
    pub predicted_y: i32,
    pub issued_at: Instant,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Address of the key-value store advertising worlds.  Store
    /// implementations connect to it; the in-memory store only reports it.
    pub url: String,
    /// Key namespace holding world summaries (`<namespace><separator><id>`).
    pub namespace: String,
    pub separator: String,
    /// Connect attempts before the directory is declared unavailable.
    pub max_connect_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Upper bound on a single retry delay.
    pub backoff_cap_ms: u64,
}

impl DirectoryConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(20);
        let ms = self.backoff_base_ms.saturating_mul(factor).min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }

    /// Glob pattern matching every key in the namespace.
    pub fn key_pattern(&self) -> String {
        format!("{}{}*", self.namespace, self.separator)
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".into(),
            namespace: "world".into(),
            separator: ":".into(),
            max_connect_attempts: 4,
            backoff_base_ms: 100,
            backoff_cap_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Deadline for the transport to open.
    pub connect_timeout_ms: u64,
    /// Deadline for `authSuccess` after the auth frame is sent.
    pub auth_timeout_ms: u64,
    /// How many unclaimed lifecycle events to hold before dropping the oldest.
    pub event_buffer: usize,
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 5,
            connect_timeout_ms: 10_000,
            auth_timeout_ms: 10_000,
            event_buffer: 1024,
        }
    }
}

/// How held movement keys translate into server moves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementPolicy {
    /// A held key repeats once per cooldown.
    #[default]
    Cooldown,
    /// A direction is sent once per key press; the cooldown still applies.
    EdgeTriggered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Minimum time between accepted moves.
    pub cooldown_ms: u64,
    pub policy: MovementPolicy,
}

impl MovementConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 200,
            policy: MovementPolicy::Cooldown,
        }
    }
}
