//! Session wire protocol.
//!
//! This module owns **every message that crosses the session boundary**
//! between the client and a world server.  Frames are `(event name, JSON
//! payload)` pairs; this module turns them into typed values exactly once.
//!
//! ## Inbound (server → client)
//!
//! | Event              | Payload                                         |
//! |--------------------|-------------------------------------------------|
//! | `authSuccess`      | `{playerId, displayName, position: {x, y}}`     |
//! | `player:joined`    | `{playerId, displayName?, x?, y?}`              |
//! | `player:left`      | `{playerId}`                                    |
//! | `player:moved`     | `{playerId, x, y}`                              |
//! | `npc:spawned`      | `{npcId, name?, x?, y?}`                        |
//! | `npc:despawned`    | `{npcId}`                                       |
//! | `combat:update`    | opaque JSON                                     |
//! | `inventory:update` | opaque JSON                                     |
//! | `chat:message`     | `{message, sender?}`                            |
//! | `error`            | `{message}`                                     |
//!
//! ## Outbound (client → server)
//!
//! | Event  | Payload                                  |
//! |--------|------------------------------------------|
//! | `auth` | `{token}`, first frame after connect     |
//! | `move` | `{direction: north\|south\|east\|west}`  |
//!
//! All coordinates are tile coordinates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::Direction;

// ---------------------------------------------------------------------------
// Raw frame
// ---------------------------------------------------------------------------

/// One undecoded message as carried by the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePosition {
    pub x: i32,
    pub y: i32,
}

/// Sent once the server accepts the auth token.  Describes the entity this
/// client controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccess {
    pub player_id: String,
    pub display_name: String,
    pub position: TilePosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoined {
    pub player_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeft {
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMoved {
    pub player_id: String,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcSpawned {
    pub npc_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcDespawned {
    pub npc_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// Discriminant of [`ServerEvent`]; the key handlers are registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AuthSuccess,
    PlayerJoined,
    PlayerLeft,
    PlayerMoved,
    NpcSpawned,
    NpcDespawned,
    CombatUpdate,
    InventoryUpdate,
    ChatMessage,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        Self::AuthSuccess,
        Self::PlayerJoined,
        Self::PlayerLeft,
        Self::PlayerMoved,
        Self::NpcSpawned,
        Self::NpcDespawned,
        Self::CombatUpdate,
        Self::InventoryUpdate,
        Self::ChatMessage,
        Self::Error,
    ];

    /// Wire name of the event.
    pub fn name(self) -> &'static str {
        match self {
            Self::AuthSuccess => events::AUTH_SUCCESS,
            Self::PlayerJoined => events::PLAYER_JOINED,
            Self::PlayerLeft => events::PLAYER_LEFT,
            Self::PlayerMoved => events::PLAYER_MOVED,
            Self::NpcSpawned => events::NPC_SPAWNED,
            Self::NpcDespawned => events::NPC_DESPAWNED,
            Self::CombatUpdate => events::COMBAT_UPDATE,
            Self::InventoryUpdate => events::INVENTORY_UPDATE,
            Self::ChatMessage => events::CHAT_MESSAGE,
            Self::Error => events::ERROR,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Decoded inbound event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    AuthSuccess(AuthSuccess),
    PlayerJoined(PlayerJoined),
    PlayerLeft(PlayerLeft),
    PlayerMoved(PlayerMoved),
    NpcSpawned(NpcSpawned),
    NpcDespawned(NpcDespawned),
    CombatUpdate(Value),
    InventoryUpdate(Value),
    ChatMessage(ChatMessage),
    Error(ServerError),
}

impl ServerEvent {
    /// Decode a raw `(name, payload)` pair.
    pub fn decode(name: &str, payload: Value) -> Result<Self, ProtocolError> {
        let kind =
            EventKind::from_name(name).ok_or_else(|| ProtocolError::UnknownEvent(name.into()))?;
        let invalid = |source: serde_json::Error| ProtocolError::InvalidPayload {
            event: name.to_string(),
            source,
        };

        let event = match kind {
            EventKind::AuthSuccess => {
                Self::AuthSuccess(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::PlayerJoined => {
                Self::PlayerJoined(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::PlayerLeft => {
                Self::PlayerLeft(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::PlayerMoved => {
                Self::PlayerMoved(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::NpcSpawned => {
                Self::NpcSpawned(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::NpcDespawned => {
                Self::NpcDespawned(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::CombatUpdate => Self::CombatUpdate(payload),
            EventKind::InventoryUpdate => Self::InventoryUpdate(payload),
            EventKind::ChatMessage => {
                Self::ChatMessage(serde_json::from_value(payload).map_err(invalid)?)
            }
            // Servers sometimes send a bare string as the error payload.
            EventKind::Error => match payload {
                Value::String(message) => Self::Error(ServerError { message }),
                other => Self::Error(serde_json::from_value(other).map_err(invalid)?),
            },
        };
        Ok(event)
    }

    pub fn decode_frame(frame: Frame) -> Result<Self, ProtocolError> {
        Self::decode(&frame.event, frame.payload)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::AuthSuccess(_) => EventKind::AuthSuccess,
            Self::PlayerJoined(_) => EventKind::PlayerJoined,
            Self::PlayerLeft(_) => EventKind::PlayerLeft,
            Self::PlayerMoved(_) => EventKind::PlayerMoved,
            Self::NpcSpawned(_) => EventKind::NpcSpawned,
            Self::NpcDespawned(_) => EventKind::NpcDespawned,
            Self::CombatUpdate(_) => EventKind::CombatUpdate,
            Self::InventoryUpdate(_) => EventKind::InventoryUpdate,
            Self::ChatMessage(_) => EventKind::ChatMessage,
            Self::Error(_) => EventKind::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Auth(AuthRequest),
    Move(MoveRequest),
}

impl ClientCommand {
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth(AuthRequest {
            token: token.into(),
        })
    }

    pub fn move_to(direction: Direction) -> Self {
        Self::Move(MoveRequest { direction })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth(_) => events::AUTH,
            Self::Move(_) => events::MOVE,
        }
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let encode = |source: serde_json::Error| ProtocolError::Encode {
            command: self.name(),
            source,
        };
        let payload = match self {
            Self::Auth(req) => serde_json::to_value(req).map_err(encode)?,
            Self::Move(req) => serde_json::to_value(req).map_err(encode)?,
        };
        Ok(Frame::new(self.name(), payload))
    }
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Every event name used on the session channel, as constants.
pub mod events {
    pub const AUTH_SUCCESS: &str = "authSuccess";

    pub const PLAYER_JOINED: &str = "player:joined";
    pub const PLAYER_LEFT: &str = "player:left";
    pub const PLAYER_MOVED: &str = "player:moved";

    pub const NPC_SPAWNED: &str = "npc:spawned";
    pub const NPC_DESPAWNED: &str = "npc:despawned";

    pub const COMBAT_UPDATE: &str = "combat:update";
    pub const INVENTORY_UPDATE: &str = "inventory:update";
    pub const CHAT_MESSAGE: &str = "chat:message";
    pub const ERROR: &str = "error";

    /// Outbound.
    pub const AUTH: &str = "auth";
    pub const MOVE: &str = "move";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_names_round_trip_through_kind() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_name("player:teleported"), None);
    }

    #[test]
    fn decode_auth_success() {
        let ev = ServerEvent::decode(
            "authSuccess",
            json!({"playerId": "p1", "displayName": "Ayla", "position": {"x": 3, "y": -2}}),
        )
        .unwrap();
        assert_eq!(
            ev,
            ServerEvent::AuthSuccess(AuthSuccess {
                player_id: "p1".into(),
                display_name: "Ayla".into(),
                position: TilePosition { x: 3, y: -2 },
            })
        );
        assert_eq!(ev.kind(), EventKind::AuthSuccess);
    }

    #[test]
    fn decode_player_joined_with_missing_optionals() {
        let ev = ServerEvent::decode("player:joined", json!({"playerId": "p2"})).unwrap();
        match ev {
            ServerEvent::PlayerJoined(p) => {
                assert_eq!(p.player_id, "p2");
                assert_eq!(p.display_name, None);
                assert_eq!((p.x, p.y), (0, 0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_event_is_error() {
        let err = ServerEvent::decode("guild:invite", json!({})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent(name) if name == "guild:invite"));
    }

    #[test]
    fn decode_malformed_payload_is_error() {
        let err = ServerEvent::decode("player:moved", json!({"playerId": "p1", "x": "far"}))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { event, .. } if event == "player:moved"));
    }

    #[test]
    fn decode_error_accepts_bare_string() {
        let ev = ServerEvent::decode("error", json!("invalid token")).unwrap();
        assert_eq!(
            ev,
            ServerEvent::Error(ServerError {
                message: "invalid token".into()
            })
        );
    }

    #[test]
    fn opaque_payloads_pass_through() {
        let payload = json!({"attacker": "p1", "damage": 12});
        let ev = ServerEvent::decode("combat:update", payload.clone()).unwrap();
        assert_eq!(ev, ServerEvent::CombatUpdate(payload));
    }

    #[test]
    fn move_command_frame() {
        let frame = ClientCommand::move_to(Direction::North).to_frame().unwrap();
        assert_eq!(frame.event, "move");
        assert_eq!(frame.payload, json!({"direction": "north"}));
    }

    #[test]
    fn auth_command_frame() {
        let frame = ClientCommand::auth("demo-token").to_frame().unwrap();
        assert_eq!(frame, Frame::new("auth", json!({"token": "demo-token"})));
    }
}
