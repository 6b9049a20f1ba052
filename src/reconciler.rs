//! `WorldStateReconciler`: local mirror of the entities around the player.
//!
//! Authoritative spawn/despawn/move events from the server are applied to
//! the entity table as they arrive.  The controlled entity additionally
//! moves optimistically on input; the next authoritative move for it
//! overwrites whatever was predicted.
//!
//! Lives on the same logical thread as the session (no locking); the
//! presentation layer only reads.

use std::collections::HashMap;
use std::time::Instant;

use crate::protocol::ServerEvent;
use crate::types::{Direction, Entity, MovementConfig, MovementPolicy, PendingLocalMove};

const DEFAULT_PLAYER_NAME: &str = "Player";
const DEFAULT_NPC_NAME: &str = "NPC";

#[derive(Debug, Default)]
pub struct WorldStateReconciler {
    entities: HashMap<String, Entity>,
    /// Id of the entity this client controls, once known.
    controlled: Option<String>,
    pending: Option<PendingLocalMove>,
    config: MovementConfig,
    last_accepted: Option<Instant>,
    /// Direction currently held down (edge-triggered policy only).
    held: Option<Direction>,
    /// `last_accepted` and `held` as they were before the pending move.
    before_pending: (Option<Instant>, Option<Direction>),
    corrections: u64,
}

impl WorldStateReconciler {
    pub fn new(config: MovementConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------
    // Authoritative updates
    // ------------------------------------------------------------------

    pub fn apply_spawn(&mut self, entity: Entity) {
        if entity.is_local {
            log::debug!("[reconciler] Controlling '{}'", entity.id);
            self.controlled = Some(entity.id.clone());
            self.pending = None;
        }
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn apply_despawn(&mut self, id: &str) {
        if self.entities.remove(id).is_none() {
            return;
        }
        if self.controlled.as_deref() == Some(id) {
            self.controlled = None;
            self.pending = None;
        }
    }

    /// Overwrite the position of a known entity.  Unknown ids are ignored.
    pub fn apply_move(&mut self, id: &str, tile_x: i32, tile_y: i32) {
        let Some(entity) = self.entities.get_mut(id) else {
            log::debug!("[reconciler] Move for unknown entity '{}' ignored", id);
            return;
        };
        entity.tile_x = tile_x;
        entity.tile_y = tile_y;

        if self.controlled.as_deref() == Some(id) {
            if let Some(pending) = self.pending.take() {
                if (pending.predicted_x, pending.predicted_y) != (tile_x, tile_y) {
                    self.corrections += 1;
                    log::debug!(
                        "[reconciler] Prediction ({}, {}) corrected to ({}, {})",
                        pending.predicted_x,
                        pending.predicted_y,
                        tile_x,
                        tile_y
                    );
                }
            }
        }
    }

    /// Apply one decoded server event.  Non-entity events are ignored.
    pub fn apply_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::AuthSuccess(auth) => self.apply_spawn(
                Entity::player(
                    auth.player_id.clone(),
                    auth.display_name.clone(),
                    auth.position.x,
                    auth.position.y,
                )
                .local(),
            ),
            ServerEvent::PlayerJoined(p) => self.apply_spawn(Entity::player(
                p.player_id.clone(),
                p.display_name.as_deref().unwrap_or(DEFAULT_PLAYER_NAME),
                p.x,
                p.y,
            )),
            ServerEvent::PlayerLeft(p) => self.apply_despawn(&p.player_id),
            ServerEvent::PlayerMoved(p) => self.apply_move(&p.player_id, p.x, p.y),
            ServerEvent::NpcSpawned(n) => self.apply_spawn(Entity::npc(
                n.npc_id.clone(),
                n.name.as_deref().unwrap_or(DEFAULT_NPC_NAME),
                n.x,
                n.y,
            )),
            ServerEvent::NpcDespawned(n) => self.apply_despawn(&n.npc_id),
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Local prediction
    // ------------------------------------------------------------------

    /// Handle a held movement key at time `now`.
    ///
    /// Returns the direction to send to the server, or `None` when the
    /// input is suppressed (cooldown, held key under the edge-triggered
    /// policy, or no controlled entity).  An accepted move is applied to
    /// the controlled entity immediately.
    pub fn predict_local_move(&mut self, direction: Direction, now: Instant) -> Option<Direction> {
        let id = self.controlled.clone()?;

        if self.config.policy == MovementPolicy::EdgeTriggered && self.held == Some(direction) {
            return None;
        }
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.config.cooldown() {
                return None;
            }
        }

        let entity = self.entities.get_mut(&id)?;
        let (dx, dy) = direction.offset();
        let (Some(x), Some(y)) = (entity.tile_x.checked_add(dx), entity.tile_y.checked_add(dy))
        else {
            log::warn!(
                "[reconciler] Move {} from ({}, {}) leaves the tile range",
                direction,
                entity.tile_x,
                entity.tile_y
            );
            return None;
        };
        entity.tile_x = x;
        entity.tile_y = y;

        self.before_pending = (self.last_accepted, self.held);
        self.pending = Some(PendingLocalMove {
            direction,
            predicted_x: entity.tile_x,
            predicted_y: entity.tile_y,
            issued_at: now,
        });
        self.last_accepted = Some(now);
        self.held = Some(direction);
        Some(direction)
    }

    /// Undo the outstanding prediction when its move never reached the
    /// server.  Returns whether there was one to undo.
    pub fn rollback_pending(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        (self.last_accepted, self.held) = self.before_pending;

        let controlled = self.controlled.as_deref();
        if let Some(entity) = controlled.and_then(|id| self.entities.get_mut(id)) {
            if entity.tile() == (pending.predicted_x, pending.predicted_y) {
                let (dx, dy) = pending.direction.offset();
                entity.tile_x = pending.predicted_x - dx;
                entity.tile_y = pending.predicted_y - dy;
            }
        }
        log::debug!("[reconciler] Rolled back unsent move {}", pending.direction);
        true
    }

    /// All movement keys released.
    pub fn release_input(&mut self) {
        self.held = None;
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn controlled(&self) -> Option<&Entity> {
        self.controlled.as_deref().and_then(|id| self.entities.get(id))
    }

    pub fn pending_move(&self) -> Option<&PendingLocalMove> {
        self.pending.as_ref()
    }

    /// Authoritative moves that disagreed with the outstanding prediction.
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    /// Reset all state (called on disconnect).
    pub fn clear(&mut self) {
        self.entities.clear();
        self.controlled = None;
        self.pending = None;
        self.last_accepted = None;
        self.held = None;
        self.before_pending = (None, None);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
