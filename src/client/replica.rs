//! Client-side replica of the room, rebuilt from broadcast envelopes.
//!
//! Delivery may duplicate or reorder envelopes. Every piece of replicated
//! state (an avatar, a door, the item slot of a tile, the turn) remembers the
//! sequence number it was last written at, and an envelope only applies to a
//! key if it is newer. The last authoritative state therefore wins no matter
//! the arrival order.

use std::collections::HashMap;

use crate::game::board_store::BoardTemplate;
use crate::game::events::{Envelope, ServerEvent};
use crate::game::types::{DoorState, ItemKind, PlayerId, Position, TerrainKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Avatar(PlayerId),
    Door(Position),
    Item(Position),
    Turn,
    Budget,
}

#[derive(Debug, Default)]
pub struct ClientReplica {
    me: PlayerId,
    board: Option<BoardTemplate>,
    positions: HashMap<PlayerId, Position>,
    doors: HashMap<Position, DoorState>,
    items: HashMap<Position, Option<ItemKind>>,
    current_turn: Option<PlayerId>,
    remaining: i32,
    written_at: HashMap<Key, u64>,
    predicted: Option<Position>,
    winners: Option<Vec<PlayerId>>,
}

impl ClientReplica {
    pub fn new(me: &str) -> Self {
        ClientReplica {
            me: me.to_string(),
            ..Default::default()
        }
    }

    /// Writes `key` at `seq` if nothing newer was written yet.
    fn claim(&mut self, key: Key, seq: u64) -> bool {
        match self.written_at.get(&key) {
            Some(&at) if at >= seq => false,
            _ => {
                self.written_at.insert(key, seq);
                true
            }
        }
    }

    /// Applies one envelope. Returns `false` for duplicates and for
    /// envelopes older than the state they would overwrite. Events that
    /// carry no replicated state always apply.
    pub fn apply(&mut self, env: &Envelope) -> bool {
        let seq = env.seq;
        match &env.event {
            ServerEvent::MatchStarted { board, spawns, .. } => {
                let mut applied = false;
                for (r, row) in board.tiles.iter().enumerate() {
                    for (c, tile) in row.iter().enumerate() {
                        let pos = Position::new(r, c);
                        if self.claim(Key::Item(pos), seq) {
                            self.items.insert(pos, tile.item);
                            applied = true;
                        }
                        if tile.terrain.is_door() && self.claim(Key::Door(pos), seq) {
                            let state = if tile.terrain == TerrainKind::DoorOpen {
                                DoorState::Open
                            } else {
                                DoorState::Closed
                            };
                            self.doors.insert(pos, state);
                        }
                    }
                }
                for spawn in spawns {
                    if self.claim(Key::Avatar(spawn.player_id.clone()), seq) {
                        self.positions.insert(spawn.player_id.clone(), spawn.position);
                        applied = true;
                    }
                }
                if applied {
                    self.board = Some(board.clone());
                }
                applied
            }
            ServerEvent::PlayerMoved {
                player_id,
                new_position,
                ..
            } => {
                if !self.claim(Key::Avatar(player_id.clone()), seq) {
                    return false;
                }
                if player_id == &self.me {
                    self.predicted = None;
                }
                self.positions.insert(player_id.clone(), *new_position);
                true
            }
            ServerEvent::PlayerRemoved { player_id } => {
                if !self.claim(Key::Avatar(player_id.clone()), seq) {
                    return false;
                }
                self.positions.remove(player_id);
                true
            }
            ServerEvent::DoorToggled {
                tile_position,
                new_state,
            } => {
                if !self.claim(Key::Door(*tile_position), seq) {
                    return false;
                }
                self.doors.insert(*tile_position, *new_state);
                true
            }
            ServerEvent::ItemPickedUp { position, .. } => {
                if !self.claim(Key::Item(*position), seq) {
                    return false;
                }
                self.items.insert(*position, None);
                true
            }
            ServerEvent::ItemDropped { item, position } => {
                if !self.claim(Key::Item(*position), seq) {
                    return false;
                }
                self.items.insert(*position, Some(*item));
                true
            }
            ServerEvent::TurnStarted { player_id, speed } => {
                if !self.claim(Key::Turn, seq) {
                    return false;
                }
                self.current_turn = Some(player_id.clone());
                if self.claim(Key::Budget, seq) {
                    self.remaining = *speed;
                }
                true
            }
            ServerEvent::MovementBudget { remaining, .. } => {
                if !self.claim(Key::Budget, seq) {
                    return false;
                }
                self.remaining = *remaining;
                true
            }
            ServerEvent::IntentRejected { .. } | ServerEvent::MovementHalted { .. } => {
                self.predicted = None;
                true
            }
            ServerEvent::MatchEnded { winners } => {
                self.winners = Some(winners.clone());
                true
            }
            _ => true,
        }
    }

    /// Shows the local avatar at `destination` until the server confirms or
    /// rejects the move.
    pub fn predict_move(&mut self, destination: Position) {
        self.predicted = Some(destination);
    }

    pub fn position(&self, player_id: &str) -> Option<Position> {
        if player_id == self.me {
            if let Some(p) = self.predicted {
                return Some(p);
            }
        }
        self.positions.get(player_id).copied()
    }

    pub fn authoritative_position(&self, player_id: &str) -> Option<Position> {
        self.positions.get(player_id).copied()
    }

    pub fn occupant_at(&self, pos: Position) -> Option<&str> {
        self.positions
            .iter()
            .find(|(_, p)| **p == pos)
            .map(|(id, _)| id.as_str())
    }

    pub fn door(&self, pos: Position) -> Option<DoorState> {
        self.doors.get(&pos).copied()
    }

    pub fn item(&self, pos: Position) -> Option<ItemKind> {
        self.items
            .get(&pos)
            .copied()
            .flatten()
            .filter(|i| i.is_collectible())
    }

    pub fn current_turn(&self) -> Option<&str> {
        self.current_turn.as_deref()
    }

    pub fn remaining_speed(&self) -> i32 {
        self.remaining
    }

    pub fn winners(&self) -> Option<&[PlayerId]> {
        self.winners.as_deref()
    }

    pub fn board(&self) -> Option<&BoardTemplate> {
        self.board.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::Audience;

    fn env(seq: u64, event: ServerEvent) -> Envelope {
        Envelope {
            seq,
            audience: Audience::Room,
            event,
        }
    }

    fn moved(id: &str, row: usize, col: usize) -> ServerEvent {
        ServerEvent::PlayerMoved {
            player_id: id.into(),
            new_position: Position::new(row, col),
            is_teleport: false,
        }
    }

    #[test]
    fn late_older_move_does_not_win() {
        let mut r = ClientReplica::new("me");
        assert!(r.apply(&env(5, moved("bob", 2, 3))));
        assert!(!r.apply(&env(4, moved("bob", 2, 2))));
        assert_eq!(r.position("bob"), Some(Position::new(2, 3)));
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut r = ClientReplica::new("me");
        let e = env(7, ServerEvent::DoorToggled {
            tile_position: Position::new(1, 1),
            new_state: DoorState::Open,
        });
        assert!(r.apply(&e));
        assert!(!r.apply(&e));
        assert_eq!(r.door(Position::new(1, 1)), Some(DoorState::Open));
    }

    #[test]
    fn replayed_turn_start_keeps_the_spent_budget() {
        let mut r = ClientReplica::new("me");
        let start = env(5, ServerEvent::TurnStarted {
            player_id: "me".into(),
            speed: 6,
        });
        assert!(r.apply(&start));
        assert!(r.apply(&env(6, ServerEvent::MovementBudget {
            player_id: "me".into(),
            remaining: 2,
        })));
        assert!(!r.apply(&start));
        assert_eq!(r.remaining_speed(), 2);
        assert_eq!(r.current_turn(), Some("me"));
    }

    #[test]
    fn independent_keys_apply_out_of_order() {
        let mut r = ClientReplica::new("me");
        r.apply(&env(9, moved("bob", 0, 1)));
        // An older event about a different avatar still applies.
        assert!(r.apply(&env(3, moved("amy", 4, 4))));
        assert_eq!(r.occupant_at(Position::new(4, 4)), Some("amy"));
    }

    #[test]
    fn item_pickup_and_drop_resolve_by_sequence() {
        let mut r = ClientReplica::new("me");
        let pos = Position::new(3, 3);
        r.apply(&env(
            10,
            ServerEvent::ItemPickedUp {
                player_id: "bob".into(),
                item: ItemKind::Sword,
                position: pos,
            },
        ));
        r.apply(&env(
            8,
            ServerEvent::ItemDropped {
                item: ItemKind::Sword,
                position: pos,
            },
        ));
        assert_eq!(r.item(pos), None);
    }

    #[test]
    fn prediction_is_replaced_by_authority() {
        let mut r = ClientReplica::new("me");
        r.apply(&env(1, moved("me", 0, 0)));
        r.predict_move(Position::new(0, 3));
        assert_eq!(r.position("me"), Some(Position::new(0, 3)));
        assert_eq!(r.authoritative_position("me"), Some(Position::new(0, 0)));
        r.apply(&env(
            2,
            ServerEvent::IntentRejected {
                intent: "requestMove".into(),
                reason: "unreachable".into(),
            },
        ));
        assert_eq!(r.position("me"), Some(Position::new(0, 0)));
    }
}
