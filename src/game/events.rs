//! Wire contracts: client intents in, server events out.
//!
//! Everything serializes as JSON with a `type` tag and camelCase fields.

use serde::{Deserialize, Serialize};

use super::board_store::BoardTemplate;
use super::combat::{DiceRoll, TerminationReason};
use super::types::{DoorState, ItemKind, PlayerId, Position};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttackTarget {
    Tile(Position),
    Player(PlayerId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Intent {
    RequestMove {
        destination: Position,
        #[serde(default)]
        expected_from: Option<Position>,
    },
    ToggleDoor {
        tile_position: Position,
    },
    InitiateAttack {
        target: AttackTarget,
    },
    AttemptEscape,
    ThrowItem {
        item_kind: ItemKind,
    },
    EndTurnVoluntary,
    Teleport {
        destination: Position,
    },
    StartMatch,
    LockRoom {
        locked: bool,
    },
    Quit,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::RequestMove { .. } => "requestMove",
            Intent::ToggleDoor { .. } => "toggleDoor",
            Intent::InitiateAttack { .. } => "initiateAttack",
            Intent::AttemptEscape => "attemptEscape",
            Intent::ThrowItem { .. } => "throwItem",
            Intent::EndTurnVoluntary => "endTurnVoluntary",
            Intent::Teleport { .. } => "teleport",
            Intent::StartMatch => "startMatch",
            Intent::LockRoom { .. } => "lockRoom",
            Intent::Quit => "quit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HaltReason {
    Ice,
    InventoryFull,
    Blocked,
    TurnEnded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnAssignment {
    pub player_id: PlayerId,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<u8>,
}

/// Die faces a fighter rolls with; the rolls themselves travel on each
/// `hasAttacked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FighterDice {
    pub player_id: PlayerId,
    pub attack_sides: u8,
    pub defense_sides: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    PlayerJoined {
        player_id: PlayerId,
        is_admin: bool,
        is_virtual: bool,
    },
    RoomLockChanged {
        locked: bool,
    },
    MatchStarted {
        match_id: String,
        order: Vec<PlayerId>,
        spawns: Vec<SpawnAssignment>,
        board: BoardTemplate,
    },
    TurnStarted {
        player_id: PlayerId,
        speed: i32,
    },
    TurnEnded {
        player_id: PlayerId,
        forced: bool,
    },
    TurnTimeLeftUpdate {
        seconds: u64,
    },
    MovementBudget {
        player_id: PlayerId,
        remaining: i32,
    },
    PlayerMoved {
        player_id: PlayerId,
        new_position: Position,
        is_teleport: bool,
    },
    MovementHalted {
        player_id: PlayerId,
        position: Position,
        reason: HaltReason,
    },
    DoorToggled {
        tile_position: Position,
        new_state: DoorState,
    },
    ItemPickedUp {
        player_id: PlayerId,
        item: ItemKind,
        position: Position,
    },
    ItemDropped {
        item: ItemKind,
        position: Position,
    },
    InventoryFull {
        player_id: PlayerId,
        item: ItemKind,
        position: Position,
    },
    FightStarted {
        participants: [PlayerId; 2],
        first_actor_id: PlayerId,
        dice: [FighterDice; 2],
    },
    HasAttacked {
        attacker_id: PlayerId,
        defender_id: PlayerId,
        succeeded: bool,
        impact: i32,
        dice_rolls: [DiceRoll; 2],
        attack_total: i32,
        defense_total: i32,
        defender_health: i32,
        potion_used: bool,
    },
    EscapeAttempted {
        player_id: PlayerId,
        succeeded: bool,
        attempts_remaining: u8,
    },
    RoundEnded {
        next_actor_id: PlayerId,
    },
    CombatTimeLeftUpdate {
        seconds: u64,
    },
    FightEnded {
        winner_id: PlayerId,
        loser_id: PlayerId,
        reason: TerminationReason,
    },
    VictoryUpdate {
        winner_id: PlayerId,
        loser_id: Option<PlayerId>,
        victories: u32,
        is_objective_win: bool,
    },
    PlayerRemoved {
        player_id: PlayerId,
    },
    MatchEnded {
        winners: Vec<PlayerId>,
    },
    RoomClosed {
        reason: String,
    },
    IntentRejected {
        intent: String,
        reason: String,
    },
}

/// Who receives an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Audience {
    Room,
    Player(PlayerId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub audience: Audience,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn room(event: ServerEvent) -> Self {
        Outbound {
            audience: Audience::Room,
            event,
        }
    }

    pub fn to(player_id: impl Into<PlayerId>, event: ServerEvent) -> Self {
        Outbound {
            audience: Audience::Player(player_id.into()),
            event,
        }
    }
}

/// A sequenced event as delivered to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub seq: u64,
    pub audience: Audience,
    pub event: ServerEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn intents_parse_from_client_json() {
        let raw = json!({"type": "requestMove", "destination": {"row": 2, "col": 3}});
        let intent: Intent = serde_json::from_value(raw).unwrap();
        assert_eq!(
            intent,
            Intent::RequestMove {
                destination: Position::new(2, 3),
                expected_from: None
            }
        );

        let raw = json!({"type": "toggleDoor", "tilePosition": {"row": 0, "col": 1}});
        assert!(matches!(
            serde_json::from_value::<Intent>(raw).unwrap(),
            Intent::ToggleDoor { .. }
        ));

        let raw = json!({"type": "initiateAttack", "target": "bob"});
        assert_eq!(
            serde_json::from_value::<Intent>(raw).unwrap(),
            Intent::InitiateAttack {
                target: AttackTarget::Player("bob".into())
            }
        );

        let raw = json!({"type": "attemptEscape"});
        assert_eq!(serde_json::from_value::<Intent>(raw).unwrap(), Intent::AttemptEscape);
    }

    #[test]
    fn events_use_type_tag_and_camel_case() {
        let ev = ServerEvent::PlayerMoved {
            player_id: "alice".into(),
            new_position: Position::new(1, 2),
            is_teleport: false,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "playerMoved");
        assert_eq!(v["playerId"], "alice");
        assert_eq!(v["newPosition"]["col"], 2);
        assert_eq!(v["isTeleport"], false);

        let ev = ServerEvent::FightEnded {
            winner_id: "a".into(),
            loser_id: "b".into(),
            reason: TerminationReason::Escape,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["reason"], "escape");
    }
}
