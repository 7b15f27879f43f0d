//! Overland action arbitration: movement, doors, attacks, items.
//!
//! Each entry point validates against the grid and the sequencer first and
//! only then mutates, so a rejection leaves the room exactly as it was.

use log::debug;
use rand::Rng;
use std::collections::VecDeque;

use super::errors::GameError;
use super::events::{AttackTarget, HaltReason, Outbound, ServerEvent};
use super::grid::GridAccess;
use super::items;
use super::path::{path_cost, shortest_path};
use super::room::{MovementPlan, Phase, RoomState};
use super::types::{GameMode, ItemKind, Position, TerrainKind};
use crate::logutil::escape_log;

impl RoomState {
    /// Common gate for overland actions.
    fn ensure_turn(&self, actor: &str) -> Result<(), GameError> {
        match self.phase {
            Phase::Turn => {}
            Phase::Combat => return Err(GameError::invalid("a fight is in progress")),
            Phase::WaitingRoom | Phase::Ended => return Err(GameError::MatchNotRunning),
        }
        if !self.sequencer.is_current(actor) {
            return Err(GameError::invalid("not your turn"));
        }
        if self.movement.is_some() {
            return Err(GameError::invalid("movement in progress"));
        }
        Ok(())
    }

    /// Plans a move. Steps are applied by [`RoomState::step_movement`].
    pub fn request_move(
        &mut self,
        actor: &str,
        destination: Position,
        expected_from: Option<Position>,
    ) -> Result<Vec<Outbound>, GameError> {
        self.ensure_turn(actor)?;
        let from = self.position_of(actor)?;
        if let Some(expected) = expected_from {
            if expected != from {
                return Err(GameError::StaleState(format!(
                    "{} is at {}, not {}",
                    actor, from, expected
                )));
            }
        }
        if !self.grid.contains(destination) {
            return Err(GameError::OutOfBounds(destination));
        }
        if destination == from {
            return Err(GameError::invalid("already standing there"));
        }
        match self.grid.terrain(destination) {
            Some(t) if !t.is_traversable() => return Err(GameError::Impassable(destination)),
            _ => {}
        }
        if self.grid.occupant(destination).is_some() {
            return Err(GameError::OccupiedTile(destination));
        }
        let path = shortest_path(&self.grid, from, destination)
            .ok_or(GameError::Unreachable(destination))?;
        let cost = path_cost(&self.grid, &path).ok_or(GameError::Unreachable(destination))?;
        if cost as i32 > self.sequencer.remaining_speed() {
            return Err(GameError::Unreachable(destination));
        }
        debug!(
            target: "skirmish::room",
            "room {}: {} moves {} -> {} ({} steps, cost {})",
            self.code,
            escape_log(actor),
            from,
            destination,
            path.len(),
            cost
        );
        self.movement = Some(MovementPlan {
            player_id: actor.to_string(),
            steps: VecDeque::from(path),
        });
        Ok(Vec::new())
    }

    /// Applies the next queued step of the in-flight movement, if any.
    pub fn step_movement(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        let Some(plan) = self.movement.as_mut() else {
            return out;
        };
        let actor = plan.player_id.clone();
        let Some(next) = plan.steps.pop_front() else {
            self.movement = None;
            self.check_turn_complete(&mut out);
            return out;
        };
        let Ok(from) = self.position_of(&actor) else {
            self.movement = None;
            return out;
        };

        let cost = self
            .grid
            .terrain(next)
            .and_then(TerrainKind::move_cost)
            .filter(|_| self.grid.occupant(next).is_none())
            .filter(|c| *c as i32 <= self.sequencer.remaining_speed());
        let Some(cost) = cost else {
            self.halt(&actor, from, HaltReason::Blocked, &mut out);
            return out;
        };

        self.grid.clear_occupant(from);
        if let Err(e) = self.grid.place_occupant(next, &actor) {
            let _ = self.grid.place_occupant(from, &actor);
            debug!(target: "skirmish::room", "room {}: step refused: {}", self.code, e);
            self.halt(&actor, from, HaltReason::Blocked, &mut out);
            return out;
        }
        if let Ok(p) = self.player_mut(&actor) {
            p.character.position = Some(next);
        }
        self.sequencer.consume_movement(cost);
        out.push(Outbound::room(ServerEvent::PlayerMoved {
            player_id: actor.clone(),
            new_position: next,
            is_teleport: false,
        }));
        out.push(Outbound::room(ServerEvent::MovementBudget {
            player_id: actor.clone(),
            remaining: self.sequencer.remaining_speed(),
        }));

        let mut halt = self.arrive(&actor, next, &mut out);
        if self.phase != Phase::Turn {
            return out;
        }
        let more_steps = self.movement.as_ref().is_some_and(|m| !m.steps.is_empty());
        let chance = self.rules.ice_stop_chance();
        if halt.is_none()
            && more_steps
            && chance > 0.0
            && self.grid.terrain(next) == Some(TerrainKind::Ice)
            && self.rng.gen_bool(chance)
        {
            halt = Some(HaltReason::Ice);
        }
        match halt {
            Some(reason) => self.halt(&actor, next, reason, &mut out),
            None if !more_steps => {
                self.movement = None;
                self.check_turn_complete(&mut out);
            }
            None => {}
        }
        out
    }

    fn halt(&mut self, actor: &str, at: Position, reason: HaltReason, out: &mut Vec<Outbound>) {
        self.movement = None;
        out.push(Outbound::room(ServerEvent::MovementHalted {
            player_id: actor.to_string(),
            position: at,
            reason,
        }));
        self.check_turn_complete(out);
    }

    /// Runs every queued step back to back, without the cosmetic delay.
    pub fn drain_movement(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while self.movement.is_some() {
            out.extend(self.step_movement());
        }
        out
    }

    /// Arrival effects on `pos`: auto-pickup and the capture-the-flag check.
    /// Returns why movement must stop here, if it must.
    fn arrive(&mut self, actor: &str, pos: Position, out: &mut Vec<Outbound>) -> Option<HaltReason> {
        if let Some(item) = self.grid.item(pos).filter(|i| i.is_collectible()) {
            let has_room = self.player(actor).is_some_and(|p| p.free_slot().is_some());
            if !has_room {
                out.push(Outbound::to(
                    actor,
                    ServerEvent::InventoryFull {
                        player_id: actor.to_string(),
                        item,
                        position: pos,
                    },
                ));
                return Some(HaltReason::InventoryFull);
            }
            if self.grid.take_item(pos).is_ok() {
                if let Ok(p) = self.player_mut(actor) {
                    items::add_to_inventory(p, item);
                }
                out.push(Outbound::room(ServerEvent::ItemPickedUp {
                    player_id: actor.to_string(),
                    item,
                    position: pos,
                }));
            }
        }

        if self.mode() == GameMode::CaptureTheFlag {
            let captured = self.player(actor).is_some_and(|p| {
                p.holds(ItemKind::Flag) && p.character.initial_spawn == Some(pos)
            });
            if captured {
                let team = self.player(actor).and_then(|p| p.team);
                let winners: Vec<_> = self
                    .players
                    .iter()
                    .filter(|p| p.id == actor || (team.is_some() && p.team == team))
                    .map(|p| p.id.clone())
                    .collect();
                let victories = self.player(actor).map(|p| p.victories).unwrap_or(0);
                out.push(Outbound::room(ServerEvent::VictoryUpdate {
                    winner_id: actor.to_string(),
                    loser_id: None,
                    victories,
                    is_objective_win: true,
                }));
                self.end_match(winners, out);
                return Some(HaltReason::TurnEnded);
            }
        }
        None
    }

    pub fn toggle_door(&mut self, actor: &str, tile: Position) -> Result<Vec<Outbound>, GameError> {
        self.ensure_turn(actor)?;
        let pos = self.position_of(actor)?;
        if !self.grid.contains(tile) {
            return Err(GameError::OutOfBounds(tile));
        }
        if !pos.is_adjacent(tile) {
            return Err(GameError::invalid(format!("door at {} is not adjacent", tile)));
        }
        if !self.grid.terrain(tile).is_some_and(TerrainKind::is_door) {
            return Err(GameError::NotADoor(tile));
        }
        let has_key = self.player(actor).is_some_and(|p| p.holds(ItemKind::MasterKey));
        if !has_key && !self.sequencer.can_perform_action() {
            return Err(GameError::invalid("action already used this turn"));
        }
        let new_state = self.grid.toggle_door(tile)?;
        if !has_key {
            self.sequencer.use_action();
        }
        let mut out = vec![Outbound::room(ServerEvent::DoorToggled {
            tile_position: tile,
            new_state,
        })];
        self.check_turn_complete(&mut out);
        Ok(out)
    }

    /// Overland: opens a fight with an adjacent opponent. During a fight:
    /// the attack of the fighter whose round it is.
    pub fn initiate_attack(
        &mut self,
        actor: &str,
        target: AttackTarget,
    ) -> Result<Vec<Outbound>, GameError> {
        if self.phase == Phase::Combat {
            let in_fight = self.combat.as_ref().is_some_and(|f| f.is_participant(actor));
            if !in_fight {
                return Err(GameError::invalid("a fight is in progress"));
            }
            return self.combat_attack(actor);
        }
        self.ensure_turn(actor)?;
        if !self.sequencer.can_perform_action() {
            return Err(GameError::invalid("action already used this turn"));
        }
        let pos = self.position_of(actor)?;
        let (target_id, target_pos) = match target {
            AttackTarget::Tile(tile) => {
                if !self.grid.contains(tile) {
                    return Err(GameError::OutOfBounds(tile));
                }
                let id = self
                    .grid
                    .occupant(tile)
                    .ok_or_else(|| GameError::invalid(format!("nobody to attack at {}", tile)))?;
                (id.to_string(), tile)
            }
            AttackTarget::Player(id) => {
                let at = self.position_of(&id)?;
                (id, at)
            }
        };
        if !pos.is_adjacent(target_pos) {
            return Err(GameError::invalid("target is not adjacent"));
        }
        if !self.are_opponents(actor, &target_id) {
            return Err(GameError::invalid("cannot attack a teammate"));
        }
        self.begin_fight(actor, &target_id)
    }

    /// Drops a held item. Lands on the actor's tile when it is free of
    /// items; otherwise on the nearest empty tile, after which the actor
    /// picks up what it stands on (a swap).
    pub fn throw_item(&mut self, actor: &str, item: ItemKind) -> Result<Vec<Outbound>, GameError> {
        self.ensure_turn(actor)?;
        let pos = self.position_of(actor)?;
        if !self.player(actor).is_some_and(|p| p.holds(item)) {
            return Err(GameError::invalid(format!("{:?} is not in the inventory", item)));
        }
        let under_foot = self.grid.item(pos);
        let landing = if under_foot.is_none() {
            Some(pos)
        } else {
            items::nearest_empty_tiles(&self.grid, pos, 1, true).first().copied()
        };
        let Some(landing) = landing else {
            return Err(GameError::invalid("no free tile to drop the item on"));
        };

        let player = self.player_mut(actor)?;
        items::remove_from_inventory(player, item);
        self.grid.place_item(landing, item)?;
        let mut out = vec![Outbound::room(ServerEvent::ItemDropped {
            item,
            position: landing,
        })];
        if landing != pos {
            if let Some(halt) = self.arrive(actor, pos, &mut out) {
                debug!(target: "skirmish::room", "room {}: swap stopped: {:?}", self.code, halt);
            }
        }
        Ok(out)
    }

    pub fn end_turn_voluntary(&mut self, actor: &str) -> Result<Vec<Outbound>, GameError> {
        match self.phase {
            Phase::Turn => {}
            Phase::Combat => return Err(GameError::invalid("a fight is in progress")),
            _ => return Err(GameError::MatchNotRunning),
        }
        if !self.sequencer.is_current(actor) {
            return Err(GameError::invalid("not your turn"));
        }
        let mut out = Vec::new();
        self.end_turn(false, &mut out);
        Ok(out)
    }

    /// Debug-only jump to any free traversable tile.
    pub fn teleport(&mut self, actor: &str, destination: Position) -> Result<Vec<Outbound>, GameError> {
        if !self.rules.debug_mode {
            return Err(GameError::invalid("teleport is only available in debug mode"));
        }
        self.ensure_turn(actor)?;
        let from = self.position_of(actor)?;
        if !self.grid.contains(destination) {
            return Err(GameError::OutOfBounds(destination));
        }
        self.grid.place_occupant(destination, actor)?;
        self.grid.clear_occupant(from);
        if let Ok(p) = self.player_mut(actor) {
            p.character.position = Some(destination);
        }
        let mut out = vec![Outbound::room(ServerEvent::PlayerMoved {
            player_id: actor.to_string(),
            new_position: destination,
            is_teleport: true,
        })];
        self.arrive(actor, destination, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GameConfig;
    use crate::game::board_store::BoardTemplate;
    use crate::game::errors::GameError;
    use crate::game::events::{Intent, ServerEvent};
    use crate::game::grid::GridAccess;
    use crate::game::room::RoomState;
    use crate::game::types::{DiceAssignment, GameMode, ItemKind, Player, Position, Stats};

    const LAYOUT: &str = "
        S........S
        ..........
        ..s.......
        ..........
        ....+.....
        ..........
        ..........
        ..........
        ..........
        ..........
    ";

    fn started(debug: bool) -> RoomState {
        let board = BoardTemplate::from_ascii("t", "T", GameMode::Classic, LAYOUT).unwrap();
        let rules = GameConfig {
            debug_mode: debug,
            rng_seed: Some(5),
            ..GameConfig::default()
        };
        let mut room = RoomState::new("0001", board, rules).unwrap();
        room.join(Player::new("a", Stats::new(6, 6, 4, 4), DiceAssignment::AttackDie))
            .unwrap();
        room.join(Player::new("b", Stats::new(6, 4, 4, 4), DiceAssignment::AttackDie))
            .unwrap();
        room.start_match("a").unwrap();
        room
    }

    #[test]
    fn only_current_player_may_move() {
        let mut room = started(true);
        assert_eq!(room.sequencer().current(), Some("a"));
        let err = room
            .handle_intent("b", Intent::RequestMove {
                destination: Position::new(1, 1),
                expected_from: None,
            })
            .unwrap_err();
        assert!(matches!(err, GameError::InvalidIntent(_)));
    }

    #[test]
    fn stale_origin_is_rejected() {
        let mut room = started(true);
        let here = room.player("a").unwrap().position().unwrap();
        let wrong = Position::new(here.row, if here.col == 0 { 1 } else { 0 });
        let err = room
            .request_move("a", Position::new(1, 5), Some(wrong))
            .unwrap_err();
        assert!(matches!(err, GameError::StaleState(_)));
        assert!(!room.has_pending_movement());
    }

    #[test]
    fn door_toggle_needs_adjacency_and_uses_action() {
        let mut room = started(true);
        room.teleport("a", Position::new(4, 3)).unwrap();
        let far = room.toggle_door("a", Position::new(6, 6)).unwrap_err();
        assert!(matches!(far, GameError::InvalidIntent(_)));
        room.toggle_door("a", Position::new(4, 4)).unwrap();
        assert!(!room.sequencer().can_perform_action());
        assert!(room.toggle_door("a", Position::new(4, 4)).is_err());
    }

    #[test]
    fn master_key_keeps_the_action() {
        let mut room = started(true);
        room.teleport("a", Position::new(4, 3)).unwrap();
        room.players.iter_mut().find(|p| p.id == "a").unwrap().inventory[0] =
            Some(ItemKind::MasterKey);
        room.toggle_door("a", Position::new(4, 4)).unwrap();
        room.toggle_door("a", Position::new(4, 4)).unwrap();
        assert!(room.sequencer().can_perform_action());
    }

    #[test]
    fn walking_over_an_item_picks_it_up() {
        let mut room = started(true);
        room.teleport("a", Position::new(2, 0)).unwrap();
        room.request_move("a", Position::new(2, 3), None).unwrap();
        let events = room.drain_movement();
        assert!(events.iter().any(|o| matches!(
            o.event,
            ServerEvent::ItemPickedUp { item: ItemKind::Sword, .. }
        )));
        let a = room.player("a").unwrap();
        assert!(a.holds(ItemKind::Sword));
        assert_eq!(a.stats().attack, 6);
        assert_eq!(room.grid().item(Position::new(2, 2)), None);
    }

    #[test]
    fn full_inventory_halts_on_the_item() {
        let mut room = started(true);
        room.teleport("a", Position::new(2, 0)).unwrap();
        room.players.iter_mut().find(|p| p.id == "a").unwrap().inventory =
            [Some(ItemKind::Potion), Some(ItemKind::Amulet)];
        room.request_move("a", Position::new(2, 4), None).unwrap();
        let events = room.drain_movement();
        assert!(events
            .iter()
            .any(|o| matches!(o.event, ServerEvent::InventoryFull { .. })));
        assert_eq!(room.player("a").unwrap().position(), Some(Position::new(2, 2)));
        assert_eq!(room.sequencer().remaining_speed(), 4);

        // Swap: throw the potion, pick up the sword.
        let events = room.throw_item("a", ItemKind::Potion).unwrap();
        assert!(events
            .iter()
            .any(|o| matches!(o.event, ServerEvent::ItemPickedUp { item: ItemKind::Sword, .. })));
        let a = room.player("a").unwrap();
        assert!(a.holds(ItemKind::Sword) && !a.holds(ItemKind::Potion));
        assert_eq!(room.grid().positions_with_item(ItemKind::Potion).len(), 1);
    }

    #[test]
    fn teleport_requires_debug_mode() {
        let mut room = started(false);
        assert!(room.teleport("a", Position::new(5, 5)).is_err());
    }

    #[test]
    fn cannot_end_someone_elses_turn() {
        let mut room = started(true);
        assert!(room.end_turn_voluntary("b").is_err());
        room.end_turn_voluntary("a").unwrap();
        assert_eq!(room.sequencer().current(), Some("b"));
    }
}
