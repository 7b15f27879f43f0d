//! Per-room authoritative game state.
//!
//! [`RoomState`] is owned by exactly one room actor task. Every method runs to
//! completion and returns the events to broadcast; a rejected intent returns a
//! [`GameError`] and leaves the state untouched. Movement is the one operation
//! spread over several calls: [`RoomState::handle_intent`] plans the path and
//! the actor then calls [`RoomState::step_movement`] once per step.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::VecDeque;

use super::board_store::BoardTemplate;
use super::bot::{plan_overland, BotStep, BotView};
use super::combat::{
    decide_virtual, resolve_exchange, CombatAction, CombatInstance, ExchangeContext,
    TerminationReason,
};
use super::errors::GameError;
use super::events::{AttackTarget, FighterDice, Intent, Outbound, ServerEvent, SpawnAssignment};
use super::grid::{Grid, GridAccess};
use super::items;
use super::sequencer::TurnSequencer;
use super::types::{GameMode, ItemKind, Player, PlayerId, Position, TerrainKind};
use crate::config::GameConfig;
use crate::logutil::escape_log;
use crate::metrics;

/// Bot planning passes allowed per turn before the room ends it.
const MAX_BOT_STEPS_PER_TURN: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    WaitingRoom,
    Turn,
    Combat,
    Ended,
}

#[derive(Debug, Clone)]
pub struct MovementPlan {
    pub player_id: PlayerId,
    pub steps: VecDeque<Position>,
}

/// Serializable view of a room for handles and the CLI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: String,
    pub phase: Phase,
    pub locked: bool,
    pub players: Vec<Player>,
    pub order: Vec<PlayerId>,
    pub current: Option<PlayerId>,
    pub remaining_speed: i32,
    pub winners: Vec<PlayerId>,
    pub board: BoardTemplate,
}

pub struct RoomState {
    pub(super) code: String,
    pub(super) match_id: Option<String>,
    pub(super) rules: GameConfig,
    pub(super) template: BoardTemplate,
    pub(super) grid: Grid,
    pub(super) players: Vec<Player>,
    pub(super) sequencer: TurnSequencer,
    pub(super) phase: Phase,
    pub(super) combat: Option<CombatInstance>,
    pub(super) movement: Option<MovementPlan>,
    pub(super) locked: bool,
    pub(super) rng: StdRng,
    pub(super) winners: Vec<PlayerId>,
    pub(super) turn_generation: u64,
    pub(super) round_generation: u64,
    pub(super) bot_steps: u8,
}

impl RoomState {
    pub fn new(code: &str, template: BoardTemplate, rules: GameConfig) -> Result<Self, GameError> {
        let grid = Grid::from_template(&template)?;
        let rng = match rules.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(RoomState {
            code: code.to_string(),
            match_id: None,
            rules,
            template,
            grid,
            players: Vec::new(),
            sequencer: TurnSequencer::new(),
            phase: Phase::WaitingRoom,
            combat: None,
            movement: None,
            locked: false,
            rng,
            winners: Vec::new(),
            turn_generation: 0,
            round_generation: 0,
            bot_steps: 0,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn match_id(&self) -> Option<&str> {
        self.match_id.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn rules(&self) -> &GameConfig {
        &self.rules
    }

    pub fn mode(&self) -> GameMode {
        self.template.mode
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub(super) fn player_mut(&mut self, id: &str) -> Result<&mut Player, GameError> {
        self.players
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| GameError::UnknownPlayer(id.to_string()))
    }

    pub(super) fn position_of(&self, id: &str) -> Result<Position, GameError> {
        self.player(id)
            .and_then(Player::position)
            .ok_or_else(|| GameError::UnknownPlayer(id.to_string()))
    }

    pub fn sequencer(&self) -> &TurnSequencer {
        &self.sequencer
    }

    pub fn combat(&self) -> Option<&CombatInstance> {
        self.combat.as_ref()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn winners(&self) -> &[PlayerId] {
        &self.winners
    }

    pub fn has_pending_movement(&self) -> bool {
        self.movement.is_some()
    }

    /// Bumped every time a new overland turn starts.
    pub fn turn_generation(&self) -> u64 {
        self.turn_generation
    }

    /// Bumped every time a combat round is handed to a fighter.
    pub fn round_generation(&self) -> u64 {
        self.round_generation
    }

    pub fn is_over(&self) -> bool {
        self.phase == Phase::Ended
    }

    pub fn human_count(&self) -> usize {
        self.players.iter().filter(|p| !p.is_virtual).count()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            phase: self.phase,
            locked: self.locked,
            players: self.players.clone(),
            order: self.sequencer.order().to_vec(),
            current: self.sequencer.current().map(str::to_string),
            remaining_speed: self.sequencer.remaining_speed(),
            winners: self.winners.clone(),
            board: self
                .grid
                .to_template(&self.template.id, &self.template.name, self.template.mode),
        }
    }

    // ---- lobby -------------------------------------------------------

    /// Adds a player to the waiting room. Returns the id actually assigned,
    /// which carries a numeric suffix when the requested name is taken.
    pub fn join(&mut self, mut player: Player) -> Result<(PlayerId, Vec<Outbound>), GameError> {
        if self.phase != Phase::WaitingRoom {
            return Err(GameError::invalid("match already started"));
        }
        if self.locked {
            return Err(GameError::RoomLocked);
        }
        if self.players.len() >= self.grid.size().capacity() {
            return Err(GameError::RoomFull);
        }
        let base: String = player.id.trim().chars().filter(|c| !c.is_control()).collect();
        if base.is_empty() {
            return Err(GameError::invalid("player name is empty"));
        }
        let mut id = base.clone();
        let mut n = 2;
        while self.player(&id).is_some() {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        player.id = id.clone();
        player.is_admin = self.players.is_empty();
        info!(
            target: "skirmish::room",
            "room {}: {} joined{}",
            self.code,
            escape_log(&id),
            if player.is_admin { " as admin" } else { "" }
        );
        let event = ServerEvent::PlayerJoined {
            player_id: id.clone(),
            is_admin: player.is_admin,
            is_virtual: player.is_virtual,
        };
        self.players.push(player);
        Ok((id, vec![Outbound::room(event)]))
    }

    fn ensure_admin(&self, actor: &str) -> Result<(), GameError> {
        match self.player(actor) {
            Some(p) if p.is_admin => Ok(()),
            Some(_) => Err(GameError::invalid("only the room admin can do that")),
            None => Err(GameError::UnknownPlayer(actor.to_string())),
        }
    }

    pub fn lock_room(&mut self, actor: &str, locked: bool) -> Result<Vec<Outbound>, GameError> {
        self.ensure_admin(actor)?;
        if self.phase != Phase::WaitingRoom {
            return Err(GameError::invalid("room can only be locked before the match"));
        }
        self.locked = locked;
        Ok(vec![Outbound::room(ServerEvent::RoomLockChanged { locked })])
    }

    pub fn start_match(&mut self, actor: &str) -> Result<Vec<Outbound>, GameError> {
        self.ensure_admin(actor)?;
        if self.phase != Phase::WaitingRoom {
            return Err(GameError::invalid("match already started"));
        }
        if self.players.len() < 2 {
            return Err(GameError::invalid("at least two players are needed"));
        }
        let ctf = self.mode() == GameMode::CaptureTheFlag;
        if ctf && self.players.len() % 2 != 0 {
            return Err(GameError::invalid("capture the flag needs an even number of players"));
        }
        let mut spawns = self.grid.positions_with_item(ItemKind::Spawn);
        if spawns.len() < self.players.len() {
            return Err(GameError::invalid("board has fewer spawn tiles than players"));
        }

        // Stable sort keeps join order among equal speeds.
        let mut order: Vec<(PlayerId, i32)> = self
            .players
            .iter()
            .map(|p| (p.id.clone(), p.stats().speed))
            .collect();
        order.sort_by(|a, b| b.1.cmp(&a.1));
        let order: Vec<PlayerId> = order.into_iter().map(|(id, _)| id).collect();

        spawns.shuffle(&mut self.rng);
        let mut assignments = Vec::with_capacity(order.len());
        for (i, id) in order.iter().enumerate() {
            let pos = spawns[i];
            self.grid.place_occupant(pos, id)?;
            let team = ctf.then_some((i % 2) as u8);
            let player = self.player_mut(id)?;
            player.character.position = Some(pos);
            player.character.initial_spawn = Some(pos);
            player.team = team;
            assignments.push(SpawnAssignment {
                player_id: id.clone(),
                position: pos,
                team,
            });
        }
        for unused in &spawns[order.len()..] {
            let _ = self.grid.take_item(*unused);
        }

        let match_id = uuid::Uuid::new_v4().to_string();
        info!(
            target: "skirmish::room",
            "room {}: match {} started on board {} with {} players",
            self.code,
            match_id,
            escape_log(&self.template.id),
            order.len()
        );
        metrics::record_match_start(&self.template.id);
        self.match_id = Some(match_id.clone());
        self.sequencer.initialize(order.clone(), true);
        self.phase = Phase::Turn;
        self.locked = true;

        let mut out = vec![Outbound::room(ServerEvent::MatchStarted {
            match_id,
            order,
            spawns: assignments,
            board: self
                .grid
                .to_template(&self.template.id, &self.template.name, self.template.mode),
        })];
        self.start_turn(&mut out);
        Ok(out)
    }

    // ---- intents -------------------------------------------------------

    /// Validates and applies one intent from `actor`.
    pub fn handle_intent(&mut self, actor: &str, intent: Intent) -> Result<Vec<Outbound>, GameError> {
        if self.player(actor).is_none() {
            return Err(GameError::UnknownPlayer(actor.to_string()));
        }
        debug!(
            target: "skirmish::room",
            "room {}: {} from {}",
            self.code,
            intent.name(),
            escape_log(actor)
        );
        match intent {
            Intent::StartMatch => self.start_match(actor),
            Intent::LockRoom { locked } => self.lock_room(actor, locked),
            Intent::Quit => Ok(self.remove_player(actor)),
            Intent::RequestMove {
                destination,
                expected_from,
            } => self.request_move(actor, destination, expected_from),
            Intent::ToggleDoor { tile_position } => self.toggle_door(actor, tile_position),
            Intent::InitiateAttack { target } => self.initiate_attack(actor, target),
            Intent::AttemptEscape => self.attempt_escape(actor),
            Intent::ThrowItem { item_kind } => self.throw_item(actor, item_kind),
            Intent::EndTurnVoluntary => self.end_turn_voluntary(actor),
            Intent::Teleport { destination } => self.teleport(actor, destination),
        }
    }

    /// Attack for the fighter whose round it is (combat counterpart of
    /// `initiateAttack` once a fight is running).
    pub(super) fn combat_attack(&mut self, actor: &str) -> Result<Vec<Outbound>, GameError> {
        let fight = self.combat.as_ref().ok_or(GameError::MatchNotRunning)?;
        if fight.active_attacker() != actor {
            return Err(GameError::invalid("not your combat round"));
        }
        if fight.attack_used_this_round() {
            return Err(GameError::invalid("already attacked this round"));
        }
        let defender_id = fight.defender().to_string();
        let potion_ready = fight.potion_ready(&defender_id);

        let attacker_pos = self.position_of(actor)?;
        let defender_pos = self.position_of(&defender_id)?;
        let ctx = ExchangeContext {
            debug_dice: self.rules.debug_mode,
            attacker_on_ice: self.grid.terrain(attacker_pos) == Some(TerrainKind::Ice),
            defender_on_ice: self.grid.terrain(defender_pos) == Some(TerrainKind::Ice),
            ice_penalty: self.rules.ice_penalty,
            defender_potion_ready: potion_ready,
        };
        let attacker = self
            .player(actor)
            .cloned()
            .ok_or_else(|| GameError::UnknownPlayer(actor.to_string()))?;
        let mut defender = self
            .player(&defender_id)
            .cloned()
            .ok_or_else(|| GameError::UnknownPlayer(defender_id.clone()))?;
        let res = resolve_exchange(&mut self.rng, &attacker, &mut defender, ctx);
        *self.player_mut(&defender_id)? = defender;

        let Some(fight) = self.combat.as_mut() else {
            return Err(GameError::MatchNotRunning);
        };
        fight.mark_attack_used();
        if res.potion_used {
            fight.consume_potion(&defender_id);
        }
        debug!(
            target: "skirmish::combat",
            "room {}: {} attacks {} ({} vs {}), hit={}",
            self.code,
            escape_log(actor),
            escape_log(&defender_id),
            res.attack_total,
            res.defense_total,
            res.outcome.succeeded
        );
        let lethal = res.lethal();
        let mut out = vec![Outbound::room(ServerEvent::HasAttacked {
            attacker_id: actor.to_string(),
            defender_id: defender_id.clone(),
            succeeded: res.outcome.succeeded,
            impact: res.outcome.impact,
            dice_rolls: [res.attack_roll, res.defense_roll],
            attack_total: res.attack_total,
            defense_total: res.defense_total,
            defender_health: res.defender_health,
            potion_used: res.potion_used,
        })];
        if lethal {
            self.end_fight(TerminationReason::Death, actor, &defender_id, &mut out);
        } else {
            self.pass_round(&mut out);
        }
        Ok(out)
    }

    pub(super) fn attempt_escape(&mut self, actor: &str) -> Result<Vec<Outbound>, GameError> {
        let chance = self.rules.escape_success_probability;
        let fight = self.combat.as_mut().ok_or(GameError::MatchNotRunning)?;
        if fight.active_attacker() != actor {
            return Err(GameError::invalid("not your combat round"));
        }
        if fight.attack_used_this_round() {
            return Err(GameError::invalid("already acted this round"));
        }
        let has_attempts = fight.escape_remaining(actor) > 0;
        let roll = has_attempts && self.rng.gen_bool(chance);
        let outcome = fight.try_escape(actor, roll);
        let opponent = fight.opponent_of(actor).unwrap_or_default().to_string();
        let mut out = vec![Outbound::room(ServerEvent::EscapeAttempted {
            player_id: actor.to_string(),
            succeeded: outcome.succeeded,
            attempts_remaining: outcome.attempts_remaining,
        })];
        if outcome.succeeded {
            self.end_fight(TerminationReason::Escape, &opponent, actor, &mut out);
        } else if has_attempts {
            self.pass_round(&mut out);
        }
        Ok(out)
    }

    fn pass_round(&mut self, out: &mut Vec<Outbound>) {
        if let Some(fight) = self.combat.as_mut() {
            let next = fight.end_round().to_string();
            self.round_generation += 1;
            out.push(Outbound::room(ServerEvent::RoundEnded {
                next_actor_id: next,
            }));
        }
    }

    /// Opens a fight between the turn owner and an adjacent opponent.
    pub(super) fn begin_fight(&mut self, initiator: &str, target: &str) -> Result<Vec<Outbound>, GameError> {
        let a = self
            .player(initiator)
            .ok_or_else(|| GameError::UnknownPlayer(initiator.to_string()))?;
        let b = self
            .player(target)
            .ok_or_else(|| GameError::UnknownPlayer(target.to_string()))?;
        let fight = CombatInstance::new(a, b, self.rules.escape_attempts);
        let dice = [a, b].map(|p| FighterDice {
            player_id: p.id.clone(),
            attack_sides: p.character.dice.attack_sides(),
            defense_sides: p.character.dice.defense_sides(),
        });
        let participants = fight.participants().clone();
        let first = fight.active_attacker().to_string();
        info!(
            target: "skirmish::combat",
            "room {}: fight {} vs {}, {} opens",
            self.code,
            escape_log(initiator),
            escape_log(target),
            escape_log(&first)
        );
        metrics::inc_fights_started();
        self.sequencer.use_action();
        self.combat = Some(fight);
        self.phase = Phase::Combat;
        self.round_generation += 1;
        Ok(vec![Outbound::room(ServerEvent::FightStarted {
            participants,
            first_actor_id: first,
            dice,
        })])
    }

    /// Applies termination side effects and returns control to the overland
    /// turn.
    fn end_fight(
        &mut self,
        reason: TerminationReason,
        winner: &str,
        loser: &str,
        out: &mut Vec<Outbound>,
    ) {
        self.combat = None;
        info!(
            target: "skirmish::combat",
            "room {}: fight over ({:?}), winner {}",
            self.code,
            reason,
            escape_log(winner)
        );
        out.push(Outbound::room(ServerEvent::FightEnded {
            winner_id: winner.to_string(),
            loser_id: loser.to_string(),
            reason,
        }));
        if reason == TerminationReason::Death {
            self.defeat(loser, out);
        }
        if reason != TerminationReason::Escape {
            let victories = match self.player_mut(winner) {
                Ok(p) => {
                    p.victories += 1;
                    p.victories
                }
                Err(_) => 0,
            };
            out.push(Outbound::room(ServerEvent::VictoryUpdate {
                winner_id: winner.to_string(),
                loser_id: Some(loser.to_string()),
                victories,
                is_objective_win: false,
            }));
            if self.mode() == GameMode::Classic && victories >= self.rules.victories_to_win {
                self.end_match(vec![winner.to_string()], out);
                return;
            }
        }

        self.phase = Phase::Turn;
        if reason == TerminationReason::Forfeit {
            // The quitter is removed by the caller, which also hands the turn on.
            return;
        }
        if self.sequencer.is_current(loser) && reason == TerminationReason::Death {
            self.end_turn(false, out);
        } else if let Some(current) = self.sequencer.current() {
            out.push(Outbound::room(ServerEvent::MovementBudget {
                player_id: current.to_string(),
                remaining: self.sequencer.remaining_speed(),
            }));
            self.check_turn_complete(out);
        }
    }

    /// Loser side of a lethal fight: loot drops around the body, stats reset
    /// and the avatar respawns.
    fn defeat(&mut self, loser: &str, out: &mut Vec<Outbound>) {
        let Ok(at) = self.position_of(loser) else {
            return;
        };
        let Ok(player) = self.player_mut(loser) else {
            return;
        };
        let dropped = items::drain_inventory(player);
        player.character.stats = player.character.base_stats;
        player.character.active_effects.clear();
        let spawn = player.character.initial_spawn;

        for (item, position) in items::redistribute(&mut self.grid, at, &dropped, true) {
            out.push(Outbound::room(ServerEvent::ItemDropped { item, position }));
        }
        self.grid.clear_occupant(at);
        // `at` was just cleared, so the search always finds a tile.
        let target = spawn
            .filter(|s| self.grid.occupant(*s).is_none())
            .or_else(|| self.grid.nearest_unoccupied(spawn.unwrap_or(at)))
            .unwrap_or(at);
        match self.grid.place_occupant(target, loser) {
            Ok(()) => {
                if let Ok(p) = self.player_mut(loser) {
                    p.character.position = Some(target);
                }
                out.push(Outbound::room(ServerEvent::PlayerMoved {
                    player_id: loser.to_string(),
                    new_position: target,
                    is_teleport: true,
                }));
            }
            Err(e) => {
                warn!(target: "skirmish::combat", "room {}: could not respawn {} on {}: {}", self.code, escape_log(loser), target, e);
            }
        }
    }

    // ---- turn flow -------------------------------------------------------

    /// Announces the current player's turn with a fresh budget.
    pub(super) fn start_turn(&mut self, out: &mut Vec<Outbound>) {
        let Some(current) = self.sequencer.current().map(str::to_string) else {
            return;
        };
        let speed = self.player(&current).map(|p| p.stats().speed).unwrap_or(0);
        self.sequencer.begin_turn(speed);
        self.turn_generation += 1;
        self.bot_steps = 0;
        debug!(target: "skirmish::room", "room {}: turn of {}", self.code, escape_log(&current));
        out.push(Outbound::room(ServerEvent::TurnStarted {
            player_id: current.clone(),
            speed,
        }));
        out.push(Outbound::room(ServerEvent::MovementBudget {
            player_id: current,
            remaining: self.sequencer.remaining_speed(),
        }));
    }

    /// Ends the current turn and starts the next one.
    pub(super) fn end_turn(&mut self, forced: bool, out: &mut Vec<Outbound>) {
        if self.phase != Phase::Turn {
            return;
        }
        self.movement = None;
        if let Some(current) = self.sequencer.current() {
            out.push(Outbound::room(ServerEvent::TurnEnded {
                player_id: current.to_string(),
                forced,
            }));
        }
        let players = &self.players;
        self.sequencer.advance_turn(|id| {
            players
                .iter()
                .find(|p| p.id == id)
                .map(|p| p.stats().speed)
                .unwrap_or(0)
        });
        self.start_turn(out);
    }

    /// Ends the turn once the owner can neither move nor do anything useful
    /// with a remaining action.
    pub(super) fn check_turn_complete(&mut self, out: &mut Vec<Outbound>) {
        if self.phase != Phase::Turn || self.movement.is_some() {
            return;
        }
        let Some(current) = self.sequencer.current().map(str::to_string) else {
            return;
        };
        let Ok(pos) = self.position_of(&current) else {
            return;
        };
        let budget = self.sequencer.remaining_speed().max(0) as u32;
        if super::path::reachable_set(&self.grid, pos, budget).len() > 1 {
            return;
        }
        if self.sequencer.can_perform_action() && self.has_action_target(&current, pos) {
            return;
        }
        self.end_turn(false, out);
    }

    /// Whether a door or an attackable avatar sits next to `pos`.
    fn has_action_target(&self, actor: &str, pos: Position) -> bool {
        let n = self.grid.dimension();
        pos.neighbors(n).any(|p| {
            self.grid.terrain(p).is_some_and(TerrainKind::is_door)
                || self
                    .grid
                    .occupant(p)
                    .is_some_and(|other| self.are_opponents(actor, other))
        })
    }

    pub(super) fn are_opponents(&self, a: &str, b: &str) -> bool {
        if a == b {
            return false;
        }
        match (self.player(a).and_then(|p| p.team), self.player(b).and_then(|p| p.team)) {
            (Some(x), Some(y)) => x != y,
            _ => true,
        }
    }

    /// Turn deadline expired: drop any in-flight movement and move on.
    pub fn force_turn_end(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.phase == Phase::Turn {
            if let Some(plan) = self.movement.as_ref() {
                debug!(
                    target: "skirmish::room",
                    "room {}: cancelling {} queued steps of {}",
                    self.code,
                    plan.steps.len(),
                    escape_log(&plan.player_id)
                );
            }
            self.end_turn(true, &mut out);
        }
        out
    }

    /// Combat round deadline expired: the fighter on the clock acts now.
    /// Humans attack; virtual fighters follow their profile.
    pub fn on_round_timeout(&mut self) -> Vec<Outbound> {
        let Some(actor) = self.combat.as_ref().map(|f| f.active_attacker().to_string()) else {
            return Vec::new();
        };
        let is_virtual = self.player(&actor).is_some_and(|p| p.is_virtual);
        let res = if is_virtual {
            self.virtual_combat_move(&actor)
        } else {
            self.combat_attack(&actor)
        };
        res.unwrap_or_else(|e| {
            warn!(target: "skirmish::combat", "room {}: forced round action failed: {}", self.code, e);
            Vec::new()
        })
    }

    /// Lets a virtual fighter take its round, if it is on the clock.
    pub fn virtual_combat_turn(&mut self) -> Option<Vec<Outbound>> {
        let actor = self.combat.as_ref()?.active_attacker().to_string();
        if !self.player(&actor).is_some_and(|p| p.is_virtual) {
            return None;
        }
        Some(self.virtual_combat_move(&actor).unwrap_or_default())
    }

    fn virtual_combat_move(&mut self, actor: &str) -> Result<Vec<Outbound>, GameError> {
        let fight = self.combat.as_ref().ok_or(GameError::MatchNotRunning)?;
        let player = self
            .player(actor)
            .ok_or_else(|| GameError::UnknownPlayer(actor.to_string()))?;
        let action = decide_virtual(
            player.profile(),
            player.stats().health,
            fight.starting_health(actor),
            fight.escape_remaining(actor),
        );
        match action {
            CombatAction::Attack => self.combat_attack(actor),
            CombatAction::Escape => self.attempt_escape(actor),
        }
    }

    /// One planning pass for a virtual turn owner. `None` when the current
    /// player is human or nothing is due.
    pub fn bot_act(&mut self) -> Option<Vec<Outbound>> {
        if self.phase != Phase::Turn || self.movement.is_some() {
            return None;
        }
        let current = self.sequencer.current()?.to_string();
        if !self.player(&current)?.is_virtual {
            return None;
        }
        let mut out = Vec::new();
        self.bot_steps += 1;
        if self.bot_steps > MAX_BOT_STEPS_PER_TURN {
            self.end_turn(false, &mut out);
            return Some(out);
        }
        let step = {
            let me = self.player(&current)?;
            let opponents = self
                .players
                .iter()
                .filter(|p| self.are_opponents(&current, &p.id))
                .collect();
            let view = BotView {
                me,
                opponents,
                can_act: self.sequencer.can_perform_action(),
                remaining_speed: self.sequencer.remaining_speed().max(0) as u32,
                objective: self.objective_for(me),
            };
            plan_overland(&self.grid, &view)
        };
        let res = match step {
            BotStep::Attack(pos) => self.initiate_attack(&current, AttackTarget::Tile(pos)),
            BotStep::Move(pos) => self.request_move(&current, pos, None),
            BotStep::EndTurn => self.end_turn_voluntary(&current),
        };
        match res {
            Ok(events) => Some(events),
            Err(e) => {
                debug!(target: "skirmish::room", "room {}: bot step rejected: {}", self.code, e);
                self.end_turn(false, &mut out);
                Some(out)
            }
        }
    }

    fn objective_for(&self, me: &Player) -> Option<Position> {
        if self.mode() != GameMode::CaptureTheFlag {
            return None;
        }
        if me.holds(ItemKind::Flag) {
            return me.character.initial_spawn;
        }
        if let Some(flag) = self.grid.positions_with_item(ItemKind::Flag).first() {
            return Some(*flag);
        }
        self.players
            .iter()
            .find(|p| p.holds(ItemKind::Flag) && self.are_opponents(&me.id, &p.id))
            .and_then(Player::position)
    }

    // ---- leaving and ending ----------------------------------------------

    /// Quit or disconnect. Never fails: unknown players are ignored.
    pub fn remove_player(&mut self, id: &str) -> Vec<Outbound> {
        let mut out = Vec::new();
        let Some(index) = self.players.iter().position(|p| p.id == id) else {
            return out;
        };
        info!(target: "skirmish::room", "room {}: {} left", self.code, escape_log(id));

        if self.phase == Phase::WaitingRoom {
            let was_admin = self.players[index].is_admin;
            self.players.remove(index);
            out.push(Outbound::room(ServerEvent::PlayerRemoved {
                player_id: id.to_string(),
            }));
            if was_admin {
                self.phase = Phase::Ended;
                out.push(Outbound::room(ServerEvent::RoomClosed {
                    reason: "admin left the waiting room".to_string(),
                }));
            }
            return out;
        }
        if self.phase == Phase::Ended {
            self.players.remove(index);
            return out;
        }

        if let Some(opponent) = self
            .combat
            .as_ref()
            .and_then(|f| f.opponent_of(id))
            .map(str::to_string)
        {
            self.end_fight(TerminationReason::Forfeit, &opponent, id, &mut out);
            if self.phase == Phase::Ended {
                self.players.retain(|p| p.id != id);
                return out;
            }
        }

        let was_current = self.sequencer.is_current(id);
        if self.movement.as_ref().is_some_and(|m| m.player_id == id) {
            self.movement = None;
        }
        if let Some(pos) = self.players[index].position() {
            let dropped = items::drain_inventory(&mut self.players[index]);
            self.grid.clear_occupant(pos);
            for (item, position) in items::redistribute(&mut self.grid, pos, &dropped, false) {
                out.push(Outbound::room(ServerEvent::ItemDropped { item, position }));
            }
        }
        self.sequencer.remove_player(id);
        self.players.retain(|p| p.id != id);
        out.push(Outbound::room(ServerEvent::PlayerRemoved {
            player_id: id.to_string(),
        }));

        if self.players.len() == 1 {
            let last = self.players[0].id.clone();
            out.push(Outbound::room(ServerEvent::VictoryUpdate {
                winner_id: last.clone(),
                loser_id: None,
                victories: self.players[0].victories,
                is_objective_win: false,
            }));
            self.end_match(vec![last], &mut out);
        } else if self.human_count() == 0 {
            self.end_match(Vec::new(), &mut out);
        } else if was_current {
            self.phase = Phase::Turn;
            self.start_turn(&mut out);
        }
        out
    }

    pub(super) fn end_match(&mut self, winners: Vec<PlayerId>, out: &mut Vec<Outbound>) {
        if self.phase == Phase::Ended {
            return;
        }
        info!(
            target: "skirmish::room",
            "room {}: match over, winners {:?}",
            self.code,
            winners.iter().map(|w| escape_log(w)).collect::<Vec<_>>()
        );
        if self.match_id.is_some() {
            metrics::record_match_end(&self.template.id);
        }
        self.phase = Phase::Ended;
        self.movement = None;
        self.combat = None;
        self.winners = winners.clone();
        out.push(Outbound::room(ServerEvent::MatchEnded { winners }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board_store::sample_board;
    use crate::game::types::{DiceAssignment, Stats};

    fn room() -> RoomState {
        let rules = GameConfig {
            rng_seed: Some(11),
            ..GameConfig::default()
        };
        RoomState::new("1234", sample_board(), rules).unwrap()
    }

    fn player(id: &str, speed: i32) -> Player {
        Player::new(id, Stats::new(6, speed, 4, 4), DiceAssignment::AttackDie)
    }

    #[test]
    fn duplicate_names_get_suffix_and_first_is_admin() {
        let mut r = room();
        let (a, _) = r.join(player("alice", 4)).unwrap();
        let (b, _) = r.join(player("alice", 5)).unwrap();
        assert_eq!(a, "alice");
        assert_eq!(b, "alice-2");
        assert!(r.player("alice").unwrap().is_admin);
        assert!(!r.player("alice-2").unwrap().is_admin);
    }

    #[test]
    fn small_board_holds_two() {
        let mut r = room();
        r.join(player("a", 4)).unwrap();
        r.join(player("b", 4)).unwrap();
        assert_eq!(r.join(player("c", 4)).unwrap_err(), GameError::RoomFull);
    }

    #[test]
    fn locked_room_rejects_joins() {
        let mut r = room();
        r.join(player("a", 4)).unwrap();
        assert!(r.lock_room("b", true).is_err());
        r.lock_room("a", true).unwrap();
        assert_eq!(r.join(player("b", 4)).unwrap_err(), GameError::RoomLocked);
    }

    #[test]
    fn start_orders_by_speed_and_assigns_spawns() {
        let mut r = room();
        r.join(player("slow", 3)).unwrap();
        r.join(player("fast", 6)).unwrap();
        assert!(r.start_match("fast").is_err());
        let out = r.start_match("slow").unwrap();
        assert_eq!(r.sequencer().order(), &["fast".to_string(), "slow".to_string()][..]);
        assert_eq!(r.phase(), Phase::Turn);
        assert!(matches!(out[0].event, ServerEvent::MatchStarted { .. }));
        for p in r.players() {
            let pos = p.position().unwrap();
            assert_eq!(r.grid().occupant(pos), Some(p.id.as_str()));
            assert_eq!(p.character.initial_spawn, Some(pos));
        }
        assert_eq!(r.sequencer().remaining_speed(), 6);
        r.grid().validate().unwrap();
    }

    #[test]
    fn start_needs_two_players() {
        let mut r = room();
        r.join(player("a", 4)).unwrap();
        assert!(r.start_match("a").is_err());
    }

    #[test]
    fn admin_leaving_lobby_closes_room() {
        let mut r = room();
        r.join(player("a", 4)).unwrap();
        r.join(player("b", 4)).unwrap();
        let out = r.remove_player("a");
        assert!(out
            .iter()
            .any(|o| matches!(o.event, ServerEvent::RoomClosed { .. })));
        assert!(r.is_over());
    }

    #[test]
    fn last_player_standing_wins() {
        let mut r = room();
        r.join(player("a", 4)).unwrap();
        r.join(player("b", 5)).unwrap();
        r.start_match("a").unwrap();
        let out = r.remove_player("b");
        assert!(r.is_over());
        assert_eq!(r.winners(), &["a".to_string()][..]);
        assert!(matches!(out.last().map(|o| &o.event), Some(ServerEvent::MatchEnded { .. })));
        assert!(r.handle_intent("a", Intent::EndTurnVoluntary).is_err());
    }
}
