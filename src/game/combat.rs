//! One-on-one fight state machine.
//!
//! A [`CombatInstance`] holds only the fight bookkeeping: who is in it, whose
//! round it is, and how many escape attempts each side has left. Dice, stat
//! modifiers and the damage rule live in free functions so the room can drive
//! them with its own seeded RNG. Termination side effects (respawn, loot
//! redistribution, victories) touch the grid and players and are applied by
//! the room.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::items::{amulet_bonus, POTION_HEAL};
use super::types::{ItemKind, Player, PlayerId, VirtualProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CombatAction {
    Attack,
    Escape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminationReason {
    Death,
    Escape,
    Forfeit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiceRoll {
    pub player_id: PlayerId,
    pub sides: u8,
    pub value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackOutcome {
    pub succeeded: bool,
    pub impact: i32,
}

/// The damage rule: a hit lands for exactly one point when attack beats
/// defense, otherwise nothing happens.
pub fn resolve_attack(attack: i32, defense: i32) -> AttackOutcome {
    if attack - defense > 0 {
        AttackOutcome {
            succeeded: true,
            impact: 1,
        }
    } else {
        AttackOutcome {
            succeeded: false,
            impact: 0,
        }
    }
}

/// Rolls a die with `sides` faces, or returns `fixed` when set.
pub fn roll_die<R: Rng + ?Sized>(rng: &mut R, sides: u8, fixed: Option<u8>) -> u8 {
    match fixed {
        Some(v) => v.clamp(1, sides.max(1)),
        None => rng.gen_range(1..=sides.max(1)),
    }
}

/// Per-resolution modifiers the room computes from the board and config.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeContext {
    pub debug_dice: bool,
    pub attacker_on_ice: bool,
    pub defender_on_ice: bool,
    pub ice_penalty: i32,
    pub defender_potion_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeResult {
    pub attack_roll: DiceRoll,
    pub defense_roll: DiceRoll,
    pub attack_total: i32,
    pub defense_total: i32,
    pub outcome: AttackOutcome,
    pub potion_used: bool,
    pub defender_health: i32,
}

impl ExchangeResult {
    pub fn lethal(&self) -> bool {
        self.defender_health <= 0
    }
}

/// One attack resolution: rolls both dice, applies ice and amulet modifiers,
/// and mutates the defender's health.
pub fn resolve_exchange<R: Rng + ?Sized>(
    rng: &mut R,
    attacker: &Player,
    defender: &mut Player,
    ctx: ExchangeContext,
) -> ExchangeResult {
    let attack_sides = attacker.character.dice.attack_sides();
    let defense_sides = defender.character.dice.defense_sides();
    let (atk_fixed, def_fixed) = if ctx.debug_dice {
        (Some(attack_sides), Some(1))
    } else {
        (None, None)
    };
    let attack_value = roll_die(rng, attack_sides, atk_fixed);
    let defense_value = roll_die(rng, defense_sides, def_fixed);

    let mut attack_total = attacker.stats().attack
        + attack_value as i32
        + amulet_bonus(attacker, defender.stats().health);
    let mut defense_total = defender.stats().defense + defense_value as i32;
    if ctx.attacker_on_ice {
        attack_total -= ctx.ice_penalty;
    }
    if ctx.defender_on_ice {
        defense_total -= ctx.ice_penalty;
    }

    let outcome = resolve_attack(attack_total, defense_total);
    let mut potion_used = false;
    if outcome.succeeded {
        let health = defender.character.stats.health;
        if ctx.defender_potion_ready && defender.holds(ItemKind::Potion) && health <= 2 {
            defender.character.stats.health = health + POTION_HEAL;
            potion_used = true;
        }
        defender.character.stats.health -= outcome.impact;
    }

    ExchangeResult {
        attack_roll: DiceRoll {
            player_id: attacker.id.clone(),
            sides: attack_sides,
            value: attack_value,
        },
        defense_roll: DiceRoll {
            player_id: defender.id.clone(),
            sides: defense_sides,
            value: defense_value,
        },
        attack_total,
        defense_total,
        outcome,
        potion_used,
        defender_health: defender.character.stats.health,
    }
}

/// Decision policy for a virtual combatant.
pub fn decide_virtual(
    profile: VirtualProfile,
    health: i32,
    starting_health: i32,
    escapes_left: u8,
) -> CombatAction {
    match profile {
        VirtualProfile::Aggressive => CombatAction::Attack,
        VirtualProfile::Defensive => {
            if health >= starting_health || escapes_left == 0 {
                CombatAction::Attack
            } else {
                CombatAction::Escape
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapeOutcome {
    pub succeeded: bool,
    pub attempts_remaining: u8,
}

#[derive(Debug, Clone)]
pub struct CombatInstance {
    participants: [PlayerId; 2],
    initiator: PlayerId,
    escape_remaining: HashMap<PlayerId, u8>,
    starting_health: HashMap<PlayerId, i32>,
    potion_used: HashSet<PlayerId>,
    active: usize,
    attack_used_this_round: bool,
    round: u32,
}

impl CombatInstance {
    /// `a` initiated the fight against `b`. The faster fighter opens; a
    /// speed tie goes to the initiator.
    pub fn new(a: &Player, b: &Player, escape_attempts: u8) -> Self {
        let participants = if b.stats().speed > a.stats().speed {
            [b.id.clone(), a.id.clone()]
        } else {
            [a.id.clone(), b.id.clone()]
        };
        CombatInstance {
            escape_remaining: participants
                .iter()
                .map(|p| (p.clone(), escape_attempts))
                .collect(),
            starting_health: HashMap::from([
                (a.id.clone(), a.stats().health),
                (b.id.clone(), b.stats().health),
            ]),
            participants,
            initiator: a.id.clone(),
            potion_used: HashSet::new(),
            active: 0,
            attack_used_this_round: false,
            round: 1,
        }
    }

    pub fn participants(&self) -> &[PlayerId; 2] {
        &self.participants
    }

    pub fn initiator(&self) -> &str {
        &self.initiator
    }

    pub fn is_participant(&self, player_id: &str) -> bool {
        self.participants.iter().any(|p| p == player_id)
    }

    pub fn active_attacker(&self) -> &str {
        &self.participants[self.active]
    }

    pub fn defender(&self) -> &str {
        &self.participants[1 - self.active]
    }

    pub fn opponent_of(&self, player_id: &str) -> Option<&str> {
        match self.participants.iter().position(|p| p == player_id) {
            Some(i) => Some(&self.participants[1 - i]),
            None => None,
        }
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn attack_used_this_round(&self) -> bool {
        self.attack_used_this_round
    }

    pub fn mark_attack_used(&mut self) {
        self.attack_used_this_round = true;
    }

    pub fn escape_remaining(&self, player_id: &str) -> u8 {
        self.escape_remaining.get(player_id).copied().unwrap_or(0)
    }

    pub fn starting_health(&self, player_id: &str) -> i32 {
        self.starting_health.get(player_id).copied().unwrap_or(0)
    }

    pub fn potion_ready(&self, player_id: &str) -> bool {
        !self.potion_used.contains(player_id)
    }

    pub fn consume_potion(&mut self, player_id: &str) {
        self.potion_used.insert(player_id.to_string());
    }

    /// Records an escape attempt. With no attempts left the attempt fails
    /// and the counter stays at zero; otherwise one attempt is spent and
    /// `roll_succeeded` decides the outcome.
    pub fn try_escape(&mut self, player_id: &str, roll_succeeded: bool) -> EscapeOutcome {
        let Some(left) = self.escape_remaining.get_mut(player_id) else {
            return EscapeOutcome {
                succeeded: false,
                attempts_remaining: 0,
            };
        };
        if *left == 0 {
            return EscapeOutcome {
                succeeded: false,
                attempts_remaining: 0,
            };
        }
        *left -= 1;
        EscapeOutcome {
            succeeded: roll_succeeded,
            attempts_remaining: *left,
        }
    }

    /// Hands the round to the other fighter.
    pub fn end_round(&mut self) -> &str {
        self.active = 1 - self.active;
        self.attack_used_this_round = false;
        self.round += 1;
        self.active_attacker()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::{DiceAssignment, Stats};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fighter(id: &str, stats: Stats) -> Player {
        Player::new(id, stats, DiceAssignment::AttackDie)
    }

    #[test]
    fn damage_rule() {
        assert_eq!(
            resolve_attack(10, 8),
            AttackOutcome {
                succeeded: true,
                impact: 1
            }
        );
        assert_eq!(resolve_attack(8, 8).impact, 0);
        assert!(!resolve_attack(3, 9).succeeded);
    }

    #[test]
    fn faster_fighter_opens_and_ties_go_to_initiator() {
        let a = fighter("a", Stats::new(4, 4, 4, 4));
        let b = fighter("b", Stats::new(4, 6, 4, 4));
        let fight = CombatInstance::new(&a, &b, 2);
        assert_eq!(fight.active_attacker(), "b");
        let c = fighter("c", Stats::new(4, 4, 4, 4));
        let fight = CombatInstance::new(&a, &c, 2);
        assert_eq!(fight.active_attacker(), "a");
        assert_eq!(fight.defender(), "c");
    }

    #[test]
    fn escape_attempts_are_bounded() {
        let a = fighter("a", Stats::new(4, 4, 4, 4));
        let b = fighter("b", Stats::new(4, 4, 4, 4));
        let mut fight = CombatInstance::new(&a, &b, 2);
        assert_eq!(fight.try_escape("a", false).attempts_remaining, 1);
        assert_eq!(fight.try_escape("a", false).attempts_remaining, 0);
        let third = fight.try_escape("a", true);
        assert!(!third.succeeded);
        assert_eq!(third.attempts_remaining, 0);
        assert_eq!(fight.escape_remaining("a"), 0);
        assert_eq!(fight.escape_remaining("b"), 2);
    }

    #[test]
    fn rounds_alternate() {
        let a = fighter("a", Stats::new(4, 4, 4, 4));
        let b = fighter("b", Stats::new(4, 4, 4, 4));
        let mut fight = CombatInstance::new(&a, &b, 2);
        fight.mark_attack_used();
        assert_eq!(fight.end_round(), "b");
        assert!(!fight.attack_used_this_round());
        assert_eq!(fight.end_round(), "a");
        assert_eq!(fight.round(), 3);
    }

    #[test]
    fn debug_dice_are_fixed() {
        let mut rng = StdRng::seed_from_u64(7);
        let attacker = fighter("a", Stats::new(6, 4, 4, 4));
        let mut defender = fighter("d", Stats::new(6, 4, 4, 4));
        let ctx = ExchangeContext {
            debug_dice: true,
            ..Default::default()
        };
        let res = resolve_exchange(&mut rng, &attacker, &mut defender, ctx);
        assert_eq!(res.attack_roll.value, 6);
        assert_eq!(res.defense_roll.value, 1);
        assert_eq!(res.attack_total, 10);
        assert_eq!(res.defense_total, 5);
        assert!(res.outcome.succeeded);
        assert_eq!(defender.stats().health, 5);
    }

    #[test]
    fn ice_penalty_applies_per_side() {
        let mut rng = StdRng::seed_from_u64(1);
        let attacker = fighter("a", Stats::new(6, 4, 4, 4));
        let mut defender = fighter("d", Stats::new(6, 4, 4, 7));
        let ctx = ExchangeContext {
            debug_dice: true,
            attacker_on_ice: true,
            ice_penalty: 2,
            ..Default::default()
        };
        // 4 + 6 - 2 = 8 vs 7 + 1 = 8: no hit.
        let res = resolve_exchange(&mut rng, &attacker, &mut defender, ctx);
        assert!(!res.outcome.succeeded);
        assert_eq!(defender.stats().health, 6);
    }

    #[test]
    fn potion_saves_a_low_defender_once() {
        let mut rng = StdRng::seed_from_u64(3);
        let attacker = fighter("a", Stats::new(6, 4, 9, 4));
        let mut defender = fighter("d", Stats::new(1, 4, 4, 0));
        defender.inventory[0] = Some(ItemKind::Potion);
        let ctx = ExchangeContext {
            debug_dice: true,
            defender_potion_ready: true,
            ..Default::default()
        };
        let res = resolve_exchange(&mut rng, &attacker, &mut defender, ctx);
        assert!(res.potion_used);
        assert_eq!(res.defender_health, 2);
        assert!(!res.lethal());
    }

    #[test]
    fn potion_heals_on_any_hit_at_low_health() {
        let mut rng = StdRng::seed_from_u64(3);
        let attacker = fighter("a", Stats::new(6, 4, 9, 4));
        let ctx = ExchangeContext {
            debug_dice: true,
            defender_potion_ready: true,
            ..Default::default()
        };

        // Not a lethal hit, but health is at 2: the potion still fires.
        let mut low = fighter("d", Stats::new(2, 4, 4, 0));
        low.inventory[0] = Some(ItemKind::Potion);
        let res = resolve_exchange(&mut rng, &attacker, &mut low, ctx);
        assert!(res.potion_used);
        assert_eq!(res.defender_health, 3);

        let mut healthy = fighter("d", Stats::new(3, 4, 4, 0));
        healthy.inventory[0] = Some(ItemKind::Potion);
        let res = resolve_exchange(&mut rng, &attacker, &mut healthy, ctx);
        assert!(!res.potion_used);
        assert_eq!(res.defender_health, 2);
    }

    #[test]
    fn virtual_policy() {
        use VirtualProfile::*;
        assert_eq!(decide_virtual(Aggressive, 1, 6, 2), CombatAction::Attack);
        assert_eq!(decide_virtual(Defensive, 6, 6, 2), CombatAction::Attack);
        assert_eq!(decide_virtual(Defensive, 5, 6, 2), CombatAction::Escape);
        assert_eq!(decide_virtual(Defensive, 5, 6, 0), CombatAction::Attack);
    }
}
