//! Overland planner for virtual players.

use super::grid::GridAccess;
use super::path::reachable_set;
use super::types::{Player, Position, VirtualProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStep {
    Attack(Position),
    Move(Position),
    EndTurn,
}

/// What the bot can see when it plans one step of its turn.
pub struct BotView<'a> {
    pub me: &'a Player,
    pub opponents: Vec<&'a Player>,
    pub can_act: bool,
    pub remaining_speed: u32,
    /// Capture-the-flag target: the flag, or the bot's own spawn when it
    /// already carries it.
    pub objective: Option<Position>,
}

fn closest(from: Position, targets: &[Position]) -> Option<usize> {
    targets.iter().map(|t| t.manhattan(from)).min()
}

pub fn plan_overland<G: GridAccess + ?Sized>(grid: &G, view: &BotView<'_>) -> BotStep {
    let Some(here) = view.me.position() else {
        return BotStep::EndTurn;
    };
    let opponent_tiles: Vec<Position> = view.opponents.iter().filter_map(|p| p.position()).collect();
    let profile = view.me.profile();

    let willing_to_fight = match profile {
        VirtualProfile::Aggressive => true,
        VirtualProfile::Defensive => {
            view.me.stats().health >= view.me.character.base_stats.health
        }
    };
    if view.can_act && willing_to_fight {
        if let Some(target) = opponent_tiles.iter().find(|t| t.is_adjacent(here)) {
            return BotStep::Attack(*target);
        }
    }

    let reach = reachable_set(grid, here, view.remaining_speed);
    let goal = match profile {
        VirtualProfile::Aggressive => match view.objective {
            Some(obj) => vec![obj],
            None => opponent_tiles.clone(),
        },
        VirtualProfile::Defensive => {
            if view.me.free_slot().is_none() {
                return BotStep::EndTurn;
            }
            let loot: Vec<Position> = reach
                .iter()
                .copied()
                .filter(|p| grid.item(*p).is_some_and(|i| i.is_collectible()))
                .collect();
            if loot.is_empty() {
                return BotStep::EndTurn;
            }
            loot
        }
    };

    let current = closest(here, &goal);
    // BTreeSet iteration keeps ties deterministic.
    let best = reach
        .iter()
        .copied()
        .filter_map(|p| closest(p, &goal).map(|d| (d, p)))
        .min_by_key(|(d, _)| *d);
    match (best, current) {
        (Some((d, p)), Some(cur)) if d < cur && p != here => BotStep::Move(p),
        _ => BotStep::EndTurn,
    }
}
