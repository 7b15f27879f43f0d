//! Item effects and item redistribution.

use log::warn;
use std::collections::{HashSet, VecDeque};

use super::grid::GridAccess;
use super::types::{Character, ItemKind, Player, Position};

/// Stat deltas granted immediately on pickup: (attack, defense, speed).
/// Passive-only items and objective items grant nothing here.
const fn pickup_delta(item: ItemKind) -> Option<(i32, i32, i32)> {
    match item {
        ItemKind::Sword => Some((2, 0, 0)),
        ItemKind::Shield => Some((0, 2, 0)),
        ItemKind::Boots => Some((0, 0, 1)),
        ItemKind::Armor => Some((0, 2, -1)),
        _ => None,
    }
}

pub const AMULET_ATTACK_BONUS: i32 = 2;
pub const POTION_HEAL: i32 = 2;

/// Applies an item's pickup effect to the character. Speed changes only
/// matter from the next turn because the budget is fixed at turn start.
pub fn apply_pickup_effect(character: &mut Character, item: ItemKind) {
    if let Some((atk, def, spd)) = pickup_delta(item) {
        if character.active_effects.insert(item) {
            character.stats.attack += atk;
            character.stats.defense += def;
            character.stats.speed += spd;
        }
    }
}

pub fn revert_effect(character: &mut Character, item: ItemKind) {
    if let Some((atk, def, spd)) = pickup_delta(item) {
        if character.active_effects.remove(&item) {
            character.stats.attack -= atk;
            character.stats.defense -= def;
            character.stats.speed -= spd;
        }
    }
}

/// Adds an item to the first free slot and applies its effect. Returns
/// `false` (leaving the player untouched) when both slots are taken.
pub fn add_to_inventory(player: &mut Player, item: ItemKind) -> bool {
    let Some(slot) = player.free_slot() else {
        return false;
    };
    player.inventory[slot] = Some(item);
    // A second copy of the same item does not stack its effect.
    apply_pickup_effect(&mut player.character, item);
    true
}

/// Removes one copy of `item` from the inventory, reverting its effect when
/// no other copy remains.
pub fn remove_from_inventory(player: &mut Player, item: ItemKind) -> bool {
    let Some(slot) = player.inventory.iter().position(|s| *s == Some(item)) else {
        return false;
    };
    player.inventory[slot] = None;
    if !player.holds(item) {
        revert_effect(&mut player.character, item);
    }
    true
}

/// Empties the inventory, reverting every effect, and returns the items.
pub fn drain_inventory(player: &mut Player) -> Vec<ItemKind> {
    let items = player.items();
    for item in &items {
        revert_effect(&mut player.character, *item);
    }
    player.inventory = Default::default();
    items
}

/// Amulet bonus for a resolution where the holder trails on health.
pub fn amulet_bonus(holder: &Player, opponent_health: i32) -> i32 {
    if holder.holds(ItemKind::Amulet) && holder.stats().health < opponent_health {
        AMULET_ATTACK_BONUS
    } else {
        0
    }
}

/// Empty tiles in breadth-first order from `origin`, walking through any
/// traversable tile (occupied or not). The origin itself is skipped when
/// `exclude_origin` is set. Returns at most `count` positions.
pub fn nearest_empty_tiles<G: GridAccess + ?Sized>(
    grid: &G,
    origin: Position,
    count: usize,
    exclude_origin: bool,
) -> Vec<Position> {
    let mut found = Vec::new();
    if count == 0 || !grid.contains(origin) {
        return found;
    }
    let n = grid.dimension();
    let mut seen = HashSet::from([origin]);
    let mut queue = VecDeque::from([origin]);
    while let Some(pos) = queue.pop_front() {
        if !(exclude_origin && pos == origin) && grid.is_empty_tile(pos) {
            found.push(pos);
            if found.len() == count {
                return found;
            }
        }
        for next in pos.neighbors(n) {
            let walkable = grid.terrain(next).is_some_and(|t| t.is_traversable());
            if walkable && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }

    // Connected area saturated: fall back to any empty tile on the board,
    // closest first.
    let mut rest: Vec<Position> = (0..n * n)
        .map(|i| Position::new(i / n, i % n))
        .filter(|p| !(exclude_origin && *p == origin))
        .filter(|p| !found.contains(p) && grid.is_empty_tile(*p))
        .collect();
    rest.sort_by_key(|p| (p.manhattan(origin), *p));
    found.extend(rest.into_iter().take(count - found.len()));
    found
}

/// Places each item on the nearest empty tile around `origin`. Items that
/// find no room anywhere on the board are dropped with a warning.
pub fn redistribute<G: GridAccess + ?Sized>(
    grid: &mut G,
    origin: Position,
    items: &[ItemKind],
    exclude_origin: bool,
) -> Vec<(ItemKind, Position)> {
    let targets = nearest_empty_tiles(&*grid, origin, items.len(), exclude_origin);
    let mut placed = Vec::with_capacity(items.len());
    for (item, pos) in items.iter().zip(targets.iter()) {
        if grid.place_item(*pos, *item).is_ok() {
            placed.push((*item, *pos));
        }
    }
    if placed.len() < items.len() {
        warn!(
            target: "skirmish::items",
            "board saturated: {} of {} items around {} could not be placed",
            items.len() - placed.len(),
            items.len(),
            origin
        );
    }
    placed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::Grid;
    use crate::game::types::{BoardSize, DiceAssignment, Stats, TerrainKind};

    fn player() -> Player {
        Player::new("alice", Stats::new(6, 4, 4, 4), DiceAssignment::AttackDie)
    }

    #[test]
    fn pickup_effects_apply_and_revert() {
        let mut p = player();
        assert!(add_to_inventory(&mut p, ItemKind::Sword));
        assert!(add_to_inventory(&mut p, ItemKind::Armor));
        assert_eq!(p.stats().attack, 6);
        assert_eq!(p.stats().defense, 6);
        assert_eq!(p.stats().speed, 3);
        assert!(!add_to_inventory(&mut p, ItemKind::Shield));
        assert!(remove_from_inventory(&mut p, ItemKind::Armor));
        assert_eq!(p.stats().defense, 4);
        assert_eq!(p.stats().speed, 4);
        let drained = drain_inventory(&mut p);
        assert_eq!(drained, vec![ItemKind::Sword]);
        assert_eq!(*p.stats(), p.character.base_stats);
    }

    #[test]
    fn passive_items_change_nothing_on_pickup() {
        let mut p = player();
        add_to_inventory(&mut p, ItemKind::Potion);
        add_to_inventory(&mut p, ItemKind::Amulet);
        assert_eq!(*p.stats(), p.character.base_stats);
        assert!(p.character.active_effects.is_empty());
        assert_eq!(amulet_bonus(&p, 7), AMULET_ATTACK_BONUS);
        assert_eq!(amulet_bonus(&p, 6), 0);
    }

    #[test]
    fn duplicate_items_do_not_stack() {
        let mut p = player();
        add_to_inventory(&mut p, ItemKind::Sword);
        add_to_inventory(&mut p, ItemKind::Sword);
        assert_eq!(p.stats().attack, 6);
        remove_from_inventory(&mut p, ItemKind::Sword);
        assert_eq!(p.stats().attack, 6);
        remove_from_inventory(&mut p, ItemKind::Sword);
        assert_eq!(p.stats().attack, 4);
    }

    #[test]
    fn redistribution_skips_origin_and_full_tiles() {
        let mut g = Grid::new(BoardSize::Small);
        let origin = Position::new(5, 5);
        g.place_item(Position::new(4, 5), ItemKind::Flag).unwrap();
        g.place_occupant(Position::new(6, 5), "bob").unwrap();
        let placed = redistribute(&mut g, origin, &[ItemKind::Sword, ItemKind::Shield], true);
        assert_eq!(
            placed,
            vec![
                (ItemKind::Sword, Position::new(5, 4)),
                (ItemKind::Shield, Position::new(5, 6)),
            ]
        );
        assert_eq!(g.item(origin), None);
    }

    #[test]
    fn redistribution_falls_back_outside_walled_area() {
        let mut g = Grid::new(BoardSize::Small);
        // Seal (0,0) in a pocket with walls at (0,1) and (1,0).
        g.set_terrain(Position::new(0, 1), TerrainKind::Wall).unwrap();
        g.set_terrain(Position::new(1, 0), TerrainKind::Wall).unwrap();
        let placed = redistribute(&mut g, Position::new(0, 0), &[ItemKind::Potion], true);
        // Distance 2 candidates are (0,2), (1,1), (2,0); row-major order wins.
        assert_eq!(placed, vec![(ItemKind::Potion, Position::new(0, 2))]);
    }

    #[test]
    fn saturated_board_loses_items() {
        let mut g = Grid::new(BoardSize::Small);
        for row in 0..10 {
            for col in 0..10 {
                g.place_item(Position::new(row, col), ItemKind::Spawn).unwrap();
            }
        }
        let placed = redistribute(&mut g, Position::new(0, 0), &[ItemKind::Sword], false);
        assert!(placed.is_empty());
    }
}
