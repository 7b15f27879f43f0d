//! Cost-aware path search and reachability over a [`GridAccess`] board.
//!
//! Costs: Ice 0, Plain/DoorOpen 1, Water 2. Walls, closed doors and tiles
//! occupied by another avatar are never expanded. The start tile is always
//! passable for the player standing on it.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use super::grid::GridAccess;
use super::types::Position;

/// Cost of entering `pos`, or `None` if it is blocked. `start` is exempt
/// from the occupancy check.
fn entry_cost<G: GridAccess + ?Sized>(grid: &G, pos: Position, start: Position) -> Option<u32> {
    let cost = grid.terrain(pos)?.move_cost()?;
    if pos != start && grid.occupant(pos).is_some() {
        return None;
    }
    Some(cost)
}

/// Uniform-cost search. Frontier entries with equal cost pop in discovery
/// order, so results are stable for a given board.
///
/// The returned path excludes `start` and ends at `goal`; it is empty when
/// `start == goal`.
pub fn shortest_path<G: GridAccess + ?Sized>(
    grid: &G,
    start: Position,
    goal: Position,
) -> Option<Vec<Position>> {
    if !grid.contains(start) || !grid.contains(goal) {
        return None;
    }
    if start == goal {
        return Some(Vec::new());
    }
    let n = grid.dimension();
    let mut best: HashMap<Position, u32> = HashMap::new();
    let mut prev: HashMap<Position, Position> = HashMap::new();
    let mut frontier = BinaryHeap::new();
    let mut discovered: u64 = 0;
    best.insert(start, 0);
    frontier.push(Reverse((0u32, discovered, start)));

    while let Some(Reverse((cost, _, pos))) = frontier.pop() {
        if best.get(&pos).is_some_and(|&b| cost > b) {
            continue;
        }
        if pos == goal {
            let mut path = vec![goal];
            let mut cur = goal;
            while let Some(&p) = prev.get(&cur) {
                if p == start {
                    break;
                }
                path.push(p);
                cur = p;
            }
            path.reverse();
            return Some(path);
        }
        for next in pos.neighbors(n) {
            let Some(step) = entry_cost(grid, next, start) else {
                continue;
            };
            let candidate = cost + step;
            if best.get(&next).map_or(true, |&b| candidate < b) {
                best.insert(next, candidate);
                prev.insert(next, pos);
                discovered += 1;
                frontier.push(Reverse((candidate, discovered, next)));
            }
        }
    }
    None
}

/// Every position whose minimal cost from `start` is within `budget`,
/// `start` included.
pub fn reachable_set<G: GridAccess + ?Sized>(
    grid: &G,
    start: Position,
    budget: u32,
) -> BTreeSet<Position> {
    let mut out = BTreeSet::new();
    if !grid.contains(start) {
        return out;
    }
    let n = grid.dimension();
    let mut best: HashMap<Position, u32> = HashMap::new();
    let mut frontier = BinaryHeap::new();
    let mut discovered: u64 = 0;
    best.insert(start, 0);
    frontier.push(Reverse((0u32, discovered, start)));

    while let Some(Reverse((cost, _, pos))) = frontier.pop() {
        if best.get(&pos).is_some_and(|&b| cost > b) {
            continue;
        }
        out.insert(pos);
        for next in pos.neighbors(n) {
            let Some(step) = entry_cost(grid, next, start) else {
                continue;
            };
            let candidate = cost + step;
            if candidate > budget {
                continue;
            }
            if best.get(&next).map_or(true, |&b| candidate < b) {
                best.insert(next, candidate);
                discovered += 1;
                frontier.push(Reverse((candidate, discovered, next)));
            }
        }
    }
    out
}

/// Total traversal cost of a path produced by [`shortest_path`]. `None` if
/// any step is not enterable.
pub fn path_cost<G: GridAccess + ?Sized>(grid: &G, path: &[Position]) -> Option<u32> {
    path.iter()
        .map(|&p| grid.terrain(p).and_then(|t| t.move_cost()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::Grid;
    use crate::game::types::{BoardSize, TerrainKind};

    fn grid() -> Grid {
        Grid::new(BoardSize::Small)
    }

    #[test]
    fn plain_board_cost_equals_length() {
        let g = grid();
        let start = Position::new(0, 0);
        let goal = Position::new(3, 4);
        let path = shortest_path(&g, start, goal).unwrap();
        assert_eq!(path.len(), 7);
        assert_eq!(path_cost(&g, &path), Some(7));
        assert_eq!(path.last(), Some(&goal));
        assert!(!path.contains(&start));
    }

    #[test]
    fn prefers_ice_over_water() {
        let mut g = grid();
        // Direct route along row 0 runs through water; a detour along row 1 is ice.
        for c in 1..4 {
            g.set_terrain(Position::new(0, c), TerrainKind::Water).unwrap();
            g.set_terrain(Position::new(1, c), TerrainKind::Ice).unwrap();
        }
        let path = shortest_path(&g, Position::new(0, 0), Position::new(0, 4)).unwrap();
        let cost = path_cost(&g, &path).unwrap();
        // down (1) + three ice (0) + across to (1,4) (1) + up (1)
        assert_eq!(cost, 3);
        assert!(path.contains(&Position::new(1, 2)));
    }

    #[test]
    fn walls_doors_and_occupants_block() {
        let mut g = grid();
        for r in 0..10 {
            g.set_terrain(Position::new(r, 5), TerrainKind::Wall).unwrap();
        }
        assert!(shortest_path(&g, Position::new(0, 0), Position::new(0, 9)).is_none());

        g.set_terrain(Position::new(4, 5), TerrainKind::DoorClosed).unwrap();
        assert!(shortest_path(&g, Position::new(0, 0), Position::new(0, 9)).is_none());

        g.toggle_door(Position::new(4, 5)).unwrap();
        assert!(shortest_path(&g, Position::new(0, 0), Position::new(0, 9)).is_some());

        g.place_occupant(Position::new(4, 5), "bob").unwrap();
        assert!(shortest_path(&g, Position::new(0, 0), Position::new(0, 9)).is_none());
    }

    #[test]
    fn own_tile_does_not_block() {
        let mut g = grid();
        g.place_occupant(Position::new(0, 0), "alice").unwrap();
        assert!(shortest_path(&g, Position::new(0, 0), Position::new(0, 2)).is_some());
        let reach = reachable_set(&g, Position::new(0, 0), 1);
        assert!(reach.contains(&Position::new(0, 0)));
        assert_eq!(reach.len(), 3);
    }

    #[test]
    fn occupied_goal_is_unreachable() {
        let mut g = grid();
        g.place_occupant(Position::new(0, 3), "bob").unwrap();
        assert!(shortest_path(&g, Position::new(0, 0), Position::new(0, 3)).is_none());
    }

    #[test]
    fn reachable_respects_budget_and_costs() {
        let mut g = grid();
        g.set_terrain(Position::new(0, 1), TerrainKind::Water).unwrap();
        let reach = reachable_set(&g, Position::new(0, 0), 2);
        assert!(reach.contains(&Position::new(0, 1)));
        assert!(!reach.contains(&Position::new(0, 2)));
        assert!(reach.contains(&Position::new(2, 0)));
        assert!(reach.contains(&Position::new(1, 1)));
    }

    #[test]
    fn search_is_deterministic() {
        let g = grid();
        let a = shortest_path(&g, Position::new(0, 0), Position::new(5, 5));
        let b = shortest_path(&g, Position::new(0, 0), Position::new(5, 5));
        assert_eq!(a, b);
    }

    #[test]
    fn never_costlier_than_alternatives() {
        let mut g = grid();
        g.set_terrain(Position::new(1, 1), TerrainKind::Water).unwrap();
        g.set_terrain(Position::new(1, 2), TerrainKind::Water).unwrap();
        g.set_terrain(Position::new(2, 1), TerrainKind::Ice).unwrap();
        let path = shortest_path(&g, Position::new(1, 0), Position::new(1, 3)).unwrap();
        let cost = path_cost(&g, &path).unwrap();
        // Straight through water costs 2 + 2 + 1 = 5.
        let straight = [Position::new(1, 1), Position::new(1, 2), Position::new(1, 3)];
        assert!(cost <= path_cost(&g, &straight).unwrap());
        assert_eq!(cost, 4);
    }
}
