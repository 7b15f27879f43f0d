//! Core value types shared by the grid, the sequencer and the combat engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Players are identified by their username, unique within a room.
pub type PlayerId = String;

/// Number of inventory slots every character carries.
pub const INVENTORY_SLOTS: usize = 2;

/// A (row, col) coordinate on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub fn manhattan(self, other: Position) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }

    pub fn is_adjacent(self, other: Position) -> bool {
        self.manhattan(other) == 1
    }

    /// 4-directional neighbours inside a `dimension`-sized board, in
    /// up, down, left, right order.
    pub fn neighbors(self, dimension: usize) -> impl Iterator<Item = Position> {
        let up = self.row.checked_sub(1).map(|r| Position::new(r, self.col));
        let down = (self.row + 1 < dimension).then(|| Position::new(self.row + 1, self.col));
        let left = self.col.checked_sub(1).map(|c| Position::new(self.row, c));
        let right = (self.col + 1 < dimension).then(|| Position::new(self.row, self.col + 1));
        [up, down, left, right].into_iter().flatten()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerrainKind {
    Plain,
    Ice,
    Water,
    Wall,
    DoorOpen,
    DoorClosed,
}

impl TerrainKind {
    pub const fn is_traversable(self) -> bool {
        !matches!(self, TerrainKind::Wall | TerrainKind::DoorClosed)
    }

    pub const fn is_door(self) -> bool {
        matches!(self, TerrainKind::DoorOpen | TerrainKind::DoorClosed)
    }

    /// Movement points spent entering a tile of this terrain; `None` if it
    /// cannot be entered at all.
    pub const fn move_cost(self) -> Option<u32> {
        match self {
            TerrainKind::Ice => Some(0),
            TerrainKind::Plain | TerrainKind::DoorOpen => Some(1),
            TerrainKind::Water => Some(2),
            TerrainKind::Wall | TerrainKind::DoorClosed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DoorState {
    Open,
    Closed,
}

impl DoorState {
    pub const fn terrain(self) -> TerrainKind {
        match self {
            DoorState::Open => TerrainKind::DoorOpen,
            DoorState::Closed => TerrainKind::DoorClosed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemKind {
    Sword,
    Shield,
    Boots,
    Armor,
    /// Passive: once per fight, a hit landing at 2 health or less heals
    /// the holder before the damage applies.
    Potion,
    /// Passive: attack bonus while the holder is behind on health.
    Amulet,
    /// Door toggles stop consuming the turn action.
    MasterKey,
    /// Capture-the-flag objective.
    Flag,
    /// Start tile marker; never collected.
    Spawn,
}

impl ItemKind {
    pub const fn is_collectible(self) -> bool {
        !matches!(self, ItemKind::Spawn)
    }

    /// Items whose effect only fires at use-time instead of on pickup.
    pub const fn is_passive_only(self) -> bool {
        matches!(self, ItemKind::Potion | ItemKind::Amulet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub health: i32,
    pub speed: i32,
    pub attack: i32,
    pub defense: i32,
}

impl Stats {
    pub const fn new(health: i32, speed: i32, attack: i32, defense: i32) -> Self {
        Self {
            health,
            speed,
            attack,
            defense,
        }
    }
}

/// Which of the two stats gets the six-sided die; the other gets a d4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiceAssignment {
    AttackDie,
    DefenseDie,
}

impl DiceAssignment {
    pub const fn attack_sides(self) -> u8 {
        match self {
            DiceAssignment::AttackDie => 6,
            DiceAssignment::DefenseDie => 4,
        }
    }

    pub const fn defense_sides(self) -> u8 {
        match self {
            DiceAssignment::AttackDie => 4,
            DiceAssignment::DefenseDie => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VirtualProfile {
    Aggressive,
    Defensive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Current stats, item effects included.
    pub stats: Stats,
    /// Stats at character creation; restored after a defeat.
    pub base_stats: Stats,
    pub dice: DiceAssignment,
    pub position: Option<Position>,
    pub initial_spawn: Option<Position>,
    /// Held items whose pickup effect is currently applied to `stats`.
    pub active_effects: BTreeSet<ItemKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub character: Character,
    pub inventory: [Option<ItemKind>; INVENTORY_SLOTS],
    pub is_admin: bool,
    pub is_virtual: bool,
    pub virtual_profile: Option<VirtualProfile>,
    #[serde(default)]
    pub team: Option<u8>,
    #[serde(default)]
    pub victories: u32,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, stats: Stats, dice: DiceAssignment) -> Self {
        Player {
            id: id.into(),
            character: Character {
                stats,
                base_stats: stats,
                dice,
                position: None,
                initial_spawn: None,
                active_effects: BTreeSet::new(),
            },
            inventory: [None; INVENTORY_SLOTS],
            is_admin: false,
            is_virtual: false,
            virtual_profile: None,
            team: None,
            victories: 0,
        }
    }

    pub fn virtual_player(
        id: impl Into<PlayerId>,
        stats: Stats,
        dice: DiceAssignment,
        profile: VirtualProfile,
    ) -> Self {
        let mut player = Player::new(id, stats, dice);
        player.is_virtual = true;
        player.virtual_profile = Some(profile);
        player
    }

    pub fn position(&self) -> Option<Position> {
        self.character.position
    }

    pub fn stats(&self) -> &Stats {
        &self.character.stats
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.inventory.iter().position(Option::is_none)
    }

    pub fn holds(&self, item: ItemKind) -> bool {
        self.inventory.contains(&Some(item))
    }

    pub fn items(&self) -> Vec<ItemKind> {
        self.inventory.iter().flatten().copied().collect()
    }

    pub fn is_defeated(&self) -> bool {
        self.character.stats.health <= 0
    }

    pub fn profile(&self) -> VirtualProfile {
        self.virtual_profile.unwrap_or(VirtualProfile::Aggressive)
    }
}

/// Board dimension class; fixes the grid size and room capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BoardSize {
    Small,
    Medium,
    Large,
}

impl BoardSize {
    pub fn from_dimension(dimension: usize) -> Option<Self> {
        match dimension {
            10 => Some(BoardSize::Small),
            15 => Some(BoardSize::Medium),
            20 => Some(BoardSize::Large),
            _ => None,
        }
    }

    pub const fn dimension(self) -> usize {
        match self {
            BoardSize::Small => 10,
            BoardSize::Medium => 15,
            BoardSize::Large => 20,
        }
    }

    pub const fn capacity(self) -> usize {
        match self {
            BoardSize::Small => 2,
            BoardSize::Medium => 4,
            BoardSize::Large => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameMode {
    Classic,
    CaptureTheFlag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub terrain: TerrainKind,
    pub occupant: Option<PlayerId>,
    pub item: Option<ItemKind>,
    pub position: Position,
}

impl Tile {
    pub fn new(terrain: TerrainKind, position: Position) -> Self {
        Tile {
            terrain,
            occupant: None,
            item: None,
            position,
        }
    }

    /// Traversable, unoccupied and without an item.
    pub fn is_empty(&self) -> bool {
        self.terrain.is_traversable() && self.occupant.is_none() && self.item.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbors_clip_at_edges() {
        let corner: Vec<_> = Position::new(0, 0).neighbors(10).collect();
        assert_eq!(corner, vec![Position::new(1, 0), Position::new(0, 1)]);
        let far: Vec<_> = Position::new(9, 9).neighbors(10).collect();
        assert_eq!(far, vec![Position::new(8, 9), Position::new(9, 8)]);
        assert_eq!(Position::new(4, 4).neighbors(10).count(), 4);
    }

    #[test]
    fn terrain_costs() {
        assert_eq!(TerrainKind::Ice.move_cost(), Some(0));
        assert_eq!(TerrainKind::Plain.move_cost(), Some(1));
        assert_eq!(TerrainKind::DoorOpen.move_cost(), Some(1));
        assert_eq!(TerrainKind::Water.move_cost(), Some(2));
        assert_eq!(TerrainKind::Wall.move_cost(), None);
        assert_eq!(TerrainKind::DoorClosed.move_cost(), None);
    }

    #[test]
    fn board_capacity_follows_size() {
        assert_eq!(BoardSize::from_dimension(10).map(BoardSize::capacity), Some(2));
        assert_eq!(BoardSize::from_dimension(15).map(BoardSize::capacity), Some(4));
        assert_eq!(BoardSize::from_dimension(20).map(BoardSize::capacity), Some(6));
        assert!(BoardSize::from_dimension(12).is_none());
    }

    #[test]
    fn inventory_slots() {
        let mut p = Player::new("alice", Stats::new(4, 4, 4, 4), DiceAssignment::AttackDie);
        assert_eq!(p.free_slot(), Some(0));
        p.inventory = [Some(ItemKind::Sword), None];
        assert_eq!(p.free_slot(), Some(1));
        p.inventory = [Some(ItemKind::Sword), Some(ItemKind::Potion)];
        assert_eq!(p.free_slot(), None);
        assert!(p.holds(ItemKind::Potion));
        assert_eq!(p.items(), vec![ItemKind::Sword, ItemKind::Potion]);
    }
}
