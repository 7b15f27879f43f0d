//! Authoritative board state.
//!
//! The grid is a square, row-major matrix of [`Tile`]s whose dimensions are
//! fixed at creation. All mutation goes through small atomic operations that
//! either apply completely or return a [`GameError`] without touching state.

use super::board_store::{BoardTemplate, TileTemplate};
use super::errors::GameError;
use super::types::{BoardSize, DoorState, GameMode, ItemKind, Position, TerrainKind, Tile};

/// Narrow board interface consumed by the path engine, arbitration and the
/// combat engine. Implemented by [`Grid`]; tests may substitute their own.
pub trait GridAccess {
    fn dimension(&self) -> usize;
    fn terrain(&self, pos: Position) -> Option<TerrainKind>;
    fn occupant(&self, pos: Position) -> Option<&str>;
    fn item(&self, pos: Position) -> Option<ItemKind>;

    fn place_occupant(&mut self, pos: Position, player_id: &str) -> Result<(), GameError>;
    fn clear_occupant(&mut self, pos: Position);
    fn toggle_door(&mut self, pos: Position) -> Result<DoorState, GameError>;
    fn place_item(&mut self, pos: Position, item: ItemKind) -> Result<(), GameError>;
    fn take_item(&mut self, pos: Position) -> Result<ItemKind, GameError>;

    fn contains(&self, pos: Position) -> bool {
        pos.row < self.dimension() && pos.col < self.dimension()
    }

    /// Traversable, unoccupied and without an item.
    fn is_empty_tile(&self, pos: Position) -> bool {
        self.terrain(pos).is_some_and(TerrainKind::is_traversable)
            && self.occupant(pos).is_none()
            && self.item(pos).is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    size: BoardSize,
    tiles: Vec<Tile>,
}

impl Grid {
    /// An all-Plain board.
    pub fn new(size: BoardSize) -> Self {
        let n = size.dimension();
        let tiles = (0..n * n)
            .map(|i| Tile::new(TerrainKind::Plain, Position::new(i / n, i % n)))
            .collect();
        Grid { size, tiles }
    }

    pub fn from_template(template: &BoardTemplate) -> Result<Self, GameError> {
        let size = BoardSize::from_dimension(template.size).ok_or_else(|| {
            GameError::invalid(format!("unsupported board size {}", template.size))
        })?;
        let n = size.dimension();
        if template.tiles.len() != n || template.tiles.iter().any(|row| row.len() != n) {
            return Err(GameError::invalid(format!(
                "board '{}' is not {}x{}",
                template.id, n, n
            )));
        }
        let mut grid = Grid::new(size);
        for (row, cells) in template.tiles.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                let pos = Position::new(row, col);
                grid.set_terrain(pos, cell.terrain)?;
                if let Some(item) = cell.item {
                    if !cell.terrain.is_traversable() {
                        return Err(GameError::Impassable(pos));
                    }
                    grid.place_item(pos, item)?;
                }
            }
        }
        Ok(grid)
    }

    /// Snapshot of the current board as a persistable template.
    pub fn to_template(&self, id: &str, name: &str, mode: GameMode) -> BoardTemplate {
        let n = self.dimension();
        let tiles = (0..n)
            .map(|row| {
                (0..n)
                    .map(|col| {
                        let tile = &self.tiles[row * n + col];
                        TileTemplate {
                            terrain: tile.terrain,
                            item: tile.item,
                        }
                    })
                    .collect()
            })
            .collect();
        BoardTemplate {
            id: id.to_string(),
            name: name.to_string(),
            mode,
            size: n,
            tiles,
        }
    }

    pub fn size(&self) -> BoardSize {
        self.size
    }

    fn idx(&self, pos: Position) -> Result<usize, GameError> {
        if self.contains(pos) {
            Ok(pos.row * self.dimension() + pos.col)
        } else {
            Err(GameError::OutOfBounds(pos))
        }
    }

    pub fn tile(&self, pos: Position) -> Result<&Tile, GameError> {
        let i = self.idx(pos)?;
        Ok(&self.tiles[i])
    }

    fn tile_mut(&mut self, pos: Position) -> Result<&mut Tile, GameError> {
        let i = self.idx(pos)?;
        Ok(&mut self.tiles[i])
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    /// Rewrites the terrain of a tile. Refuses to make an occupied tile
    /// impassable.
    pub fn set_terrain(&mut self, pos: Position, terrain: TerrainKind) -> Result<(), GameError> {
        let tile = self.tile_mut(pos)?;
        if tile.occupant.is_some() && !terrain.is_traversable() {
            return Err(GameError::OccupiedTile(pos));
        }
        tile.terrain = terrain;
        Ok(())
    }

    pub fn position_of(&self, player_id: &str) -> Option<Position> {
        self.tiles
            .iter()
            .find(|t| t.occupant.as_deref() == Some(player_id))
            .map(|t| t.position)
    }

    pub fn positions_with_item(&self, item: ItemKind) -> Vec<Position> {
        self.tiles
            .iter()
            .filter(|t| t.item == Some(item))
            .map(|t| t.position)
            .collect()
    }

    /// Closest traversable tile without an avatar, breadth-first from
    /// `origin` (which is returned itself when free). Items do not block.
    pub fn nearest_unoccupied(&self, origin: Position) -> Option<Position> {
        let n = self.dimension();
        let free = |p: Position| {
            self.terrain(p).is_some_and(TerrainKind::is_traversable) && self.occupant(p).is_none()
        };
        if !self.contains(origin) {
            return None;
        }
        let mut seen = std::collections::HashSet::from([origin]);
        let mut queue = std::collections::VecDeque::from([origin]);
        while let Some(pos) = queue.pop_front() {
            if free(pos) {
                return Some(pos);
            }
            for next in pos.neighbors(n) {
                if self.terrain(next).is_some_and(TerrainKind::is_traversable) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        self.tiles
            .iter()
            .map(|t| t.position)
            .filter(|p| free(*p))
            .min_by_key(|p| (p.manhattan(origin), *p))
    }

    /// Checks the tile invariants: occupants only on traversable terrain and
    /// no player on two tiles.
    pub fn validate(&self) -> Result<(), GameError> {
        let mut seen = std::collections::HashSet::new();
        for tile in &self.tiles {
            if let Some(id) = &tile.occupant {
                if !tile.terrain.is_traversable() {
                    return Err(GameError::Impassable(tile.position));
                }
                if !seen.insert(id.as_str()) {
                    return Err(GameError::invalid(format!(
                        "player {} occupies more than one tile",
                        id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl GridAccess for Grid {
    fn dimension(&self) -> usize {
        self.size.dimension()
    }

    fn terrain(&self, pos: Position) -> Option<TerrainKind> {
        self.tile(pos).ok().map(|t| t.terrain)
    }

    fn occupant(&self, pos: Position) -> Option<&str> {
        self.tile(pos).ok().and_then(|t| t.occupant.as_deref())
    }

    fn item(&self, pos: Position) -> Option<ItemKind> {
        self.tile(pos).ok().and_then(|t| t.item)
    }

    fn place_occupant(&mut self, pos: Position, player_id: &str) -> Result<(), GameError> {
        let tile = self.tile_mut(pos)?;
        if tile.occupant.is_some() {
            return Err(GameError::OccupiedTile(pos));
        }
        if !tile.terrain.is_traversable() {
            return Err(GameError::Impassable(pos));
        }
        tile.occupant = Some(player_id.to_string());
        Ok(())
    }

    fn clear_occupant(&mut self, pos: Position) {
        if let Ok(tile) = self.tile_mut(pos) {
            tile.occupant = None;
        }
    }

    fn toggle_door(&mut self, pos: Position) -> Result<DoorState, GameError> {
        let tile = self.tile_mut(pos)?;
        match tile.terrain {
            TerrainKind::DoorClosed => {
                tile.terrain = TerrainKind::DoorOpen;
                Ok(DoorState::Open)
            }
            TerrainKind::DoorOpen => {
                if tile.occupant.is_some() {
                    return Err(GameError::OccupiedTile(pos));
                }
                if tile.item.is_some() {
                    return Err(GameError::TileOccupiedByItem(pos));
                }
                tile.terrain = TerrainKind::DoorClosed;
                Ok(DoorState::Closed)
            }
            _ => Err(GameError::NotADoor(pos)),
        }
    }

    fn place_item(&mut self, pos: Position, item: ItemKind) -> Result<(), GameError> {
        let tile = self.tile_mut(pos)?;
        if tile.item.is_some() {
            return Err(GameError::TileOccupiedByItem(pos));
        }
        tile.item = Some(item);
        Ok(())
    }

    fn take_item(&mut self, pos: Position) -> Result<ItemKind, GameError> {
        let tile = self.tile_mut(pos)?;
        tile.item.take().ok_or(GameError::NoItemPresent(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Grid {
        Grid::new(BoardSize::Small)
    }

    #[test]
    fn place_and_clear_occupant() {
        let mut g = small();
        let p = Position::new(2, 3);
        g.place_occupant(p, "alice").unwrap();
        assert_eq!(g.occupant(p), Some("alice"));
        assert_eq!(
            g.place_occupant(p, "bob"),
            Err(GameError::OccupiedTile(p))
        );
        g.clear_occupant(p);
        g.clear_occupant(p);
        assert_eq!(g.occupant(p), None);
        assert_eq!(g.position_of("alice"), None);
    }

    #[test]
    fn walls_and_closed_doors_reject_occupants() {
        let mut g = small();
        let wall = Position::new(0, 1);
        let door = Position::new(0, 2);
        g.set_terrain(wall, TerrainKind::Wall).unwrap();
        g.set_terrain(door, TerrainKind::DoorClosed).unwrap();
        assert_eq!(g.place_occupant(wall, "a"), Err(GameError::Impassable(wall)));
        assert_eq!(g.place_occupant(door, "a"), Err(GameError::Impassable(door)));
    }

    #[test]
    fn door_toggle_round_trip() {
        let mut g = small();
        let door = Position::new(5, 5);
        g.set_terrain(door, TerrainKind::DoorClosed).unwrap();
        assert_eq!(g.toggle_door(door), Ok(DoorState::Open));
        assert_eq!(g.toggle_door(door), Ok(DoorState::Closed));
        assert_eq!(g.terrain(door), Some(TerrainKind::DoorClosed));
        assert_eq!(
            g.toggle_door(Position::new(1, 1)),
            Err(GameError::NotADoor(Position::new(1, 1)))
        );
    }

    #[test]
    fn open_door_with_occupant_stays_open() {
        let mut g = small();
        let door = Position::new(5, 5);
        g.set_terrain(door, TerrainKind::DoorOpen).unwrap();
        g.place_occupant(door, "alice").unwrap();
        assert_eq!(g.toggle_door(door), Err(GameError::OccupiedTile(door)));
        assert_eq!(g.terrain(door), Some(TerrainKind::DoorOpen));
    }

    #[test]
    fn items_place_and_take() {
        let mut g = small();
        let p = Position::new(3, 3);
        assert_eq!(g.take_item(p), Err(GameError::NoItemPresent(p)));
        g.place_item(p, ItemKind::Sword).unwrap();
        assert_eq!(
            g.place_item(p, ItemKind::Shield),
            Err(GameError::TileOccupiedByItem(p))
        );
        assert_eq!(g.take_item(p), Ok(ItemKind::Sword));
        assert!(g.is_empty_tile(p));
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let mut g = small();
        let p = Position::new(10, 0);
        assert_eq!(g.place_occupant(p, "a"), Err(GameError::OutOfBounds(p)));
        assert!(g.terrain(p).is_none());
    }

    #[test]
    fn nearest_unoccupied_walks_outward() {
        let mut g = small();
        let spawn = Position::new(0, 0);
        assert_eq!(g.nearest_unoccupied(spawn), Some(spawn));
        g.place_occupant(spawn, "alice").unwrap();
        g.place_item(Position::new(1, 0), ItemKind::Sword).unwrap();
        assert_eq!(g.nearest_unoccupied(spawn), Some(Position::new(1, 0)));
    }

    #[test]
    fn template_round_trip_keeps_terrain_and_items() {
        let mut g = small();
        g.set_terrain(Position::new(1, 1), TerrainKind::Water).unwrap();
        g.place_item(Position::new(2, 2), ItemKind::Flag).unwrap();
        let t = g.to_template("b1", "Test", GameMode::CaptureTheFlag);
        let rebuilt = Grid::from_template(&t).unwrap();
        assert_eq!(rebuilt, g);
    }
}
