use thiserror::Error;

use super::types::Position;

/// Rejections produced while arbitrating a player intent.
///
/// None of these are fatal: the room never mutates state when it returns one,
/// and the reason is reported back to the originating player only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GameError {
    /// Not this player's turn, action already used, out of adjacency, etc.
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    /// Wall or closed door.
    #[error("tile {0} is impassable")]
    Impassable(Position),

    /// Another avatar already stands on the tile.
    #[error("tile {0} is occupied")]
    OccupiedTile(Position),

    #[error("tile {0} is not a door")]
    NotADoor(Position),

    #[error("tile {0} already holds an item")]
    TileOccupiedByItem(Position),

    #[error("no item on tile {0}")]
    NoItemPresent(Position),

    /// No path exists, or the path costs more than the remaining movement.
    #[error("destination {0} is unreachable")]
    Unreachable(Position),

    /// The client acted on a view of the board that no longer matches.
    #[error("stale state: {0}")]
    StaleState(String),

    #[error("position {0} is outside the board")]
    OutOfBounds(Position),

    #[error("unknown player: {0}")]
    UnknownPlayer(String),

    #[error("room is full")]
    RoomFull,

    #[error("room is locked")]
    RoomLocked,

    #[error("match is not running")]
    MatchNotRunning,
}

impl GameError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        GameError::InvalidIntent(reason.into())
    }
}
