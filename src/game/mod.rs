//! Game rules and per-room state.
//!
//! Leaf-first: [`types`] and [`grid`] hold the board, [`path`] searches it,
//! [`sequencer`] tracks turns, [`combat`] and [`items`] implement the rules,
//! and [`room::RoomState`] ties them together behind intent handling (the
//! overland rules live in [`arbitration`]).

pub mod arbitration;
pub mod board_store;
pub mod bot;
pub mod combat;
pub mod errors;
pub mod events;
pub mod grid;
pub mod items;
pub mod path;
pub mod room;
pub mod sequencer;
pub mod types;

pub use board_store::{BoardStore, BoardTemplate, JsonBoardStore, MemoryBoardStore, StoreError};
pub use errors::GameError;
pub use events::{Audience, Envelope, Intent, Outbound, ServerEvent};
pub use grid::{Grid, GridAccess};
pub use room::{Phase, RoomSnapshot, RoomState};
pub use types::{Player, PlayerId, Position};
