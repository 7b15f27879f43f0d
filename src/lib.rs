//! # Skirmish - tactical board-game coordination core
//!
//! Skirmish runs turn-based matches on square tile boards for two to six
//! players, humans and bots mixed. Each room is owned by a single async actor
//! that validates intents, moves avatars tile by tile, runs dice fights and
//! broadcasts sequenced state changes to every participant.
//!
//! ## Features
//!
//! - **Grid & Pathing**: terrain with per-tile movement cost, doors that open and close,
//!   uniform-cost reachability and shortest paths.
//! - **Turn Sequencing**: speed-ordered rounds with a per-turn movement budget, one action
//!   per turn and wall-clock turn limits.
//! - **Combat**: dice-based attack/defense exchanges with ice penalties, escapes, potions
//!   and amulets, plus round timers that act on behalf of idle fighters.
//! - **Items**: auto-pickup, two inventory slots, throwing and redistribution on defeat.
//! - **Modes**: classic (first to N victories) and capture-the-flag.
//! - **Virtual Players**: aggressive and defensive bots driven by the same intent rules.
//! - **Broadcast**: per-room sequence numbers so clients can drop stale or duplicate deliveries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use skirmish::config::Config;
//! use skirmish::game::JsonBoardStore;
//! use skirmish::server::RoomHub;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = Arc::new(JsonBoardStore::new(&config.storage.data_dir));
//!     let hub = RoomHub::new(config.game.clone(), store);
//!     let (room, _task) = hub.create_room(&config.storage.default_board).await?;
//!     println!("room code {}", room.code());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`game`] - board, pathing, sequencing, combat and the per-room state machine
//! - [`server`] - room actors, the room registry and the broadcast layer
//! - [`client`] - client-side replica that reconciles broadcasts
//! - [`config`] - configuration management and validation
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - logging setup and helpers

pub mod client;
pub mod config;
pub mod game;
pub mod logutil;
pub mod metrics;
pub mod server;
