//! Room registry: maps four-digit room codes to live room actors.

use anyhow::{anyhow, Context, Result};
use log::info;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::dispatch::ChannelBroadcaster;
use super::room::{spawn_room, RoomHandle};
use crate::config::GameConfig;
use crate::game::board_store::BoardStore;
use crate::game::room::{RoomSnapshot, RoomState};
use crate::logutil::escape_log;

const MAX_CODE_ATTEMPTS: usize = 100;

pub struct RoomHub {
    rules: GameConfig,
    store: Arc<dyn BoardStore>,
    rooms: Mutex<HashMap<String, RoomHandle>>,
}

impl RoomHub {
    pub fn new(rules: GameConfig, store: Arc<dyn BoardStore>) -> Self {
        RoomHub {
            rules,
            store,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches `board_id` from the store and opens a room for it under a
    /// fresh code.
    pub async fn create_room(&self, board_id: &str) -> Result<(RoomHandle, JoinHandle<RoomSnapshot>)> {
        let template = self
            .store
            .fetch_board_template(board_id)
            .with_context(|| format!("loading board '{}'", escape_log(board_id)))?;

        let mut rooms = self.rooms.lock().await;
        rooms.retain(|_, h| !h.is_closed());
        let code = {
            let mut rng = rand::thread_rng();
            (0..MAX_CODE_ATTEMPTS)
                .map(|_| format!("{:04}", rng.gen_range(0..10_000)))
                .find(|c| !rooms.contains_key(c))
                .ok_or_else(|| anyhow!("no free room code"))?
        };
        let state = RoomState::new(&code, template, self.rules.clone())
            .map_err(|e| anyhow!("board '{}' is unusable: {}", escape_log(board_id), e))?;
        let (handle, task) = spawn_room(state, ChannelBroadcaster::new(&code));
        info!(target: "skirmish::hub", "room {} created for board {}", code, escape_log(board_id));
        rooms.insert(code, handle.clone());
        Ok((handle, task))
    }

    /// Looks a room up by the code players type in.
    pub async fn room(&self, code: &str) -> Option<RoomHandle> {
        let rooms = self.rooms.lock().await;
        rooms.get(code.trim()).filter(|h| !h.is_closed()).cloned()
    }

    pub async fn room_codes(&self) -> Vec<String> {
        let rooms = self.rooms.lock().await;
        let mut codes: Vec<String> = rooms
            .iter()
            .filter(|(_, h)| !h.is_closed())
            .map(|(c, _)| c.clone())
            .collect();
        codes.sort();
        codes
    }

    /// Forgets rooms whose actor has exited. Returns how many were dropped.
    pub async fn prune_closed(&self) -> usize {
        let mut rooms = self.rooms.lock().await;
        let before = rooms.len();
        rooms.retain(|_, h| !h.is_closed());
        let pruned = before - rooms.len();
        if pruned > 0 {
            info!(target: "skirmish::hub", "pruned {} closed rooms", pruned);
        }
        pruned
    }

    pub async fn shutdown_all(&self) {
        let handles: Vec<RoomHandle> = self.rooms.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.shutdown().await;
        }
    }
}
