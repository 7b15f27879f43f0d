//! Board template persistence.
//!
//! Authoring boards is someone else's job; the room only needs to fetch a
//! template by id when a match is created and, optionally, to persist a board
//! back. [`JsonBoardStore`] keeps one JSON file per board under
//! `<data_dir>/boards/`, written atomically under an exclusive `fs2` lock.
//! [`MemoryBoardStore`] backs tests and the CLI simulator.

use fs2::FileExt;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use super::grid::Grid;
use super::types::{BoardSize, GameMode, ItemKind, TerrainKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileTemplate {
    pub terrain: TerrainKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardTemplate {
    pub id: String,
    pub name: String,
    pub mode: GameMode,
    pub size: usize,
    pub tiles: Vec<Vec<TileTemplate>>,
}

impl BoardTemplate {
    /// Parses the compact text layout used by the CLI and tests: one row per
    /// line, one character per tile.
    ///
    /// `.` plain, `~` water, `_` ice, `#` wall, `+` closed door, `/` open
    /// door, `S` spawn, `F` flag, `s` sword, `h` shield, `b` boots, `a`
    /// armor, `p` potion, `m` amulet, `k` master key. Item letters sit on
    /// plain terrain.
    pub fn from_ascii(id: &str, name: &str, mode: GameMode, layout: &str) -> Result<Self, StoreError> {
        let mut tiles = Vec::new();
        for line in layout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let mut row = Vec::with_capacity(line.len());
            for ch in line.chars() {
                let (terrain, item) = match ch {
                    '.' => (TerrainKind::Plain, None),
                    '~' => (TerrainKind::Water, None),
                    '_' => (TerrainKind::Ice, None),
                    '#' => (TerrainKind::Wall, None),
                    '+' => (TerrainKind::DoorClosed, None),
                    '/' => (TerrainKind::DoorOpen, None),
                    'S' => (TerrainKind::Plain, Some(ItemKind::Spawn)),
                    'F' => (TerrainKind::Plain, Some(ItemKind::Flag)),
                    's' => (TerrainKind::Plain, Some(ItemKind::Sword)),
                    'h' => (TerrainKind::Plain, Some(ItemKind::Shield)),
                    'b' => (TerrainKind::Plain, Some(ItemKind::Boots)),
                    'a' => (TerrainKind::Plain, Some(ItemKind::Armor)),
                    'p' => (TerrainKind::Plain, Some(ItemKind::Potion)),
                    'm' => (TerrainKind::Plain, Some(ItemKind::Amulet)),
                    'k' => (TerrainKind::Plain, Some(ItemKind::MasterKey)),
                    other => {
                        return Err(StoreError::InvalidTemplate(format!(
                            "unknown tile character '{}'",
                            other
                        )))
                    }
                };
                row.push(TileTemplate { terrain, item });
            }
            tiles.push(row);
        }
        let template = BoardTemplate {
            id: id.to_string(),
            name: name.to_string(),
            mode,
            size: tiles.len(),
            tiles,
        };
        template.validate()?;
        Ok(template)
    }

    pub fn board_size(&self) -> Option<BoardSize> {
        BoardSize::from_dimension(self.size)
    }

    pub fn spawn_count(&self) -> usize {
        self.tiles
            .iter()
            .flatten()
            .filter(|t| t.item == Some(ItemKind::Spawn))
            .count()
    }

    /// Structural checks: supported size, square layout, items only on
    /// traversable tiles, enough spawn markers for a full room, and a flag
    /// on capture-the-flag boards.
    pub fn validate(&self) -> Result<(), StoreError> {
        let size = self.board_size().ok_or_else(|| {
            StoreError::InvalidTemplate(format!("unsupported board size {}", self.size))
        })?;
        Grid::from_template(self).map_err(|e| StoreError::InvalidTemplate(e.to_string()))?;
        let spawns = self.spawn_count();
        if spawns < size.capacity() {
            return Err(StoreError::InvalidTemplate(format!(
                "board '{}' has {} spawn tiles, needs {}",
                self.id,
                spawns,
                size.capacity()
            )));
        }
        let has_flag = self.tiles.iter().flatten().any(|t| t.item == Some(ItemKind::Flag));
        if self.mode == GameMode::CaptureTheFlag && !has_flag {
            return Err(StoreError::InvalidTemplate(format!(
                "capture-the-flag board '{}' has no flag",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("board store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("board template is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("board not found: {0}")]
    NotFound(String),

    #[error("invalid board template: {0}")]
    InvalidTemplate(String),
}

/// External persistence collaborator for board templates.
pub trait BoardStore: Send + Sync {
    fn fetch_board_template(&self, game_id: &str) -> Result<BoardTemplate, StoreError>;

    fn persist_board(&self, game_id: &str, template: &BoardTemplate) -> Result<(), StoreError>;
}

/// Board ids become file names, so keep them to a safe alphabet.
fn check_board_id(game_id: &str) -> Result<(), StoreError> {
    let ok = !game_id.is_empty()
        && game_id.len() <= 64
        && game_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidTemplate(format!("bad board id '{}'", game_id)))
    }
}

pub struct JsonBoardStore {
    dir: PathBuf,
}

impl JsonBoardStore {
    /// Store rooted at `<data_dir>/boards`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        JsonBoardStore {
            dir: data_dir.as_ref().join("boards"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn board_path(&self, game_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", game_id))
    }

    fn lock_path(&self, game_id: &str) -> PathBuf {
        self.dir.join(format!(".{}.lock", game_id))
    }

    fn open_lock(&self, game_id: &str) -> Result<File, StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path(game_id))?)
    }

    /// Ids of every stored board, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Writes `content` to a sibling temp file and renames it over `path`.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("board.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let cand = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new().write(true).create_new(true).open(&cand) {
            Ok(mut tmp) => {
                tmp.write_all(content.as_bytes())?;
                tmp.sync_all()?;
                break cand;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(e),
        }
    };
    std::fs::rename(&tmp_path, path)?;
    if let Ok(dirf) = File::open(dir) {
        let _ = dirf.sync_all();
    }
    Ok(())
}

impl BoardStore for JsonBoardStore {
    fn fetch_board_template(&self, game_id: &str) -> Result<BoardTemplate, StoreError> {
        check_board_id(game_id)?;
        let path = self.board_path(game_id);
        if !path.exists() {
            return Err(StoreError::NotFound(game_id.to_string()));
        }
        let lock = self.open_lock(game_id)?;
        lock.lock_shared()?;
        let raw = std::fs::read_to_string(&path);
        let _ = lock.unlock();
        let template: BoardTemplate = serde_json::from_str(&raw?)?;
        template.validate()?;
        debug!(target: "skirmish::store", "loaded board {} from {}", game_id, path.display());
        Ok(template)
    }

    fn persist_board(&self, game_id: &str, template: &BoardTemplate) -> Result<(), StoreError> {
        check_board_id(game_id)?;
        template.validate()?;
        let content = serde_json::to_string_pretty(template)?;
        let lock = self.open_lock(game_id)?;
        lock.lock_exclusive()?;
        let res = write_atomic(&self.board_path(game_id), &content);
        let _ = lock.unlock();
        res?;
        debug!(target: "skirmish::store", "persisted board {}", game_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBoardStore {
    boards: Mutex<HashMap<String, BoardTemplate>>,
}

impl MemoryBoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_board(template: BoardTemplate) -> Self {
        let store = Self::new();
        if let Ok(mut boards) = store.boards.lock() {
            boards.insert(template.id.clone(), template);
        }
        store
    }
}

impl BoardStore for MemoryBoardStore {
    fn fetch_board_template(&self, game_id: &str) -> Result<BoardTemplate, StoreError> {
        let boards = self
            .boards
            .lock()
            .map_err(|_| StoreError::InvalidTemplate("board store poisoned".into()))?;
        boards
            .get(game_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(game_id.to_string()))
    }

    fn persist_board(&self, game_id: &str, template: &BoardTemplate) -> Result<(), StoreError> {
        template.validate()?;
        let mut boards = self
            .boards
            .lock()
            .map_err(|_| StoreError::InvalidTemplate("board store poisoned".into()))?;
        boards.insert(game_id.to_string(), template.clone());
        Ok(())
    }
}

/// A small two-player arena used by the CLI when no board is stored yet.
pub fn sample_board() -> BoardTemplate {
    const LAYOUT: &str = "
        S...~~...s
        .#..~~..#.
        .#......#.
        ..__..__..
        h..#+/#..p
        a..#..#..m
        ..__..__..
        .#......#.
        .#..~~..#k
        b...~~...S
    ";
    BoardTemplate::from_ascii("arena", "Arena", GameMode::Classic, LAYOUT)
        .unwrap_or_else(|_| Grid::new(BoardSize::Small).to_template("arena", "Arena", GameMode::Classic))
}
