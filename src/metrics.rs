//! Process-wide counters for rooms, intents and fights.
//! Per-board match counts are kept in a small map keyed by board id.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

static ROOMS_OPENED: AtomicU64 = AtomicU64::new(0);
static ROOMS_CLOSED: AtomicU64 = AtomicU64::new(0);
static INTENTS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static INTENTS_REJECTED: AtomicU64 = AtomicU64::new(0);
static FIGHTS_STARTED: AtomicU64 = AtomicU64::new(0);
static EVENTS_BROADCAST: AtomicU64 = AtomicU64::new(0);

static BOARD_COUNTERS: OnceLock<Mutex<HashMap<String, BoardCounter>>> = OnceLock::new();

pub fn inc_rooms_opened() {
    ROOMS_OPENED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_rooms_closed() {
    ROOMS_CLOSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_intents_accepted() {
    INTENTS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_intents_rejected() {
    INTENTS_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_fights_started() {
    FIGHTS_STARTED.fetch_add(1, Ordering::Relaxed);
}
pub fn add_events_broadcast(n: u64) {
    EVENTS_BROADCAST.fetch_add(n, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BoardCounter {
    pub matches_started: u64,
    pub matches_finished: u64,
    pub currently_running: u64,
    pub concurrent_peak: u64,
}

fn board_counter_lock() -> &'static Mutex<HashMap<String, BoardCounter>> {
    BOARD_COUNTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn record_match_start(board_id: &str) -> BoardCounter {
    let mut guard = board_counter_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let counter = guard.entry(board_id.to_string()).or_default();
    counter.matches_started = counter.matches_started.saturating_add(1);
    counter.currently_running = counter.currently_running.saturating_add(1);
    if counter.currently_running > counter.concurrent_peak {
        counter.concurrent_peak = counter.currently_running;
    }
    *counter
}

pub fn record_match_end(board_id: &str) -> BoardCounter {
    let mut guard = board_counter_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let counter = guard.entry(board_id.to_string()).or_default();
    counter.matches_finished = counter.matches_finished.saturating_add(1);
    if counter.currently_running > 0 {
        counter.currently_running -= 1;
    }
    *counter
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub rooms_opened: u64,
    pub rooms_closed: u64,
    pub intents_accepted: u64,
    pub intents_rejected: u64,
    pub fights_started: u64,
    pub events_broadcast: u64,
    pub boards: HashMap<String, BoardCounter>,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        rooms_opened: ROOMS_OPENED.load(Ordering::Relaxed),
        rooms_closed: ROOMS_CLOSED.load(Ordering::Relaxed),
        intents_accepted: INTENTS_ACCEPTED.load(Ordering::Relaxed),
        intents_rejected: INTENTS_REJECTED.load(Ordering::Relaxed),
        fights_started: FIGHTS_STARTED.load(Ordering::Relaxed),
        events_broadcast: EVENTS_BROADCAST.load(Ordering::Relaxed),
        boards: board_counter_lock()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_start_and_end_track_peak() {
        let board = "metrics-test-board";
        let first = record_match_start(board);
        assert_eq!(first.matches_started, 1);
        assert_eq!(first.currently_running, 1);
        let second = record_match_start(board);
        assert_eq!(second.concurrent_peak, 2);
        let after = record_match_end(board);
        assert_eq!(after.currently_running, 1);
        assert_eq!(after.matches_finished, 1);
        assert_eq!(after.concurrent_peak, 2);
        assert_eq!(snapshot().boards.get(board), Some(&after));
    }

    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        inc_intents_rejected();
        inc_fights_started();
        let after = snapshot();
        assert!(after.intents_rejected > before.intents_rejected);
        assert!(after.fights_started > before.fights_started);
    }
}
