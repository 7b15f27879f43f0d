//! Turn order, per-turn action flag and movement budget.

use tokio::time::{Duration, Instant};

use super::types::PlayerId;

/// Ordered overland turn queue.
///
/// `current_index` is always a valid index into `order`, or 0 when the order
/// is empty (in which case there is no active turn).
#[derive(Debug, Clone, Default)]
pub struct TurnSequencer {
    order: Vec<PlayerId>,
    current_index: usize,
    initialized: bool,
    action_used: bool,
    remaining_speed: i32,
}

impl TurnSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the turn order once. Later calls are ignored unless
    /// `force_reinit`, which callers only pass before the match starts.
    /// Returns whether the order was (re)applied.
    pub fn initialize(&mut self, players: Vec<PlayerId>, force_reinit: bool) -> bool {
        if self.initialized && !force_reinit {
            return false;
        }
        self.order = players;
        self.current_index = 0;
        self.initialized = true;
        self.action_used = false;
        self.remaining_speed = 0;
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn order(&self) -> &[PlayerId] {
        &self.order
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// The player whose turn it is; `None` when the order is empty.
    pub fn current(&self) -> Option<&str> {
        self.order.get(self.current_index).map(String::as_str)
    }

    pub fn is_current(&self, player_id: &str) -> bool {
        self.current() == Some(player_id)
    }

    /// Starts the current player's turn with a fresh action and budget.
    pub fn begin_turn(&mut self, speed: i32) {
        self.action_used = false;
        self.remaining_speed = speed.max(0);
    }

    /// Moves to the next player and resets the per-turn state, using
    /// `speed_of` to look up the new player's movement budget.
    pub fn advance_turn<F>(&mut self, speed_of: F) -> Option<PlayerId>
    where
        F: Fn(&str) -> i32,
    {
        if self.order.is_empty() {
            self.current_index = 0;
            return None;
        }
        self.current_index = (self.current_index + 1) % self.order.len();
        let next = self.order[self.current_index].clone();
        self.begin_turn(speed_of(&next));
        Some(next)
    }

    /// Removes a player, keeping "whose turn is next" stable: players before
    /// the current one shift the index down; removing the current player
    /// hands the turn to whoever followed them.
    pub fn remove_player(&mut self, player_id: &str) -> bool {
        let Some(removed) = self.order.iter().position(|p| p == player_id) else {
            return false;
        };
        self.order.remove(removed);
        if removed < self.current_index {
            self.current_index -= 1;
        }
        if self.current_index >= self.order.len() {
            self.current_index = 0;
        }
        true
    }

    pub fn can_perform_action(&self) -> bool {
        !self.action_used
    }

    pub fn use_action(&mut self) {
        self.action_used = true;
    }

    pub fn reset_action(&mut self) {
        self.action_used = false;
    }

    pub fn remaining_speed(&self) -> i32 {
        self.remaining_speed
    }

    /// Spends movement for one executed step.
    pub fn consume_movement(&mut self, cost: u32) {
        self.remaining_speed = (self.remaining_speed - cost as i32).max(0);
    }
}

/// Wall-clock deadline for a turn or a combat round. Can be paused (the
/// overland clock stops while a fight runs) and resumed with the time that
/// was left.
#[derive(Debug, Clone)]
pub struct TurnClock {
    duration: Duration,
    deadline: Option<Instant>,
    paused_left: Option<Duration>,
}

impl TurnClock {
    pub fn new(duration: Duration) -> Self {
        TurnClock {
            duration,
            deadline: None,
            paused_left: None,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.duration);
        self.paused_left = None;
    }

    pub fn clear(&mut self) {
        self.deadline = None;
        self.paused_left = None;
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(deadline) = self.deadline.take() {
            self.paused_left = Some(deadline.saturating_duration_since(now));
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(left) = self.paused_left.take() {
            self.deadline = Some(now + left);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_left.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Whole seconds left, rounded up; 0 once expired or disarmed.
    pub fn seconds_left(&self, now: Instant) -> u64 {
        match self.deadline {
            Some(d) => {
                let left = d.saturating_duration_since(now).as_millis() as u64;
                left.div_ceil(1000)
            }
            None => 0,
        }
    }
}
