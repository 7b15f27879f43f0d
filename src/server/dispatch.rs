//! Session broadcast layer.
//!
//! The room hands every accepted state change to a [`BroadcastLayer`] as a
//! batch of [`Outbound`] events. The layer stamps each event with the room's
//! next sequence number and delivers it either to every subscriber
//! ([`Audience::Room`]) or to a single player ([`Audience::Player`]).
//!
//! Sequence numbers are per room and strictly increasing across both
//! audiences, so a client can discard duplicates and stale deliveries by
//! comparing against the last sequence number it applied.
//!
//! [`ChannelBroadcaster`] is the in-process implementation: one unbounded
//! `mpsc` sender per subscriber. Transports (websocket, mesh radio, test
//! harness) sit on the receiving end.

use log::{debug, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::game::events::{Audience, Envelope, Outbound};
use crate::game::types::PlayerId;
use crate::logutil::escape_log;
use crate::metrics;

pub type EventSender = mpsc::UnboundedSender<Envelope>;
pub type EventReceiver = mpsc::UnboundedReceiver<Envelope>;

pub trait BroadcastLayer: Send {
    fn subscribe(&mut self, player_id: &str, sender: EventSender);

    fn unsubscribe(&mut self, player_id: &str);

    /// Observers receive every room-wide event but are not players.
    fn observe(&mut self, sender: EventSender);

    /// Sequences and delivers `events` in order. Returns the players whose
    /// channel turned out to be closed; the room treats them as disconnected.
    fn publish(&mut self, events: Vec<Outbound>) -> Vec<PlayerId>;

    fn last_seq(&self) -> u64;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub dispatched_total: u64,
    pub dropped_total: u64,
}

#[derive(Default)]
pub struct ChannelBroadcaster {
    room: String,
    seq: u64,
    subscribers: HashMap<PlayerId, EventSender>,
    observers: Vec<EventSender>,
    stats: BroadcastStats,
}

impl ChannelBroadcaster {
    pub fn new(room: &str) -> Self {
        ChannelBroadcaster {
            room: room.to_string(),
            ..Default::default()
        }
    }

    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn deliver(&mut self, player_id: &str, env: &Envelope, dead: &mut Vec<PlayerId>) {
        let Some(tx) = self.subscribers.get(player_id) else {
            return;
        };
        if tx.send(env.clone()).is_err() {
            self.stats.dropped_total += 1;
            if !dead.iter().any(|d| d == player_id) {
                dead.push(player_id.to_string());
            }
        } else {
            self.stats.dispatched_total += 1;
        }
    }
}

impl BroadcastLayer for ChannelBroadcaster {
    fn subscribe(&mut self, player_id: &str, sender: EventSender) {
        self.subscribers.insert(player_id.to_string(), sender);
    }

    fn unsubscribe(&mut self, player_id: &str) {
        self.subscribers.remove(player_id);
    }

    fn observe(&mut self, sender: EventSender) {
        self.observers.push(sender);
    }

    fn publish(&mut self, events: Vec<Outbound>) -> Vec<PlayerId> {
        let mut dead = Vec::new();
        let count = events.len() as u64;
        for out in events {
            self.seq += 1;
            let env = Envelope {
                seq: self.seq,
                audience: out.audience,
                event: out.event,
            };
            match &env.audience {
                Audience::Room => {
                    let ids: Vec<PlayerId> = self.subscribers.keys().cloned().collect();
                    for id in ids {
                        self.deliver(&id, &env, &mut dead);
                    }
                    self.observers.retain(|tx| tx.send(env.clone()).is_ok());
                }
                Audience::Player(id) => {
                    let id = id.clone();
                    self.deliver(&id, &env, &mut dead);
                }
            }
        }
        metrics::add_events_broadcast(count);
        for id in &dead {
            warn!(
                target: "skirmish::room",
                "room {}: subscriber {} is gone",
                self.room,
                escape_log(id)
            );
            self.subscribers.remove(id);
        }
        if count > 0 {
            debug!(
                target: "skirmish::room",
                "room {}: published {} events up to seq {}",
                self.room,
                count,
                self.seq
            );
        }
        dead
    }

    fn last_seq(&self) -> u64 {
        self.seq
    }
}
