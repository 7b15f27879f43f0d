//! Room actor: the single writer for one room's [`RoomState`].
//!
//! Callers talk to the room through a cloneable [`RoomHandle`] that posts
//! [`RoomCommand`]s onto an unbounded mailbox. The actor loop multiplexes the
//! mailbox, a one second tick (time-left broadcasts) and a single wake-up
//! deadline covering the next movement step, the next bot decision and the
//! turn or combat round expiry. Intents are applied one at a time, in the
//! order they were received.

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};

use super::dispatch::{BroadcastLayer, EventSender};
use crate::game::errors::GameError;
use crate::game::events::{Intent, Outbound, ServerEvent};
use crate::game::room::{Phase, RoomSnapshot, RoomState};
use crate::game::sequencer::TurnClock;
use crate::game::types::{Player, PlayerId};
use crate::logutil::escape_log;
use crate::metrics;

const TICK: Duration = Duration::from_secs(1);

pub enum RoomCommand {
    Join {
        player: Player,
        events: EventSender,
        reply: oneshot::Sender<Result<PlayerId, GameError>>,
    },
    Intent {
        player_id: PlayerId,
        intent: Intent,
    },
    Disconnect {
        player_id: PlayerId,
    },
    Observe {
        events: EventSender,
    },
    Snapshot(oneshot::Sender<RoomSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone, Debug)]
pub struct RoomHandle {
    code: String,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Joins the waiting room; `events` receives every broadcast from then
    /// on. Returns the id the room assigned.
    pub async fn join(&self, player: Player, events: EventSender) -> Result<PlayerId, GameError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Join {
                player,
                events,
                reply,
            })
            .map_err(|_| GameError::MatchNotRunning)?;
        rx.await.map_err(|_| GameError::MatchNotRunning)?
    }

    /// Queues an intent. Rejections come back as `intentRejected` events.
    pub fn submit(&self, player_id: &str, intent: Intent) -> bool {
        self.tx
            .send(RoomCommand::Intent {
                player_id: player_id.to_string(),
                intent,
            })
            .is_ok()
    }

    pub fn disconnect(&self, player_id: &str) {
        let _ = self.tx.send(RoomCommand::Disconnect {
            player_id: player_id.to_string(),
        });
    }

    pub fn observe(&self, events: EventSender) -> bool {
        self.tx.send(RoomCommand::Observe { events }).is_ok()
    }

    pub async fn snapshot(&self) -> Option<RoomSnapshot> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RoomCommand::Snapshot(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(RoomCommand::Shutdown(tx));
        let _ = rx.await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct RoomRunner<B: BroadcastLayer> {
    state: RoomState,
    broadcast: B,
    turn_clock: TurnClock,
    round_clock: TurnClock,
    seen_phase: Phase,
    seen_turn: u64,
    seen_round: u64,
    next_step: Option<Instant>,
    next_bot: Option<Instant>,
}

enum Flow {
    Continue,
    Stop,
}

impl<B: BroadcastLayer> RoomRunner<B> {
    fn new(state: RoomState, broadcast: B) -> Self {
        let rules = state.rules().clone();
        RoomRunner {
            seen_phase: state.phase(),
            seen_turn: state.turn_generation(),
            seen_round: state.round_generation(),
            state,
            broadcast,
            turn_clock: TurnClock::new(rules.turn_duration()),
            round_clock: TurnClock::new(rules.combat_round()),
            next_step: None,
            next_bot: None,
        }
    }

    fn next_wakeup(&self) -> Option<Instant> {
        let clock = match self.state.phase() {
            Phase::Turn => self.turn_clock.deadline(),
            Phase::Combat => self.round_clock.deadline(),
            _ => None,
        };
        [self.next_step, self.next_bot, clock].into_iter().flatten().min()
    }

    /// Publishes events, treating closed subscriber channels as disconnects.
    fn publish(&mut self, mut events: Vec<Outbound>) {
        while !events.is_empty() {
            let dead = self.broadcast.publish(events);
            events = Vec::new();
            for id in dead {
                info!(target: "skirmish::room", "room {}: {} disconnected", self.state.code(), escape_log(&id));
                self.broadcast.unsubscribe(&id);
                events.extend(self.state.remove_player(&id));
            }
        }
        self.sync(Instant::now());
    }

    /// Re-arms clocks and scheduled work after the state changed.
    fn sync(&mut self, now: Instant) {
        let phase = self.state.phase();
        if phase == Phase::Combat && self.seen_phase != Phase::Combat {
            self.turn_clock.pause(now);
        }
        if phase == Phase::Turn && self.seen_phase == Phase::Combat {
            self.round_clock.clear();
            self.turn_clock.resume(now);
        }
        if self.state.turn_generation() != self.seen_turn {
            self.seen_turn = self.state.turn_generation();
            self.turn_clock.arm(now);
        }
        if phase == Phase::Combat && self.state.round_generation() != self.seen_round {
            self.seen_round = self.state.round_generation();
            self.round_clock.arm(now);
        }
        if phase == Phase::Ended {
            self.turn_clock.clear();
            self.round_clock.clear();
        }
        self.seen_phase = phase;

        if !self.state.has_pending_movement() {
            self.next_step = None;
        } else if self.next_step.is_none() {
            self.next_step = Some(now);
        }

        if !self.bot_due() {
            self.next_bot = None;
        } else if self.next_bot.is_none() {
            self.next_bot = Some(now + self.state.rules().bot_think());
        }
    }

    fn bot_due(&self) -> bool {
        let is_virtual = |id: &str| self.state.player(id).is_some_and(|p| p.is_virtual);
        match self.state.phase() {
            Phase::Turn => {
                !self.state.has_pending_movement()
                    && self.state.sequencer().current().is_some_and(is_virtual)
            }
            Phase::Combat => self
                .state
                .combat()
                .is_some_and(|f| is_virtual(f.active_attacker())),
            _ => false,
        }
    }

    fn on_tick(&mut self, now: Instant) {
        let event = match self.state.phase() {
            Phase::Turn if self.turn_clock.is_armed() => ServerEvent::TurnTimeLeftUpdate {
                seconds: self.turn_clock.seconds_left(now),
            },
            Phase::Combat if self.round_clock.is_armed() => ServerEvent::CombatTimeLeftUpdate {
                seconds: self.round_clock.seconds_left(now),
            },
            _ => return,
        };
        self.publish(vec![Outbound::room(event)]);
    }

    fn on_wakeup(&mut self, now: Instant) {
        if self.next_step.is_some_and(|t| t <= now) {
            self.next_step = None;
            let events = self.state.step_movement();
            if self.state.has_pending_movement() {
                self.next_step = Some(now + self.state.rules().step_delay());
            }
            self.publish(events);
        }
        if self.next_bot.is_some_and(|t| t <= now) {
            self.next_bot = None;
            let events = match self.state.phase() {
                Phase::Combat => self.state.virtual_combat_turn(),
                Phase::Turn => self.state.bot_act(),
                _ => None,
            };
            if let Some(events) = events {
                self.publish(events);
            }
        }
        match self.state.phase() {
            Phase::Turn if self.turn_clock.expired(now) => {
                debug!(target: "skirmish::room", "room {}: turn timer expired", self.state.code());
                self.turn_clock.clear();
                let events = self.state.force_turn_end();
                self.publish(events);
            }
            Phase::Combat if self.round_clock.expired(now) => {
                debug!(target: "skirmish::combat", "room {}: round timer expired", self.state.code());
                self.round_clock.clear();
                let events = self.state.on_round_timeout();
                self.publish(events);
            }
            _ => {}
        }
    }

    fn handle_command(&mut self, cmd: RoomCommand) -> Flow {
        match cmd {
            RoomCommand::Join {
                player,
                events,
                reply,
            } => match self.state.join(player) {
                Ok((id, out)) => {
                    self.broadcast.subscribe(&id, events);
                    let _ = reply.send(Ok(id));
                    self.publish(out);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            RoomCommand::Intent { player_id, intent } => {
                let name = intent.name();
                let quitting = matches!(intent, Intent::Quit);
                match self.state.handle_intent(&player_id, intent) {
                    Ok(out) => {
                        metrics::inc_intents_accepted();
                        if quitting {
                            self.broadcast.unsubscribe(&player_id);
                        }
                        self.publish(out);
                    }
                    Err(e) => {
                        metrics::inc_intents_rejected();
                        debug!(
                            target: "skirmish::room",
                            "room {}: rejected {} from {}: {}",
                            self.state.code(),
                            name,
                            escape_log(&player_id),
                            e
                        );
                        self.publish(vec![Outbound::to(
                            player_id,
                            ServerEvent::IntentRejected {
                                intent: name.to_string(),
                                reason: e.to_string(),
                            },
                        )]);
                    }
                }
            }
            RoomCommand::Disconnect { player_id } => {
                self.broadcast.unsubscribe(&player_id);
                let out = self.state.remove_player(&player_id);
                self.publish(out);
            }
            RoomCommand::Observe { events } => self.broadcast.observe(events),
            RoomCommand::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
            RoomCommand::Shutdown(done) => {
                self.publish(vec![Outbound::room(ServerEvent::RoomClosed {
                    reason: "shutdown".to_string(),
                })]);
                let _ = done.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

/// Spawns the actor task for `state`. The join handle yields the final
/// snapshot once the match has ended, the room was shut down, or every
/// handle was dropped.
pub fn spawn_room<B>(state: RoomState, broadcast: B) -> (RoomHandle, JoinHandle<RoomSnapshot>)
where
    B: BroadcastLayer + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<RoomCommand>();
    let handle = RoomHandle {
        code: state.code().to_string(),
        tx,
    };
    metrics::inc_rooms_opened();

    let task = tokio::spawn(async move {
        let mut runner = RoomRunner::new(state, broadcast);
        let mut tick = interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(target: "skirmish::room", "room {}: open", runner.state.code());
        loop {
            let wake = runner.next_wakeup();
            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!(target: "skirmish::room", "room {}: all handles dropped", runner.state.code());
                        break;
                    };
                    if let Flow::Stop = runner.handle_command(cmd) {
                        break;
                    }
                }
                _ = tick.tick() => runner.on_tick(Instant::now()),
                _ = sleep_until_opt(wake) => runner.on_wakeup(Instant::now()),
            }
            if runner.state.is_over() {
                break;
            }
        }
        metrics::inc_rooms_closed();
        if !runner.state.winners().is_empty() {
            info!(
                target: "skirmish::room",
                "room {}: closed, winners {:?}",
                runner.state.code(),
                runner.state.winners()
            );
        } else {
            info!(target: "skirmish::room", "room {}: closed without a winner", runner.state.code());
        }
        runner.state.snapshot()
    });

    (handle, task)
}
