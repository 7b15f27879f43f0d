//! Room actor tests on a paused tokio clock: timers fire as soon as the
//! runtime is idle, so turn and step deadlines are exercised without real
//! waiting.

use skirmish::config::GameConfig;
use skirmish::game::board_store::BoardTemplate;
use skirmish::game::types::{DiceAssignment, GameMode, Stats};
use skirmish::game::{Envelope, Intent, Phase, Player, Position, RoomState, ServerEvent};
use skirmish::server::{spawn_room, ChannelBroadcaster, EventReceiver, RoomHandle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, Instant};

const FIELD: &str = "
    S.........
    ..........
    ..........
    ..........
    ..........
    ..........
    ..........
    ..........
    ..........
    .........S
";

fn rules() -> GameConfig {
    GameConfig {
        rng_seed: Some(7),
        turn_duration_secs: 30,
        step_delay_ms: 150,
        ..GameConfig::default()
    }
}

fn open_room() -> (RoomHandle, JoinHandle<skirmish::game::RoomSnapshot>) {
    let board = BoardTemplate::from_ascii("field", "Field", GameMode::Classic, FIELD).unwrap();
    let state = RoomState::new("0042", board, rules()).unwrap();
    spawn_room(state, ChannelBroadcaster::new("0042"))
}

async fn join(room: &RoomHandle, id: &str, speed: i32) -> EventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    let player = Player::new(id, Stats::new(6, speed, 4, 4), DiceAssignment::AttackDie);
    let assigned = room.join(player, tx).await.unwrap();
    assert_eq!(assigned, id);
    rx
}

/// Receives until `pred` matches, failing after a minute of virtual time.
async fn wait_for<F>(rx: &mut EventReceiver, mut pred: F) -> Envelope
where
    F: FnMut(&ServerEvent) -> bool,
{
    timeout(Duration::from_secs(60), async {
        loop {
            let env = rx.recv().await.expect("room closed the channel");
            if pred(&env.event) {
                return env;
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

async fn started_match() -> (RoomHandle, JoinHandle<skirmish::game::RoomSnapshot>, EventReceiver, EventReceiver) {
    let (room, task) = open_room();
    let mut a = join(&room, "a", 6).await;
    let mut b = join(&room, "b", 4).await;
    assert!(room.submit("a", Intent::StartMatch));
    wait_for(&mut a, |e| matches!(e, ServerEvent::MovementBudget { .. })).await;
    wait_for(&mut b, |e| matches!(e, ServerEvent::MovementBudget { .. })).await;
    (room, task, a, b)
}

#[tokio::test(start_paused = true)]
async fn broadcasts_are_sequenced_per_room() {
    let (room, _task) = open_room();
    let mut a = join(&room, "a", 6).await;
    let mut b = join(&room, "b", 4).await;
    room.submit("a", Intent::StartMatch);

    let mut seen_a = Vec::new();
    let mut seen_b = Vec::new();
    for _ in 0..5 {
        seen_a.push(a.recv().await.unwrap());
    }
    for _ in 0..4 {
        seen_b.push(b.recv().await.unwrap());
    }
    let seqs: Vec<u64> = seen_a.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    // b joined after a's join was broadcast.
    assert_eq!(seen_b[0].seq, 2);
    assert_eq!(&seen_a[1..], &seen_b[..]);
    assert!(matches!(seen_a[2].event, ServerEvent::MatchStarted { .. }));
    assert_eq!(
        seen_a[3].event,
        ServerEvent::TurnStarted {
            player_id: "a".into(),
            speed: 6
        }
    );
}

#[tokio::test(start_paused = true)]
async fn rejections_reach_only_the_actor() {
    let (room, _task, mut a, mut b) = started_match().await;

    room.submit("b", Intent::EndTurnVoluntary);
    let env = wait_for(&mut b, |e| matches!(e, ServerEvent::IntentRejected { .. })).await;
    match env.event {
        ServerEvent::IntentRejected { intent, .. } => assert_eq!(intent, "endTurnVoluntary"),
        _ => unreachable!(),
    }

    room.submit("a", Intent::EndTurnVoluntary);
    let env = wait_for(&mut a, |e| {
        matches!(
            e,
            ServerEvent::IntentRejected { .. } | ServerEvent::TurnEnded { .. }
        )
    })
    .await;
    assert_eq!(
        env.event,
        ServerEvent::TurnEnded {
            player_id: "a".into(),
            forced: false
        }
    );
    let snap = room.snapshot().await.unwrap();
    assert_eq!(snap.current.as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn idle_turn_is_forced_to_end() {
    let (room, _task, mut a, _b) = started_match().await;
    let started = Instant::now();

    let tick = wait_for(&mut a, |e| matches!(e, ServerEvent::TurnTimeLeftUpdate { .. })).await;
    match tick.event {
        ServerEvent::TurnTimeLeftUpdate { seconds } => assert!(seconds <= 30),
        _ => unreachable!(),
    }
    let env = wait_for(&mut a, |e| matches!(e, ServerEvent::TurnEnded { .. })).await;
    assert_eq!(
        env.event,
        ServerEvent::TurnEnded {
            player_id: "a".into(),
            forced: true
        }
    );
    assert!(started.elapsed() >= Duration::from_secs(29));
    let snap = room.snapshot().await.unwrap();
    assert_eq!(snap.current.as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn moves_are_stepped_one_tile_at_a_time() {
    let (room, _task, mut a, _b) = started_match().await;
    let snap = room.snapshot().await.unwrap();
    let from = snap
        .players
        .iter()
        .find(|p| p.id == "a")
        .and_then(|p| p.position())
        .unwrap();
    let (first, dest) = if from == Position::new(0, 0) {
        (Position::new(0, 1), Position::new(0, 2))
    } else {
        (Position::new(9, 8), Position::new(9, 7))
    };

    room.submit("a", Intent::RequestMove {
        destination: dest,
        expected_from: Some(from),
    });
    let one = wait_for(&mut a, |e| matches!(e, ServerEvent::PlayerMoved { .. })).await;
    let at_one = Instant::now();
    assert_eq!(
        one.event,
        ServerEvent::PlayerMoved {
            player_id: "a".into(),
            new_position: first,
            is_teleport: false
        }
    );
    let two = wait_for(&mut a, |e| matches!(e, ServerEvent::PlayerMoved { .. })).await;
    assert!(two.seq > one.seq);
    assert!(at_one.elapsed() >= Duration::from_millis(150));
    let budget = wait_for(&mut a, |e| matches!(e, ServerEvent::MovementBudget { .. })).await;
    assert_eq!(
        budget.event,
        ServerEvent::MovementBudget {
            player_id: "a".into(),
            remaining: 4
        }
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_hands_the_win_to_the_survivor() {
    let (room, task, mut a, _b) = started_match().await;
    room.disconnect("b");
    wait_for(&mut a, |e| matches!(e, ServerEvent::PlayerRemoved { .. })).await;
    let ended = wait_for(&mut a, |e| matches!(e, ServerEvent::MatchEnded { .. })).await;
    assert_eq!(
        ended.event,
        ServerEvent::MatchEnded {
            winners: vec!["a".into()]
        }
    );
    let snap = task.await.unwrap();
    assert_eq!(snap.phase, Phase::Ended);
    assert_eq!(snap.winners, vec!["a".to_string()]);
    assert!(room.is_closed());
}

#[tokio::test(start_paused = true)]
async fn joins_after_the_start_are_refused() {
    let (room, _task, _a, _b) = started_match().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let late = Player::new("c", Stats::new(6, 4, 4, 4), DiceAssignment::AttackDie);
    assert!(room.join(late, tx).await.is_err());
}
