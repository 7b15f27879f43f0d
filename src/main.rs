//! Binary entrypoint for the Skirmish CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and the sample board into the data directory
//! - `validate-board <path>` - check a board template JSON file
//! - `boards` - list the boards in the data directory
//! - `simulate [--board <id>] [--bots <n>] [--seed <n>] [--max-seconds <s>]` - run an all-bot match
//!
//! See the library crate docs for module-level details: `skirmish::`.
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use skirmish::config::Config;
use skirmish::game::board_store::{sample_board, BoardStore, JsonBoardStore, MemoryBoardStore, StoreError};
use skirmish::game::types::{DiceAssignment, Player, Stats, VirtualProfile};
use skirmish::game::{BoardTemplate, Intent};
use skirmish::logutil::init_logging;
use skirmish::metrics;
use skirmish::server::RoomHub;

#[derive(Parser)]
#[command(name = "skirmish")]
#[command(about = "Turn-based tactical board game rooms")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and the sample board
    Init,
    /// Validate a board template JSON file
    ValidateBoard {
        /// Path to the board JSON
        path: String,
    },
    /// List boards in the data directory
    Boards,
    /// Run a match between virtual players and log every broadcast
    Simulate {
        /// Board id; defaults to `storage.default_board`
        #[arg(short, long)]
        board: Option<String>,
        /// Number of bots (capped by the board's capacity)
        #[arg(long, default_value_t = 2)]
        bots: usize,
        /// Seed for character rolls and the room's dice
        #[arg(long)]
        seed: Option<u64>,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 600)]
        max_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Init => None,
        _ => Some(Config::load(&cli.config).await.unwrap_or_else(|e| {
            eprintln!("Using default configuration: {e:#}");
            Config::default()
        })),
    };
    match &config {
        Some(cfg) => init_logging(&cfg.logging.level, cfg.logging.file.as_deref(), cli.verbose),
        None => init_logging("info", None, cli.verbose),
    }

    match cli.command {
        Commands::Init => {
            info!("Initializing new configuration");
            Config::create_default(&cli.config).await?;
            let cfg = Config::load(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            let store = JsonBoardStore::new(&cfg.storage.data_dir);
            let board = sample_board();
            store
                .persist_board(&board.id, &board)
                .with_context(|| format!("writing sample board to {}", store.dir().display()))?;
            info!("Sample board '{}' written to {}", board.id, store.dir().display());
        }
        Commands::ValidateBoard { path } => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path))?;
            let board: BoardTemplate =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;
            board.validate().with_context(|| format!("board '{}' is invalid", board.id))?;
            println!(
                "{}: ok ({} x {}, {} spawns, {:?})",
                board.id,
                board.size,
                board.size,
                board.spawn_count(),
                board.mode
            );
        }
        Commands::Boards => {
            let cfg = config.unwrap_or_default();
            let store = JsonBoardStore::new(&cfg.storage.data_dir);
            for id in store.list()? {
                println!("{}", id);
            }
        }
        Commands::Simulate {
            board,
            bots,
            seed,
            max_seconds,
        } => {
            let mut cfg = config.unwrap_or_default();
            if seed.is_some() {
                cfg.game.rng_seed = seed;
            }
            let board_id = board.unwrap_or_else(|| cfg.storage.default_board.clone());
            simulate(cfg, &board_id, bots, Duration::from_secs(max_seconds)).await?;
        }
    }

    Ok(())
}

/// Board store for `simulate`: the data directory, or the built-in sample
/// board when the directory does not have the requested one.
fn simulation_store(cfg: &Config, board_id: &str) -> Result<Arc<dyn BoardStore>> {
    let json = JsonBoardStore::new(&cfg.storage.data_dir);
    match json.fetch_board_template(board_id) {
        Ok(_) => Ok(Arc::new(json)),
        Err(StoreError::NotFound(_)) if board_id == sample_board().id => {
            warn!("Board '{}' not in {}; using the built-in sample", board_id, json.dir().display());
            Ok(Arc::new(MemoryBoardStore::with_board(sample_board())))
        }
        Err(e) => Err(e).with_context(|| format!("loading board '{}'", board_id)),
    }
}

fn roll_bot(rng: &mut StdRng, index: usize) -> Player {
    let mut stats = Stats::new(4, 4, 4, 4);
    if rng.gen_bool(0.5) {
        stats.health += 2;
    } else {
        stats.speed += 2;
    }
    let dice = if rng.gen_bool(0.5) {
        DiceAssignment::AttackDie
    } else {
        DiceAssignment::DefenseDie
    };
    let profile = if index % 2 == 0 {
        VirtualProfile::Aggressive
    } else {
        VirtualProfile::Defensive
    };
    Player::virtual_player(format!("bot{}", index + 1), stats, dice, profile)
}

async fn simulate(cfg: Config, board_id: &str, bots: usize, limit: Duration) -> Result<()> {
    let store = simulation_store(&cfg, board_id)?;
    let capacity = store
        .fetch_board_template(board_id)?
        .board_size()
        .map(|s| s.capacity())
        .unwrap_or(2);
    let bots = bots.clamp(2, capacity);
    let mut rng = match cfg.game.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let hub = RoomHub::new(cfg.game.clone(), store);
    let (room, task) = hub.create_room(board_id).await?;
    info!("Simulating on board '{}' in room {} with {} bots", board_id, room.code(), bots);

    let (obs_tx, mut obs_rx) = mpsc::unbounded_channel();
    room.observe(obs_tx);
    let mut admin = None;
    let mut sinks = Vec::new();
    for i in 0..bots {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = room.join(roll_bot(&mut rng, i), tx).await?;
        admin.get_or_insert(id);
        sinks.push(rx);
    }
    let Some(admin) = admin else {
        bail!("no players joined");
    };
    room.submit(&admin, Intent::StartMatch);

    let watch = async {
        while let Some(env) = obs_rx.recv().await {
            info!("#{} {}", env.seq, serde_json::to_string(&env.event).unwrap_or_default());
        }
    };
    let finished = timeout(limit, async {
        tokio::join!(watch, task).1
    })
    .await;

    match finished {
        Ok(Ok(snapshot)) => {
            println!("winners: {:?}", snapshot.winners);
        }
        Ok(Err(e)) => bail!("room task failed: {}", e),
        Err(_) => {
            warn!("Simulation hit the {}s limit", limit.as_secs());
            room.shutdown().await;
        }
    }
    drop(sinks);
    let m = metrics::snapshot();
    info!(
        "intents accepted {} rejected {}, fights {}, events {}",
        m.intents_accepted, m.intents_rejected, m.fights_started, m.events_broadcast
    );
    Ok(())
}
