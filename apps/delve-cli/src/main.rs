use anyhow::Context;
use clap::{Parser, Subcommand};
use delve_common::{Direction, GameConfig};
use delve_host::{ConnectionId, GameHost, LoopbackTransport, TicketAsId};
use delve_kernel::sandbox::{BasicCombat, ChaseAi, RoomGrid};
use delve_kernel::{Intent, PlayerInput, Simulation};
use delve_replica::ClientReplica;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "delve-cli", about = "Headless delve match runner")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Load and validate a config file (.yaml, .yml or .json)
    CheckConfig { path: PathBuf },
    /// Play a match with wandering bots over a loopback transport
    Run {
        /// Config file; the built-in defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of bot players
        #[arg(short, long, default_value = "2")]
        bots: u32,
        /// Override the match length in seconds
        #[arg(short, long)]
        secs: Option<u64>,
        /// Sleep between wakes instead of advancing a virtual clock
        #[arg(long)]
        realtime: bool,
    },
}

/// How often each bot issues a command.
const BOT_THINK: Duration = Duration::from_millis(250);

struct Bot {
    conn: ConnectionId,
    replica: ClientReplica,
    events_seen: usize,
    next_think: Duration,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("delve-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("kernel: {}", delve_kernel::crate_info());
            println!("loot: {}", delve_loot::crate_info());
            println!("protocol: {}", delve_protocol::crate_info());
            println!("replica: {}", delve_replica::crate_info());
            println!("host: {}", delve_host::crate_info());
        }
        Commands::CheckConfig { path } => {
            let config = GameConfig::load(&path)
                .with_context(|| format!("checking {}", path.display()))?;
            println!("{}", describe(&config));
        }
        Commands::Run {
            config,
            bots,
            secs,
            realtime,
        } => {
            let mut config = match config {
                Some(path) => GameConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => GameConfig::default(),
            };
            if let Some(secs) = secs {
                config.match_duration_secs = secs;
                config.portal_open_secs = config.portal_open_secs.min(secs);
                config.validate().context("applying --secs")?;
            }
            run(config, bots, realtime)?;
        }
    }

    Ok(())
}

fn describe(config: &GameConfig) -> String {
    format!(
        "ok: {} Hz, {} s match, {}x{} dungeon, {} items, {} enemies, {} loot placements",
        config.tick_rate,
        config.match_duration_secs,
        config.dungeon.width,
        config.dungeon.height,
        config.items.len(),
        config.enemies.len(),
        config.loot.len()
    )
}

/// JSON for one random bot command.
fn bot_command(rng: &mut SmallRng, tick: u64) -> anyhow::Result<String> {
    let direction = Direction::ALL[rng.gen_range(0..Direction::ALL.len())];
    let input = PlayerInput::new(tick, Intent::Move { direction });
    Ok(serde_json::to_string(&input)?)
}

fn run(config: GameConfig, bots: u32, realtime: bool) -> anyhow::Result<()> {
    let match_length = config.match_duration();
    let grid = RoomGrid::new(config.dungeon.clone());
    let mut rng = SmallRng::seed_from_u64(config.seed);
    let config = Arc::new(config);
    let sim = Simulation::new(
        Arc::clone(&config),
        grid,
        BasicCombat::default(),
        ChaseAi::default(),
    );
    let mut host = GameHost::new(sim, LoopbackTransport::new(1024), TicketAsId);

    let start = Instant::now();
    let mut now = start;
    host.start(now)?;

    let mut players = Vec::new();
    for n in 1..=bots {
        let conn = ConnectionId::from(n);
        host.connect(conn, &format!("bot-{n}"), now)?;
        players.push(Bot {
            conn,
            replica: ClientReplica::new(&config),
            events_seen: 0,
            next_think: Duration::ZERO,
        });
    }

    // Give up a second after the clock should have run out.
    let deadline = match_length + Duration::from_secs(1);
    while !host.sim().is_game_over() && now.duration_since(start) < deadline {
        let elapsed = now.duration_since(start);
        for bot in &mut players {
            if elapsed >= bot.next_think {
                let text = bot_command(&mut rng, host.sim().tick())?;
                host.on_message(bot.conn, &text);
                bot.next_think = elapsed + BOT_THINK;
            }
        }

        let report = host.pump(now);
        let local_ms = elapsed.as_secs_f64() * 1000.0;
        for bot in &mut players {
            for frame in host.transport_mut().take(bot.conn) {
                if let Err(err) = bot.replica.handle_frame(&frame, local_ms) {
                    tracing::warn!(conn = bot.conn, %err, "bad frame");
                }
            }
            bot.events_seen += bot.replica.drain_events().len();
        }

        let wake = report
            .next_wake
            .unwrap_or(Duration::from_millis(1))
            .max(Duration::from_millis(1));
        if realtime {
            std::thread::sleep(wake);
            now = Instant::now();
        } else {
            now += wake;
        }
    }
    host.stop();

    let local_ms = now.duration_since(start).as_secs_f64() * 1000.0;
    println!(
        "match over: tick={}, broadcasts={}, game_over={}, connected={}",
        host.sim().tick(),
        host.broadcasts(),
        host.sim().is_game_over(),
        host.connection_count()
    );
    for bot in &players {
        let state = bot.replica.state(local_ms);
        println!(
            "conn {}: buffered={}, visible={}, gold={}, events={}",
            bot.conn,
            bot.replica.buffer().len(),
            state.entities.len(),
            bot.replica.inventory().gold,
            bot.events_seen
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_commands_parse_on_the_server() {
        let mut rng = SmallRng::seed_from_u64(3);
        for tick in 0..20 {
            let text = bot_command(&mut rng, tick).unwrap();
            let input = delve_protocol::parse_client_message(&text).unwrap();
            assert_eq!(input.tick, tick);
            assert!(matches!(input.intent, Intent::Move { .. }));
        }
    }

    #[test]
    fn describe_loaded_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("match.yaml");
        std::fs::write(&path, "tick_rate: 10\nmatch_duration_secs: 120\n").unwrap();
        let config = GameConfig::load(&path).unwrap();
        let text = describe(&config);
        assert!(text.starts_with("ok: 10 Hz, 120 s match"), "{text}");
    }

    #[test]
    fn short_virtual_match_finishes() {
        let config = GameConfig {
            match_duration_secs: 2,
            portal_open_secs: 1,
            ..GameConfig::default()
        };
        run(config, 2, false).unwrap();
    }
}
