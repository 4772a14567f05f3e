//! huntsync command-line client.
//!
//! Runs one shared connection agent and one tab against a live deployment.
//!
//! ## Usage
//!
//! ```bash
//! huntsync watch                                  # print the view on every change
//! huntsync status 42 working                      # shown at once, confirmed later
//! huntsync solve 42 "RED HERRING"
//! huntsync add-puzzle --round 3 --name Fish --url https://hunt.example.com/fish
//! huntsync add-round --name Ocean --emoji 🌊
//! huntsync delete-puzzle 42
//! huntsync mute toggle
//! ```
//!
//! Connection settings come from `--config <file.ron>` and are overridden by
//! `--api`, `--stream` and `--cookie` (or `HUNTSYNC_COOKIE`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use huntsync_client::{
    AgentHandle, ClientConfig, HttpApi, LockManager, MutePreference, PuzzleView, TabEvent,
    TabHandle, WsUpstream, spawn_agent,
};
use huntsync_types::{ChangeId, NewPuzzle, NewRound, PuzzleId, PuzzlePatch, RoundId, Status};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "huntsync")]
#[command(about = "Real-time puzzle tracker client")]
struct Args {
    /// RON file with a ClientConfig
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the snapshot/write API
    #[arg(long, global = true)]
    api: Option<String>,

    /// WebSocket URL of the event stream
    #[arg(long, global = true)]
    stream: Option<String>,

    /// Session cookie, sent verbatim
    #[arg(long, global = true, env = "HUNTSYNC_COOKIE", hide_env_values = true)]
    cookie: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the puzzle view whenever it changes
    Watch {
        /// Only receive presence for this puzzle
        #[arg(long)]
        puzzle: Option<i64>,
    },
    /// Set a puzzle's status
    Status {
        puzzle: i64,
        #[arg(value_parser = parse_status)]
        status: Status,
    },
    /// Record an answer and mark the puzzle solved
    Solve { puzzle: i64, answer: String },
    AddPuzzle {
        #[arg(long)]
        round: i64,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        url: String,
    },
    AddRound {
        #[arg(long)]
        name: String,
        #[arg(long)]
        emoji: String,
        #[arg(long, default_value_t = 0)]
        hue: i64,
        #[arg(long, default_value_t = 0)]
        sort: i64,
        #[arg(long)]
        special: bool,
    },
    DeletePuzzle { puzzle: i64 },
    /// Show or change the local mute preference
    Mute {
        #[arg(value_enum)]
        action: Option<MuteAction>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MuteAction {
    On,
    Off,
    Toggle,
}

fn parse_status(s: &str) -> Result<Status, String> {
    Status::from_str(s).ok_or_else(|| format!("unknown status: {s:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    if let Command::Mute { action } = &args.command {
        return cmd_mute(*action);
    }

    let config = load_config(&args)?;
    let scope = match &args.command {
        Command::Watch { puzzle } => puzzle.map(PuzzleId),
        _ => None,
    };
    let mut session = Session::open(&config, scope).await?;

    let result = match args.command {
        Command::Watch { .. } => cmd_watch(&session.tab, &mut session.events).await,
        Command::Status { puzzle, status } => {
            let patch = PuzzlePatch::status(status);
            report(session.tab.update_puzzle_optimistic(PuzzleId(puzzle), patch).await?)
        }
        Command::Solve { puzzle, answer } => {
            report(session.tab.update_puzzle(PuzzleId(puzzle), PuzzlePatch::solved(answer)).await?)
        }
        Command::AddPuzzle { round, name, url } => {
            let new = NewPuzzle { name, round: RoundId(round), puzzle_url: url };
            report(session.tab.add_puzzle(new).await?)
        }
        Command::AddRound { name, emoji, hue, sort, special } => {
            let new = NewRound { name, emoji, hue, sort, special };
            report(session.tab.add_round(new).await?)
        }
        Command::DeletePuzzle { puzzle } => report(session.tab.delete_puzzle(PuzzleId(puzzle)).await?),
        Command::Mute { .. } => Ok(()),
    };

    session.close();
    result
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(api) = &args.api {
        config.api_base = api.clone();
    }
    if let Some(stream) = &args.stream {
        config.agent.stream_url = stream.clone();
    }
    if args.cookie.is_some() {
        config.session_cookie = args.cookie.clone();
    }
    Ok(config)
}

fn report(change: ChangeId) -> Result<()> {
    println!("ok @{change}");
    Ok(())
}

// ============================================================================
// Session
// ============================================================================

/// One agent with one tab attached.
struct Session {
    agent: AgentHandle,
    tab: TabHandle,
    events: broadcast::Receiver<TabEvent>,
}

impl Session {
    async fn open(config: &ClientConfig, scope: Option<PuzzleId>) -> Result<Self> {
        let upstream = WsUpstream::new(&config.agent.stream_url)
            .with_context(|| format!("stream url {}", config.agent.stream_url))?;
        let api = HttpApi::with_timeout(&config.api_base, config.session_cookie.clone(), config.http_timeout())
            .with_context(|| format!("api base {}", config.api_base))?;

        let locks = LockManager::new();
        let agent = spawn_agent(config.agent.clone(), Arc::new(upstream), locks.clone());
        let (tab, events) = TabHandle::open(&agent, Arc::new(api), &locks, scope)
            .await
            .context("loading snapshot")?;
        info!(tab = %tab.id().short(), api = %config.api_base, "session open");
        Ok(Self { agent, tab, events })
    }

    fn close(self) {
        self.tab.close();
        self.agent.shutdown();
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_watch(tab: &TabHandle, events: &mut broadcast::Receiver<TabEvent>) -> Result<()> {
    let mut view = tab.view();
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    bail!("tab stopped");
                }
                let current = view.borrow_and_update().clone();
                print_view(&current);
            }
            event = events.recv() => match event {
                Ok(TabEvent::Reload(reason)) => bail!("local state is stale ({reason:?}); restart to reload"),
                Ok(TabEvent::Connection(state)) => info!(%state, "connection"),
                Ok(TabEvent::Settings(settings)) => info!(hunt = %settings.hunt_name, "settings updated"),
                Ok(TabEvent::Presence(presence)) => debug!(puzzles = presence.len(), "presence"),
                Ok(TabEvent::Users(users)) => debug!(users = users.users.len(), replace = users.replace, "users"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event receiver lagged"),
                Err(RecvError::Closed) => bail!("tab stopped"),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn print_view(view: &PuzzleView) {
    println!("── {} of {} solved ──", view.solved_count, view.puzzle_count);
    for round in &view.rounds {
        let mark = if round.complete { "✔" } else { " " };
        println!("{mark} {}  {}/{}", round.display_name, round.solved, round.total);
        for p in &round.puzzles {
            let meta = if p.meta { " [meta]" } else { "" };
            let reminder = p
                .reminder
                .map(|r| format!("  ⏰ {}", r.with_timezone(&Local).format("%a %H:%M")))
                .unwrap_or_default();
            println!("    {:<12} {}{meta}  {}{reminder}", p.status.label(), p.name, p.answer);
        }
    }
}

fn cmd_mute(action: Option<MuteAction>) -> Result<()> {
    let prefs = MutePreference::open_default()?;
    let muted = match action {
        None => prefs.get(),
        Some(MuteAction::On) => {
            prefs.set(true)?;
            true
        }
        Some(MuteAction::Off) => {
            prefs.set(false)?;
            false
        }
        Some(MuteAction::Toggle) => prefs.toggle()?,
    };
    println!("{}", if muted { "muted" } else { "unmuted" });
    Ok(())
}
