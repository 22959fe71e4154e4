use std::io::Read;
use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::Datelike;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use manifootball::autocreate::{self, AutocreateOptions};
use manifootball::cache::ResponseCache;
use manifootball::comment::{self, CommentOptions};
use manifootball::config::{AppConfig, CONFIG_PATH};
use manifootball::fastcast::{FastcastConnection, Lifecycle, Subscription};
use manifootball::manifold::ManifoldClient;
use manifootball::matching::MatchingGames;
use manifootball::prompt::Prompter;
use manifootball::recorder::SnapshotRecorder;
use manifootball::scoreboard::{ScoreboardOptions, Since, build_scoreboard, render_table};
use manifootball::stats::{GameStatus, Poll, StatsClient};

/// End-of-text control byte sent by a raw-mode terminal on Ctrl+C.
const ETX: u8 = 0x03;

#[derive(Parser)]
#[command(name = "mf", about = "Live game feeds and market scoreboards")]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record patched live snapshots of one game until interrupted
    Live {
        /// Event id of the game
        #[arg(long)]
        game: String,

        #[arg(long, value_enum, default_value_t = Topic::FootballCollegeFootball)]
        topic: Topic,
    },
    /// Print matched games ordered by time remaining, with market odds
    Scoreboard(ScoreboardArgs),
    /// Find, create and update the markets for a week of games
    Autocreate {
        /// Only this game id
        #[arg(long)]
        game: Option<u64>,

        /// Week of the regular season
        #[arg(long)]
        week: u32,

        /// Poll used for team rankings in questions
        #[arg(long, value_enum, default_value_t = PollArg::Ap)]
        poll: PollArg,

        /// Season year (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,
    },
    /// Offer line-move and head-to-head comments on matched markets
    Comment {
        /// Only this game id
        #[arg(long)]
        game: Option<u64>,

        /// Week of the regular season
        #[arg(long)]
        week: u32,

        /// Season year (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PollArg {
    Ap,
    Cfp,
}

impl From<PollArg> for Poll {
    fn from(poll: PollArg) -> Self {
        match poll {
            PollArg::Ap => Poll::Ap,
            PollArg::Cfp => Poll::Cfp,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Topic {
    #[value(name = "football-college-football")]
    FootballCollegeFootball,
    #[value(name = "hockey-nhl")]
    HockeyNhl,
}

impl Topic {
    fn as_str(self) -> &'static str {
        match self {
            Topic::FootballCollegeFootball => "football-college-football",
            Topic::HockeyNhl => "hockey-nhl",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Classification {
    Fbs,
    Fcs,
    Ii,
    Iii,
}

#[derive(Clone, Copy, ValueEnum)]
enum Status {
    Scheduled,
    #[value(name = "in_progress")]
    InProgress,
    Completed,
}

impl From<Status> for GameStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Scheduled => GameStatus::Scheduled,
            Status::InProgress => GameStatus::InProgress,
            Status::Completed => GameStatus::Completed,
        }
    }
}

#[derive(clap::Args)]
struct ScoreboardArgs {
    #[arg(long, value_enum, default_value_t = Classification::Fbs)]
    classification: Classification,

    /// Conference abbreviation, e.g. sec or b1g
    #[arg(long)]
    conference: Option<String>,

    /// Only show games with these statuses
    #[arg(long, value_enum, num_args = 1..)]
    status: Vec<Status>,

    /// any, yesterday, today, tomorrow or <N>h
    #[arg(long, default_value = "any")]
    since: Since,

    /// Hide games whose market is resolved
    #[arg(long)]
    unresolved: bool,

    /// Week of the regular season
    #[arg(long)]
    week: u32,

    /// Season year (defaults to the current year)
    #[arg(long)]
    year: Option<i32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Command::Live { .. } => "debug",
        Command::Scoreboard(_) | Command::Autocreate { .. } | Command::Comment { .. } => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load_or_default(&cli.config)?;
    debug!("Loaded config from {}", cli.config.display());

    match cli.command {
        Command::Live { game, topic } => live(&config, &game, topic).await,
        Command::Scoreboard(args) => scoreboard(&config, args).await,
        Command::Autocreate {
            game,
            week,
            poll,
            year,
        } => {
            let options = AutocreateOptions {
                year: year.unwrap_or_else(current_year),
                week,
                game,
                poll: poll.into(),
            };
            run_autocreate(&config, &options).await
        }
        Command::Comment { game, week, year } => {
            let options = CommentOptions {
                year: year.unwrap_or_else(current_year),
                week,
                game,
            };
            run_comment(&config, &options).await
        }
    }
}

// ── live ───────────────────────────────────────────────────────────

async fn live(config: &AppConfig, game: &str, topic: Topic) -> Result<()> {
    info!("game {game}, topic {}", topic.as_str());
    let recorder = SnapshotRecorder::new(&config.settings.live_data_path);

    let mut conn = FastcastConnection::new();
    let lifecycle = conn.lifecycle();

    let result = match connect_and_subscribe(&mut conn, game, topic).await {
        Ok(snapshots) => record_until_stopped(snapshots, lifecycle, &recorder).await,
        Err(e) => Err(e),
    };

    if let Err(e) = conn.dispose().await {
        debug!("dispose skipped: {e}");
    }
    info!("done");
    result
}

async fn connect_and_subscribe(
    conn: &mut FastcastConnection,
    game: &str,
    topic: Topic,
) -> Result<Subscription> {
    conn.connect().await?;
    conn.subscribe(game, topic.as_str())
}

async fn record_until_stopped(
    mut snapshots: Subscription,
    mut lifecycle: tokio::sync::broadcast::Receiver<Lifecycle>,
    recorder: &SnapshotRecorder,
) -> Result<()> {
    let interrupted = watch_stdin_for_etx();
    info!(
        "Recording to {}. Press Ctrl+C to stop.",
        recorder.root().display()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = interrupted.cancelled() => {
                info!("exit");
                break;
            }
            event = lifecycle.recv() => match event {
                Ok(Lifecycle::Closed) | Err(RecvError::Closed) => {
                    info!("connection closed");
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            },
            snapshot = snapshots.next() => match snapshot {
                Some(snapshot) => {
                    if let Err(e) = recorder.record(&snapshot).await {
                        warn!("could not record snapshot mid={}: {e:#}", snapshot.mid);
                    }
                }
                None => {
                    info!("subscription ended");
                    break;
                }
            },
        }
    }
    Ok(())
}

/// Cancelled when stdin delivers the ETX byte. Stdin is read on a plain
/// thread so a pending read never holds up runtime shutdown.
fn watch_stdin_for_etx() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 64];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) if buf[..n].contains(&ETX) => {
                    trigger.cancel();
                    break;
                }
                Ok(_) => {}
            }
        }
    });
    token
}

// ── scoreboard ─────────────────────────────────────────────────────

async fn scoreboard(config: &AppConfig, args: ScoreboardArgs) -> Result<()> {
    if config.stats.api_key.is_empty() {
        bail!("stats API key missing; run setup-config or set CFB_API_KEY");
    }

    let cache = ResponseCache::new(&config.settings.cache_path);
    let stats = StatsClient::new(&config.stats, &cache)?;
    let manifold = ManifoldClient::new(&config.manifold, &cache)?;
    let matching = MatchingGames::load(&config.settings.matching_games_path)
        .await?
        .confirmed();
    info!("{} matched games", matching.len());

    let classification = match args.classification {
        Classification::Fbs => "fbs",
        Classification::Fcs => "fcs",
        Classification::Ii => "ii",
        Classification::Iii => "iii",
    };
    let options = ScoreboardOptions {
        year: args.year.unwrap_or_else(current_year),
        week: args.week,
        classification: Some(classification.to_string()),
        conference: args.conference,
        statuses: args.status.into_iter().map(GameStatus::from).collect(),
        since: args.since,
        unresolved: args.unresolved,
    };

    let rows = build_scoreboard(&stats, &manifold, &matching, &options).await?;
    println!("{}", render_table(&rows));
    Ok(())
}

// ── autocreate / comment ───────────────────────────────────────────

fn current_year() -> i32 {
    chrono::Local::now().year()
}

fn rest_clients(config: &AppConfig) -> Result<(StatsClient, ManifoldClient)> {
    if config.manifold.api_key.is_empty() {
        bail!("Manifold API key missing; run setup-config or set MANIFOLD_API_KEY");
    }
    if config.stats.api_key.is_empty() {
        bail!("stats API key missing; run setup-config or set CFB_API_KEY");
    }
    let cache = ResponseCache::new(&config.settings.cache_path);
    Ok((
        StatsClient::new(&config.stats, &cache)?,
        ManifoldClient::new(&config.manifold, &cache)?,
    ))
}

async fn run_autocreate(config: &AppConfig, options: &AutocreateOptions) -> Result<()> {
    let (stats, manifold) = rest_clients(config)?;
    let path = &config.settings.matching_games_path;
    let mut matching = MatchingGames::load(path).await?;
    info!("{} matching game entries", matching.len());

    let mut prompt = Prompter::stdio();
    let result = autocreate::run(&stats, &manifold, &mut matching, options, &mut prompt).await;

    // Matches confirmed before a failure are kept.
    matching.save(path).await?;
    result
}

async fn run_comment(config: &AppConfig, options: &CommentOptions) -> Result<()> {
    let (stats, manifold) = rest_clients(config)?;
    let matching = MatchingGames::load(&config.settings.matching_games_path).await?;

    let mut prompt = Prompter::stdio();
    comment::run(
        &stats,
        &manifold,
        &matching,
        options,
        chrono::Utc::now(),
        &mut prompt,
    )
    .await
}
