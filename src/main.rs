use std::{
    error::Error,
    fs::File,
    io::{self, stdin, Write},
    path::PathBuf,
};

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    cursor, queue,
    style::Print,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType},
    tty::IsTty,
};
use tracing::{info, warn};

use pocketed::{
    alarm::PendingAlarms,
    clock::{Clock, SystemClock},
    config::{Config, ConfigStore, FileConfigStore},
    event::DeviceState,
    event_log::{EventLog, MemoryEventLog, SqliteEventLog},
    history, logging,
    runtime::{dispatch, CrosstermNotifier, FixedTicker, Runner, Signal},
    util::{clock_format, progress_bar},
    GameState, OutcomeController, SessionId, Status,
};

/// keep your phone locked to reach the goal before your grace runs out
#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct Cli {
    /// player id; defaults to the configured user
    #[clap(short = 'u', long, global = true)]
    user: Option<String>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// play a game in the terminal (l = lock, u = unlock, p = powerup)
    Play {
        /// goal in seconds of locked time
        #[clap(short = 'g', long)]
        goal: Option<u64>,

        /// grace in seconds of allowed unlocked time
        #[clap(short = 'G', long)]
        grace: Option<u64>,

        /// resume the newest unfinished game, or the one with this id
        #[clap(long, num_args = 0..=1, default_missing_value = "latest")]
        resume: Option<String>,
    },
    /// win/loss tally for the player
    Stats,
    /// write the player's sessions as CSV
    Export {
        /// output file; stdout if omitted
        #[clap(short = 'o', long)]
        out: Option<PathBuf>,
    },
    /// show or change persisted settings
    Config {
        #[clap(long)]
        goal: Option<u64>,
        #[clap(long)]
        grace: Option<u64>,
        #[clap(long)]
        tick_ms: Option<u64>,
        /// make this the default player
        #[clap(long)]
        set_user: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logging::init();

    let store = FileConfigStore::new();
    let cfg = store.load();
    let user = cli.user.clone().unwrap_or_else(|| cfg.user_id.clone());

    match cli.command.clone().unwrap_or(Command::Play {
        goal: None,
        grace: None,
        resume: None,
    }) {
        Command::Play {
            goal,
            grace,
            resume,
        } => {
            if !stdin().is_tty() {
                let mut cmd = Cli::command();
                cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
            }
            let cfg = Config {
                goal_secs: goal.unwrap_or(cfg.goal_secs),
                grace_secs: grace.unwrap_or(cfg.grace_secs),
                ..cfg
            };
            play(&cfg, &user, resume.as_deref())
        }
        Command::Stats => {
            let log = SqliteEventLog::open_default()?;
            let stats = history::stats_for_user(&log, &user)?;
            let rate = stats
                .win_rate()
                .map_or("-".to_string(), |r| format!("{:.0}%", r * 100.0));
            println!(
                "{user}: {} games, {} won, {} lost, {} unfinished, {} reset, win rate {rate}",
                stats.total(),
                stats.won,
                stats.lost,
                stats.pending,
                stats.abandoned
            );
            Ok(())
        }
        Command::Export { out } => {
            let log = SqliteEventLog::open_default()?;
            let rows = match out {
                Some(path) => history::export_csv(&log, &user, File::create(&path)?)?,
                None => history::export_csv(&log, &user, io::stdout().lock())?,
            };
            info!(rows, user = %user, "sessions exported");
            Ok(())
        }
        Command::Config {
            goal,
            grace,
            tick_ms,
            set_user,
        } => {
            let changed = goal.is_some() || grace.is_some() || tick_ms.is_some() || set_user.is_some();
            let cfg = Config {
                user_id: set_user.unwrap_or(cfg.user_id),
                goal_secs: goal.unwrap_or(cfg.goal_secs),
                grace_secs: grace.unwrap_or(cfg.grace_secs),
                tick_ms: tick_ms.unwrap_or(cfg.tick_ms),
            };
            cfg.rules()?;
            if changed {
                store.save(&cfg)?;
            }
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(())
        }
    }
}

fn open_log() -> Box<dyn EventLog> {
    match SqliteEventLog::open_default() {
        Ok(log) => Box::new(log),
        Err(e) => {
            warn!(error = %e, "event log unavailable, history will not be kept");
            Box::new(MemoryEventLog::new())
        }
    }
}

fn play(cfg: &Config, user: &str, resume: Option<&str>) -> Result<(), Box<dyn Error>> {
    let rules = cfg.rules()?;
    let log = open_log();

    let resume_id = match resume {
        None => None,
        Some("latest") => history::latest_pending(log.as_ref(), user)?.map(|r| r.id),
        Some(raw) => Some(SessionId::parse(raw).ok_or_else(|| format!("not a session id: {raw}"))?),
    };

    let mut game = OutcomeController::new(log, PendingAlarms::new(), SystemClock::new());
    match resume_id {
        Some(id) => {
            game.resume(id)?;
        }
        None => {
            game.start(user, rules)?;
        }
    }

    enable_raw_mode()?;
    let result = run_loop(&mut game, cfg, user);
    disable_raw_mode()?;
    println!();

    let status = game.status();
    if let Some(id) = status.session_id {
        info!(session = %id, state = %status.state, "leaving game");
    }
    result
}

fn run_loop(
    game: &mut OutcomeController<Box<dyn EventLog>, PendingAlarms, SystemClock>,
    cfg: &Config,
    user: &str,
) -> Result<(), Box<dyn Error>> {
    let rules = cfg.rules()?;
    let runner = Runner::new(CrosstermNotifier::new(), FixedTicker::new(cfg.tick()));
    let mut stdout = io::stdout();
    let mut message = String::new();

    render(&mut stdout, &game.status(), &message)?;
    loop {
        let signal = runner.step();
        if signal == Signal::Quit {
            return Ok(());
        }

        let now = game.clock().now();
        for alarm in game.alarms_mut().take_due(now) {
            info!(alarm = %alarm.id, session = %alarm.payload.session_id, "alarm fired");
            message = alarm.payload.message;
        }

        match dispatch(game, signal, user, rules) {
            Ok(GameState::Won) => message = "Goal reached, you won!".into(),
            Ok(GameState::Lost) => message = "Out of grace, you lost.".into(),
            Ok(GameState::Reset) => message = "Press s to start.".into(),
            Ok(GameState::Running) if signal != Signal::Tick => message.clear(),
            Ok(GameState::Running) => {}
            Err(e) => {
                warn!(error = %e, ?signal, "signal rejected");
                message = e.to_string();
            }
        }

        render(&mut stdout, &game.status(), &message)?;
    }
}

fn status_line(status: &Status) -> String {
    let device = match status.device {
        Some(DeviceState::Locked) => "locked",
        Some(DeviceState::Unlocked) => "unlocked",
        None => "-",
    };
    let Some(rules) = status.rules else {
        return format!("{:<7}", status.state.to_string());
    };
    let m = &status.metrics;
    format!(
        "{:<7} {:<8} {} {} to go  grace {}",
        status.state.to_string(),
        device,
        progress_bar(m.locked_elapsed, rules.goal, 20),
        clock_format(status.goal_remaining()),
        clock_format(m.grace_remaining),
    )
}

fn render<W: Write>(out: &mut W, status: &Status, message: &str) -> io::Result<()> {
    queue!(
        out,
        cursor::MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(status_line(status)),
        Print("  "),
        Print(message),
        Print("  [l]ock [u]nlock [p]owerup [s]tart [r]eset [q]uit"),
    )?;
    out.flush()
}
