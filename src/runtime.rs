//! Run loop plumbing: where signals come from and how they reach the game.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crossterm::event::{self, Event as CtEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::debug;

use crate::alarm::AlarmScheduler;
use crate::clock::Clock;
use crate::controller::{GameState, OutcomeController};
use crate::error::GameError;
use crate::event_log::EventLog;
use crate::session::Rules;

/// Everything the run loop reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Locked,
    Unlocked,
    Powerup,
    Start,
    Reset,
    Quit,
    Tick,
}

impl Signal {
    /// Keyboard stand-ins for the device: `l`/`u` lock and unlock, `p` is a
    /// powerup, `s` starts, `r` resets, `q`/Esc/Ctrl-C quit.
    pub fn from_key(key: KeyEvent) -> Option<Self> {
        if key.kind == KeyEventKind::Release {
            return None;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Signal::Quit)
            }
            KeyCode::Char('l') | KeyCode::Char('L') => Some(Signal::Locked),
            KeyCode::Char('u') | KeyCode::Char('U') => Some(Signal::Unlocked),
            KeyCode::Char('p') | KeyCode::Char('P') => Some(Signal::Powerup),
            KeyCode::Char('s') | KeyCode::Char('S') => Some(Signal::Start),
            KeyCode::Char('r') | KeyCode::Char('R') => Some(Signal::Reset),
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(Signal::Quit),
            _ => None,
        }
    }
}

/// Source of device lock-state changes and user commands.
pub trait DeviceStateNotifier: Send + 'static {
    /// Block for up to `timeout` waiting for a signal.
    fn recv_timeout(&self, timeout: Duration) -> Result<Signal, RecvTimeoutError>;
}

/// Reads the terminal on a background thread and maps keys to signals.
pub struct CrosstermNotifier {
    rx: Receiver<Signal>,
}

impl CrosstermNotifier {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || loop {
            match event::read() {
                Ok(CtEvent::Key(key)) => {
                    let Some(signal) = Signal::from_key(key) else {
                        continue;
                    };
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        });

        Self { rx }
    }
}

impl Default for CrosstermNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateNotifier for CrosstermNotifier {
    fn recv_timeout(&self, timeout: Duration) -> Result<Signal, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Channel-fed notifier for headless runs and tests.
pub struct ChannelNotifier {
    rx: Receiver<Signal>,
}

impl ChannelNotifier {
    pub fn pair() -> (Sender<Signal>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl DeviceStateNotifier for ChannelNotifier {
    fn recv_timeout(&self, timeout: Duration) -> Result<Signal, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// How often the run loop re-evaluates the game when no signal arrives.
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Advances the game one signal or tick at a time.
pub struct Runner<N: DeviceStateNotifier, T: Ticker> {
    notifier: N,
    ticker: T,
}

impl<N: DeviceStateNotifier, T: Ticker> Runner<N, T> {
    pub fn new(notifier: N, ticker: T) -> Self {
        Self { notifier, ticker }
    }

    /// Blocks up to one tick interval; returns the next signal, or `Tick`.
    /// A notifier that has gone away can never deliver another signal, so
    /// that reads as `Quit`.
    pub fn step(&self) -> Signal {
        match self.notifier.recv_timeout(self.ticker.interval()) {
            Ok(signal) => signal,
            Err(RecvTimeoutError::Timeout) => Signal::Tick,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("notifier disconnected");
                Signal::Quit
            }
        }
    }
}

/// Route one signal to the controller. `Quit` is left to the caller.
pub fn dispatch<L, A, C>(
    game: &mut OutcomeController<L, A, C>,
    signal: Signal,
    user_id: &str,
    rules: Rules,
) -> Result<GameState, GameError>
where
    L: EventLog,
    A: AlarmScheduler,
    C: Clock,
{
    match signal {
        Signal::Locked => game.device_locked(),
        Signal::Unlocked => game.device_unlocked(),
        Signal::Powerup => game.powerup(),
        Signal::Tick => Ok(game.tick()),
        Signal::Reset => {
            game.reset();
            Ok(game.state())
        }
        Signal::Start if game.state() == GameState::Running => {
            debug!("start ignored while a game is running");
            Ok(game.state())
        }
        Signal::Start => game.start(user_id, rules).map(|_| game.state()),
        Signal::Quit => Ok(game.state()),
    }
}
