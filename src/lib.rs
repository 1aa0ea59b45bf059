// Library surface for the binary and the headless/integration tests.
pub mod alarm;
pub mod app_dirs;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod event_log;
pub mod history;
pub mod logging;
pub mod runtime;
pub mod session;
pub mod timing;
pub mod tracker;
pub mod util;

pub use controller::{GameState, OutcomeController, Status};
pub use error::{AlarmError, GameError, StorageError};
pub use session::{Outcome, Rules, SessionId};
pub use timing::{DerivedMetrics, TimingEngine};
