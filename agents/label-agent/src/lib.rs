//! Label Agent Library
//!
//! This crate keeps an agent's advertised labels in sync with a local label
//! file and with the controller that schedules work onto the agent.

pub mod agent;
pub mod cli;
pub mod controller;

// Re-exports for convenience
pub use agent::batch::BatchBuilder;
pub use agent::labels::LabelSet;
pub use agent::restart::{HostProcess, LaunchCommand, Relauncher, RestartError, SystemHost};
pub use agent::soft_update::{SoftUpdater, UpdateOutcome};
pub use agent::state::{ReconcileMode, WatcherState, WatcherStateMachine};
pub use agent::watcher::{LabelFileWatcher, PollResult, WatcherError, WatcherHandle};
pub use cli::config::Config;
pub use controller::client::{ClientError, ControllerConnector, HttpConnector, LabelSession};
