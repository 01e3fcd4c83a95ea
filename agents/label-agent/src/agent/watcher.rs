//! Label File Watcher
//!
//! Polls the label file and keeps the controller in step with it. Changes
//! are first pushed through the controller's label API (soft update); when
//! that fails the agent relaunches itself (hard restart) and the loop ends,
//! leaving the replacement process to take over.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::agent::labels::LabelSet;
use crate::agent::restart::Relauncher;
use crate::agent::soft_update::{SoftUpdater, UpdateOutcome};
use crate::agent::state::{WatcherState, WatcherStateMachine};
use crate::cli::config::Config;
use crate::controller::client::ControllerConnector;

/// Default time between label file checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Errors creating a watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("unable to read label file {}", path.display())]
    ReadLabels {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a single poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// File content matches the known labels
    Unchanged,
    /// File could not be read; nothing changed
    ReadFailed,
    /// Soft update succeeded and the known labels were refreshed
    Updated,
    /// Soft update failed and a replacement process was launched
    Restarted,
    /// Soft update failed and the relaunch failed too
    RestartFailed,
    /// The watcher had already terminated
    Stopped,
}

/// Lets the owning process wake or stop the watcher
#[derive(Clone)]
pub struct WatcherHandle {
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl WatcherHandle {
    /// Cut the current sleep short
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop the loop at its next suspension point
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Label file watcher
pub struct LabelFileWatcher {
    labels_file: PathBuf,
    agent_name: String,
    known: LabelSet,
    updater: SoftUpdater,
    relauncher: Relauncher,
    poll_interval: Duration,
    state: WatcherStateMachine,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl LabelFileWatcher {
    /// Create a watcher, reading the label file as the initial known state
    pub fn new(
        config: &Config,
        connector: Arc<dyn ControllerConnector>,
        relauncher: Relauncher,
    ) -> Result<Self, WatcherError> {
        let labels_file = config.labels_file.clone();
        let known =
            LabelSet::read_blocking(&labels_file).map_err(|source| WatcherError::ReadLabels {
                path: labels_file.clone(),
                source,
            })?;

        info!(
            path = %labels_file.display(),
            agent = %config.agent_name,
            labels = %known,
            "Labels loaded"
        );

        Ok(Self {
            labels_file,
            agent_name: config.agent_name.clone(),
            known,
            updater: SoftUpdater::new(
                connector,
                &config.agent_name,
                config.watcher.batch_limit,
            ),
            relauncher,
            poll_interval: Duration::from_secs(config.watcher.poll_interval_secs),
            state: WatcherStateMachine::new(),
            wake: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Override the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn handle(&self) -> WatcherHandle {
        WatcherHandle {
            wake: self.wake.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn labels_file(&self) -> &Path {
        &self.labels_file
    }

    /// Labels last confirmed on the controller
    pub fn known_labels(&self) -> &LabelSet {
        &self.known
    }

    pub fn state(&self) -> &WatcherStateMachine {
        &self.state
    }

    /// Push the known labels once, e.g. right after startup
    pub async fn push_known_labels(&self) -> UpdateOutcome {
        info!(
            agent = %self.agent_name,
            url = %self.updater.controller_url(),
            "Pushing labels to controller"
        );
        self.updater.update(&self.known).await
    }

    /// Run until a hard restart or a shutdown request
    pub async fn run(&mut self) {
        if self.state.is_terminated() {
            return;
        }
        self.state.set_watching();

        info!(
            path = %self.labels_file.display(),
            interval_secs = self.poll_interval.as_secs_f64(),
            "Label file watcher running"
        );

        while !self.state.is_terminated() {
            debug!(interval_secs = self.poll_interval.as_secs_f64(), "Label file watcher sleeping");
            if !self.sleep().await {
                self.state.set_terminated("Shutdown requested");
                break;
            }
            self.poll_once().await;
        }

        warn!(
            path = %self.labels_file.display(),
            "Label file watcher no longer running"
        );
    }

    /// Wait out the poll interval. Returns false on shutdown.
    async fn sleep(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = self.wake.notified() => {
                warn!("Label file watcher woken before its interval elapsed");
                true
            }
            _ = tokio::time::sleep(self.poll_interval) => true,
        }
    }

    /// Check the label file once and reconcile any change
    pub async fn poll_once(&mut self) -> PollResult {
        match self.state.current_state() {
            WatcherState::Terminated => return PollResult::Stopped,
            WatcherState::Idle => self.state.set_watching(),
            _ => {}
        }

        let current = match LabelSet::read(&self.labels_file).await {
            Ok(labels) => labels,
            Err(e) => {
                warn!(
                    path = %self.labels_file.display(),
                    error = %e,
                    "Unable to read label file; controller may not have the proper labels"
                );
                return PollResult::ReadFailed;
            }
        };

        if current.matches(&self.known) {
            trace!(path = %self.labels_file.display(), "Label file has not changed");
            return PollResult::Unchanged;
        }

        info!(
            path = %self.labels_file.display(),
            "Label file changed; attempting soft label update"
        );
        self.state.set_soft_reconciling();

        let outcome = self.updater.update(&current).await;
        if outcome.is_success() {
            self.known = match LabelSet::read(&self.labels_file).await {
                Ok(labels) => labels,
                Err(e) => {
                    warn!(
                        path = %self.labels_file.display(),
                        error = %e,
                        "Unable to re-read label file after update; keeping pushed labels"
                    );
                    current
                }
            };
            self.state.set_watching();
            return PollResult::Updated;
        }

        warn!(
            outcome = %outcome,
            url = %self.updater.controller_url(),
            "Soft label update failed, forcing agent restart. This can disrupt running jobs."
        );
        self.state.set_hard_reconciling(outcome.to_string());

        let result = match self.relauncher.relaunch() {
            Ok(_) => PollResult::Restarted,
            Err(e) => {
                error!(
                    error = %e,
                    path = %self.labels_file.display(),
                    "Unable to relaunch agent; label watching stops and no replacement is running"
                );
                PollResult::RestartFailed
            }
        };
        self.state.set_terminated("Hard restart handed off");
        result
    }
}
