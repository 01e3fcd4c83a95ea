//! Watcher State Management
//!
//! Explicit state machine for the label file watcher. The state is owned by
//! the watcher and only changed from inside its loop.

use chrono::{DateTime, Utc};

/// How a detected label change is being reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Through the controller's label API
    Soft,
    /// By relaunching the agent process
    Hard,
}

/// Represents the possible states of the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Constructed, loop not started
    Idle,
    /// Polling the label file
    Watching,
    /// Pushing a label change
    Reconciling(ReconcileMode),
    /// Loop finished; never left
    Terminated,
}

impl std::fmt::Display for WatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatcherState::Idle => write!(f, "Idle"),
            WatcherState::Watching => write!(f, "Watching"),
            WatcherState::Reconciling(ReconcileMode::Soft) => write!(f, "Reconciling(Soft)"),
            WatcherState::Reconciling(ReconcileMode::Hard) => write!(f, "Reconciling(Hard)"),
            WatcherState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// State transition information
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: WatcherState,
    pub to: WatcherState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

const MAX_TRANSITIONS: usize = 100;

/// Watcher state with a bounded transition history
#[derive(Debug, Clone)]
pub struct WatcherStateMachine {
    current: WatcherState,
    soft_updates: u32,
    transitions: Vec<StateTransition>,
}

impl WatcherStateMachine {
    /// Create a new state machine starting in Idle state
    pub fn new() -> Self {
        Self {
            current: WatcherState::Idle,
            soft_updates: 0,
            transitions: Vec::new(),
        }
    }

    /// Get the current state
    pub fn current_state(&self) -> WatcherState {
        self.current
    }

    /// Number of soft updates started so far
    pub fn soft_updates(&self) -> u32 {
        self.soft_updates
    }

    pub fn is_terminated(&self) -> bool {
        self.current == WatcherState::Terminated
    }

    /// Transition to a new state
    pub fn transition_to(&mut self, new_state: WatcherState, reason: Option<String>) -> bool {
        if !Self::is_valid_transition(self.current, new_state) {
            tracing::warn!(
                from = %self.current,
                to = %new_state,
                "Rejected watcher state transition"
            );
            return false;
        }

        let old_state = self.current;
        self.current = new_state;

        if new_state == WatcherState::Reconciling(ReconcileMode::Soft) {
            self.soft_updates += 1;
        }

        self.transitions.push(StateTransition {
            from: old_state,
            to: new_state,
            timestamp: Utc::now(),
            reason,
        });

        if self.transitions.len() > MAX_TRANSITIONS {
            self.transitions.remove(0);
        }

        tracing::debug!(from = %old_state, to = %new_state, "Watcher state transition");

        true
    }

    /// Check if a state transition is valid
    fn is_valid_transition(from: WatcherState, to: WatcherState) -> bool {
        use ReconcileMode::{Hard, Soft};
        use WatcherState::*;

        matches!(
            (from, to),
            (Idle, Watching)
                | (Idle, Terminated)
                | (Watching, Reconciling(Soft))
                | (Watching, Terminated)
                | (Reconciling(Soft), Watching)
                | (Reconciling(Soft), Reconciling(Hard))
                | (Reconciling(Hard), Terminated)
        )
    }

    pub fn set_watching(&mut self) {
        self.transition_to(WatcherState::Watching, None);
    }

    pub fn set_soft_reconciling(&mut self) {
        self.transition_to(
            WatcherState::Reconciling(ReconcileMode::Soft),
            Some("Label file changed".to_string()),
        );
    }

    pub fn set_hard_reconciling(&mut self, reason: String) {
        self.transition_to(WatcherState::Reconciling(ReconcileMode::Hard), Some(reason));
    }

    pub fn set_terminated(&mut self, reason: &str) {
        self.transition_to(WatcherState::Terminated, Some(reason.to_string()));
    }

    /// Get recent state transitions, newest first
    pub fn recent_transitions(&self, count: usize) -> Vec<StateTransition> {
        self.transitions.iter().rev().take(count).cloned().collect()
    }
}

impl Default for WatcherStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
