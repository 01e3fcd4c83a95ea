//! Soft Label Update
//!
//! Replaces the controller's view of this agent's labels through its label
//! API, without restarting the agent. Everything the controller currently
//! reports (except the sentinel) is removed in batches, then the desired
//! labels are added in batches. The first failing request aborts the whole
//! update; labels already removed at that point stay removed.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::agent::batch::{BatchBuilder, DEFAULT_SEPARATOR};
use crate::agent::labels::{removable_labels, LabelSet};
use crate::controller::client::{ClientError, ControllerConnector, LabelSession};
use crate::controller::protocol::LabelMutation;

/// Result of one soft update attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Every batch was accepted
    Success,
    /// The controller rejected a request or sent something unusable
    SoftUpdateFailed(String),
    /// A request never got an answer, even after retries
    TransportFailed(String),
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateOutcome::Success)
    }
}

impl std::fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateOutcome::Success => write!(f, "success"),
            UpdateOutcome::SoftUpdateFailed(reason) => write!(f, "soft update failed: {}", reason),
            UpdateOutcome::TransportFailed(reason) => write!(f, "transport failed: {}", reason),
        }
    }
}

/// Errors aborting a soft update
#[derive(Debug, Error)]
pub enum SoftUpdateError {
    #[error("unable to open a session with {url}")]
    Connect {
        url: String,
        #[source]
        source: ClientError,
    },

    #[error("unable to acquire labels from {url} to begin removal")]
    Fetch {
        url: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to {mutation} labels on {url}")]
    Batch {
        url: String,
        mutation: LabelMutation,
        #[source]
        source: ClientError,
    },
}

impl SoftUpdateError {
    pub fn client_error(&self) -> &ClientError {
        match self {
            SoftUpdateError::Connect { source, .. }
            | SoftUpdateError::Fetch { source, .. }
            | SoftUpdateError::Batch { source, .. } => source,
        }
    }
}

impl From<SoftUpdateError> for UpdateOutcome {
    fn from(err: SoftUpdateError) -> Self {
        let reason = format!("{}: {}", err, err.client_error());
        if err.client_error().is_transport() {
            UpdateOutcome::TransportFailed(reason)
        } else {
            UpdateOutcome::SoftUpdateFailed(reason)
        }
    }
}

/// Soft update driver for one agent
#[derive(Clone)]
pub struct SoftUpdater {
    connector: Arc<dyn ControllerConnector>,
    agent_name: String,
    batch_limit: usize,
}

impl SoftUpdater {
    pub fn new(
        connector: Arc<dyn ControllerConnector>,
        agent_name: &str,
        batch_limit: usize,
    ) -> Self {
        Self {
            connector,
            agent_name: agent_name.to_string(),
            batch_limit,
        }
    }

    pub fn controller_url(&self) -> &str {
        self.connector.url()
    }

    /// Replace the controller's labels for this agent with `desired`
    pub async fn update(&self, desired: &LabelSet) -> UpdateOutcome {
        match self.try_update(desired).await {
            Ok(()) => {
                info!(agent = %self.agent_name, "Soft label update complete");
                UpdateOutcome::Success
            }
            Err(e) => {
                error!(
                    agent = %self.agent_name,
                    url = %self.connector.url(),
                    error = %e,
                    cause = %e.client_error(),
                    "Soft label update failed"
                );
                e.into()
            }
        }
    }

    async fn try_update(&self, desired: &LabelSet) -> Result<(), SoftUpdateError> {
        let url = self.connector.url().to_string();
        let mut session = self
            .connector
            .connect()
            .map_err(|source| SoftUpdateError::Connect {
                url: url.clone(),
                source,
            })?;

        debug!(url = %url, agent = %self.agent_name, "Getting current labels from controller");
        let current = session
            .get_labels(&self.agent_name)
            .await
            .map_err(|source| SoftUpdateError::Fetch {
                url: url.clone(),
                source,
            })?;

        let stale = removable_labels(&current);
        debug!(labels = ?stale, "Labels to be removed");
        self.send_batches(session.as_mut(), LabelMutation::Remove, stale)
            .await?;

        debug!(labels = %desired, "Labels to be added");
        self.send_batches(session.as_mut(), LabelMutation::Add, desired.tokens())
            .await?;

        Ok(())
    }

    async fn send_batches<'a, I>(
        &self,
        session: &mut dyn LabelSession,
        mutation: LabelMutation,
        labels: I,
    ) -> Result<(), SoftUpdateError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let batches = BatchBuilder::new(self.batch_limit, DEFAULT_SEPARATOR).batches(labels);
        for batch in &batches {
            session
                .mutate_labels(mutation, &self.agent_name, batch)
                .await
                .map_err(|source| SoftUpdateError::Batch {
                    url: self.connector.url().to_string(),
                    mutation,
                    source,
                })?;
        }
        debug!(%mutation, batches = batches.len(), "Label batches sent");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory controller used by the agent tests

    use super::*;
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};

    type Shared<T> = Arc<Mutex<T>>;

    /// Request seen by the fake controller
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Get,
        Mutate(LabelMutation, String),
    }

    /// How the fake controller should misbehave
    #[derive(Debug, Clone, Default)]
    pub struct Faults {
        pub fail_get: Option<u16>,
        pub malformed_get: bool,
        /// Fail the n-th (zero based) mutation request
        pub fail_mutation_at: Option<usize>,
        pub transport_failure: bool,
    }

    #[derive(Clone, Default)]
    pub struct FakeController {
        pub labels: Shared<String>,
        pub calls: Shared<Vec<Call>>,
        pub faults: Shared<Faults>,
        pub sessions: Shared<usize>,
        /// File to rewrite (`Some`) or delete (`None`) on every mutation
        pub on_mutate: Shared<Option<(PathBuf, Option<String>)>>,
    }

    impl FakeController {
        pub fn with_labels(labels: &str) -> Self {
            let fake = Self::default();
            *fake.labels.lock() = labels.to_string();
            fake
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn mutations(&self) -> Vec<(LabelMutation, String)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Mutate(mutation, batch) => Some((mutation, batch)),
                    Call::Get => None,
                })
                .collect()
        }

        pub fn set_faults(&self, faults: Faults) {
            *self.faults.lock() = faults;
        }

        /// Change the label file while a soft update is in flight
        pub fn rewrite_during_update(&self, path: &Path, contents: Option<&str>) {
            *self.on_mutate.lock() = Some((path.to_path_buf(), contents.map(str::to_string)));
        }
    }

    impl ControllerConnector for FakeController {
        fn url(&self) -> &str {
            "http://controller.test"
        }

        fn connect(&self) -> Result<Box<dyn LabelSession>, ClientError> {
            *self.sessions.lock() += 1;
            Ok(Box::new(self.clone()))
        }
    }

    #[async_trait::async_trait]
    impl LabelSession for FakeController {
        async fn get_labels(&mut self, _agent: &str) -> Result<String, ClientError> {
            self.calls.lock().push(Call::Get);
            let faults = self.faults.lock().clone();
            if let Some(status) = faults.fail_get {
                return Err(ClientError::Status {
                    url: self.url().to_string(),
                    status,
                });
            }
            if faults.malformed_get {
                return Err(ClientError::Malformed {
                    url: self.url().to_string(),
                    reason: "missing <labels> element".to_string(),
                });
            }
            Ok(self.labels.lock().clone())
        }

        async fn mutate_labels(
            &mut self,
            mutation: LabelMutation,
            _agent: &str,
            labels: &str,
        ) -> Result<(), ClientError> {
            let index = self
                .calls
                .lock()
                .iter()
                .filter(|call| matches!(call, Call::Mutate(..)))
                .count();
            self.calls
                .lock()
                .push(Call::Mutate(mutation, labels.to_string()));

            if let Some((path, contents)) = self.on_mutate.lock().clone() {
                match contents {
                    Some(contents) => std::fs::write(&path, contents).unwrap(),
                    None => {
                        let _ = std::fs::remove_file(&path);
                    }
                }
            }

            let faults = self.faults.lock().clone();
            if faults.fail_mutation_at == Some(index) {
                return Err(if faults.transport_failure {
                    ClientError::RetriesExhausted {
                        url: self.url().to_string(),
                        attempts: 3,
                        last_error: "connection refused".to_string(),
                    }
                } else {
                    ClientError::Status {
                        url: self.url().to_string(),
                        status: 400,
                    }
                });
            }
            Ok(())
        }
    }
}
