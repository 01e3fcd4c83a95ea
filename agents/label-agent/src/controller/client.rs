//! Controller Client
//!
//! Authenticated HTTP access to the controller's label API. A
//! [`ControllerConnector`] opens one [`LabelSession`] per reconciliation so
//! that authentication, cookies and the CSRF crumb are shared by every
//! request of that reconciliation and nothing leaks into the next one.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cli::config::ControllerConfig;
use crate::controller::protocol::{
    endpoint, parse_labels_document, Crumb, LabelMutation, CRUMB_PATH, GET_LABELS_PATH,
};

/// Errors returned by controller requests
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("giving up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("failed to set up HTTP client: {0}")]
    Setup(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport { .. } => true,
            ClientError::Status { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    /// Whether the failure happened below the controller's API, i.e. the
    /// request never got an answer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Transport { .. } | ClientError::RetriesExhausted { .. }
        )
    }
}

/// One authenticated conversation with the controller
#[async_trait]
pub trait LabelSession: Send {
    /// Fetch the label string the controller has recorded for `agent`
    async fn get_labels(&mut self, agent: &str) -> Result<String, ClientError>;

    /// Add or remove a batch of labels
    async fn mutate_labels(
        &mut self,
        mutation: LabelMutation,
        agent: &str,
        labels: &str,
    ) -> Result<(), ClientError>;
}

/// Opens label sessions against a controller
pub trait ControllerConnector: Send + Sync {
    /// Base URL of the controller, used in log messages
    fn url(&self) -> &str;

    /// Start a fresh session
    fn connect(&self) -> Result<Box<dyn LabelSession>, ClientError>;
}

/// reqwest-backed connector
#[derive(Debug, Clone)]
pub struct HttpConnector {
    config: ControllerConfig,
}

impl HttpConnector {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    /// Open a session with its concrete type
    pub fn session(&self) -> Result<HttpSession, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .cookie_store(true)
            .danger_accept_invalid_certs(self.config.disable_tls_verification)
            .build()
            .map_err(|e| ClientError::Setup(e.to_string()))?;

        Ok(HttpSession {
            client,
            base_url: self.config.url.clone(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            retry_attempts: self.config.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(self.config.retry_backoff_ms),
            crumb: None,
        })
    }
}

impl ControllerConnector for HttpConnector {
    fn url(&self) -> &str {
        &self.config.url
    }

    fn connect(&self) -> Result<Box<dyn LabelSession>, ClientError> {
        Ok(Box::new(self.session()?))
    }
}

/// HTTP session holding the client, credentials and CSRF crumb
pub struct HttpSession {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    retry_attempts: u32,
    retry_backoff: Duration,
    /// `None` until fetched, `Some(None)` when the controller issues no crumb
    crumb: Option<Option<Crumb>>,
}

impl HttpSession {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }

    /// Fetch the CSRF crumb once per session. Only a 404 means the
    /// controller issues none; failed fetches are not cached.
    async fn crumb(&mut self) -> Result<Option<Crumb>, ClientError> {
        if let Some(crumb) = &self.crumb {
            return Ok(crumb.clone());
        }

        let url = endpoint(&self.base_url, CRUMB_PATH);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        let crumb = if status == StatusCode::NOT_FOUND {
            debug!("No CSRF crumb issuer; CSRF protection is off");
            None
        } else if status.is_success() {
            let crumb = response
                .json::<Crumb>()
                .await
                .map_err(|e| ClientError::Malformed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
            debug!(field = %crumb.crumb_request_field, "CSRF crumb acquired");
            Some(crumb)
        } else {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
            });
        };

        self.crumb = Some(crumb.clone());
        Ok(crumb)
    }

    async fn post_once(
        &self,
        url: &str,
        agent: &str,
        labels: &str,
        crumb: Option<&Crumb>,
    ) -> Result<(), ClientError> {
        let mut request = self
            .authorize(self.client.post(url))
            .query(&[("name", agent), ("labels", labels)]);
        if let Some(crumb) = crumb {
            request = request.header(crumb.crumb_request_field.as_str(), crumb.crumb.as_str());
        }

        let response = request.send().await.map_err(|e| transport_error(url, e))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl LabelSession for HttpSession {
    async fn get_labels(&mut self, agent: &str) -> Result<String, ClientError> {
        let url = endpoint(&self.base_url, GET_LABELS_PATH);
        debug!(url = %url, agent = %agent, "Fetching labels from controller");

        let response = self
            .authorize(self.client.get(&url))
            .query(&[("name", agent)])
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&url, e))?;

        parse_labels_document(&body).map_err(|reason| ClientError::Malformed { url, reason })
    }

    async fn mutate_labels(
        &mut self,
        mutation: LabelMutation,
        agent: &str,
        labels: &str,
    ) -> Result<(), ClientError> {
        let url = endpoint(&self.base_url, mutation.path());

        let mut attempt = 1;
        loop {
            let result = match self.crumb().await {
                Ok(crumb) => self.post_once(&url, agent, labels, crumb.as_ref()).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    debug!(url = %url, %mutation, labels = %labels, "Label batch accepted");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    if attempt >= self.retry_attempts {
                        return Err(ClientError::RetriesExhausted {
                            url,
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    warn!(
                        url = %url,
                        attempt,
                        max_attempts = self.retry_attempts,
                        error = %e,
                        "Label request failed, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn transport_error(url: &str, error: reqwest::Error) -> ClientError {
    ClientError::Transport {
        url: url.to_string(),
        reason: error.to_string(),
    }
}
