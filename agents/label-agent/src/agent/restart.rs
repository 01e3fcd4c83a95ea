//! Hard Restart
//!
//! Relaunches the agent binary with its original arguments so the new
//! instance starts from a clean slate and pushes its labels at startup.
//! The current process only spawns the replacement; it neither waits for it
//! nor checks that it came up.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::cli::logging::LOG_ENV_VAR;

/// Errors preventing a relaunch
#[derive(Debug, Error)]
pub enum RestartError {
    #[error("unable to determine the current executable: {0}")]
    UnknownExecutable(String),

    #[error("{} is not a packaged executable", path.display())]
    NotExecutable { path: PathBuf },

    #[error("failed to launch {}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Command line of the replacement process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
}

impl std::fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={} ", key, value)?;
        }
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy().replace(['\n', '\r'], ""))?;
        }
        Ok(())
    }
}

/// Host capabilities needed to relaunch the agent
pub trait HostProcess: Send + Sync {
    /// Location of the running agent binary
    fn current_executable(&self) -> Result<PathBuf, RestartError>;

    /// Logging configuration the agent was started with, if any
    fn logging_config(&self) -> Option<String>;

    /// Start `command` without waiting for it
    fn spawn_detached(&self, command: &LaunchCommand) -> Result<(), RestartError>;
}

/// The real operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl HostProcess for SystemHost {
    fn current_executable(&self) -> Result<PathBuf, RestartError> {
        std::env::current_exe().map_err(|e| RestartError::UnknownExecutable(e.to_string()))
    }

    fn logging_config(&self) -> Option<String> {
        std::env::var(LOG_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    fn spawn_detached(&self, command: &LaunchCommand) -> Result<(), RestartError> {
        // stdout/stderr are inherited so the new instance logs wherever we did
        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| RestartError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        info!(pid = child.id(), "Replacement process spawned");
        Ok(())
    }
}

/// Whether `path` is something we can exec
pub fn is_packaged_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    let executable = {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    };

    #[cfg(not(unix))]
    let executable = true;

    executable
}

/// Relaunches the agent with its startup arguments
#[derive(Clone)]
pub struct Relauncher {
    host: Arc<dyn HostProcess>,
    args: Vec<OsString>,
}

impl Relauncher {
    pub fn new(host: Arc<dyn HostProcess>, args: Vec<OsString>) -> Self {
        Self { host, args }
    }

    /// Relauncher for this process, using the arguments it was started with
    pub fn for_current_process() -> Self {
        Self::new(Arc::new(SystemHost), std::env::args_os().skip(1).collect())
    }

    /// Build the replacement command line
    pub fn command(&self) -> Result<LaunchCommand, RestartError> {
        let program = self.host.current_executable()?;
        if !is_packaged_executable(&program) {
            return Err(RestartError::NotExecutable { path: program });
        }

        let env = match self.host.logging_config() {
            Some(filter) => vec![(LOG_ENV_VAR.to_string(), filter)],
            None => {
                warn!(
                    "No {} set for this agent; the relaunched instance will use its configured default log level",
                    LOG_ENV_VAR
                );
                Vec::new()
            }
        };

        Ok(LaunchCommand {
            program,
            args: self.args.clone(),
            env,
        })
    }

    /// Spawn the replacement process
    pub fn relaunch(&self) -> Result<LaunchCommand, RestartError> {
        let command = self.command()?;
        info!(command = %command, "Invoking replacement agent");
        self.host.spawn_detached(&command)?;
        info!("New agent instance started; this instance will now exit");
        Ok(command)
    }
}
