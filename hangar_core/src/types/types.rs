use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::fragmenter::package_fragmenter::FragmenterError;

/// Caller-chosen correlation token for one install attempt.
///
/// The router never generates ids; it only correlates requests and events
/// by the value the UI handed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallId(pub i64);

impl fmt::Display for InstallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `install-from-url` request as it crosses the boundary channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    pub install_id: InstallId,
    pub source_url: String,
    pub temp_dir: PathBuf,
    pub dest_dir: PathBuf,
}

impl InstallRequest {
    pub fn new(
        install_id: InstallId,
        source_url: impl Into<String>,
        temp_dir: impl Into<PathBuf>,
        dest_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            install_id,
            source_url: source_url.into(),
            temp_dir: temp_dir.into(),
            dest_dir: dest_dir.into(),
        }
    }

    /// Rejects requests that cannot be handed to a fragmenter at all.
    ///
    /// Reachability of the URL and writability of the directories are left
    /// to the fragmenter.
    pub fn validate(&self) -> Result<(), InstallError> {
        if self.install_id.0 < 0 {
            return Err(InstallError::InvalidRequest(format!(
                "install id must be non-negative, got {}",
                self.install_id
            )));
        }

        let url = reqwest::Url::parse(&self.source_url).map_err(|e| {
            InstallError::InvalidRequest(format!("source url {:?} is invalid: {}", self.source_url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(InstallError::InvalidRequest(format!(
                "source url must be http/https, got scheme {:?}",
                url.scheme()
            )));
        }

        if self.temp_dir.as_os_str().is_empty() {
            return Err(InstallError::InvalidRequest("temp dir is empty".into()));
        }
        if self.dest_dir.as_os_str().is_empty() {
            return Err(InstallError::InvalidRequest("destination dir is empty".into()));
        }
        Ok(())
    }
}

/// How a session settled when it did not fail.
///
/// Cancellation is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallOutcome {
    Completed,
    Aborted,
}

/// Lifecycle of one install session.
///
/// `TornDown` follows every terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Aborted,
    Errored,
    TornDown,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Errored)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The request never reached a fragmenter.
    #[error("invalid install request: {0}")]
    InvalidRequest(String),

    #[error("install {0} is already in progress")]
    DuplicateInstall(InstallId),

    /// The fragmenter's own failure, passed through unchanged.
    #[error("fragmenter failed: {0}")]
    Fragmenter(#[from] FragmenterError),
}
