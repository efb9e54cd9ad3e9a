use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::fragmenter::events::{FragmenterEvent, ForwardedEvent};
use crate::types::types::{InstallId, InstallOutcome};

/// Log lines kept per install; older lines are dropped first.
pub const LOG_LIMIT: usize = 100;

/// Settled statuses a board keeps before evicting the oldest.
pub const SETTLED_RETENTION: usize = 256;

/// Coarse phase shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InstallPhase {
    Pending,
    Downloading,
    Retrying,
    Unzipping,
    Copying,
    Done,
    Cancelled,
    Failed,
}

/// Human-facing status of one install, derived purely from forwarded
/// events plus the terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallStatus {
    pub install_id: InstallId,
    pub phase: InstallPhase,
    pub module: Option<String>,
    pub percent: Option<u8>,
    pub bytes_loaded: u64,
    pub retry_count: u32,
    pub full_download: bool,
    pub error: Option<String>,
    pub log: Vec<String>,
}

impl InstallStatus {
    pub fn new(install_id: InstallId) -> Self {
        Self {
            install_id,
            phase: InstallPhase::Pending,
            module: None,
            percent: None,
            bytes_loaded: 0,
            retry_count: 0,
            full_download: false,
            error: None,
            log: Vec::new(),
        }
    }

    /// Fold one event into the status.
    pub fn apply(&mut self, event: &FragmenterEvent) {
        match event {
            FragmenterEvent::Error { message } => {
                self.phase = InstallPhase::Failed;
                self.error = Some(message.clone());
            }
            FragmenterEvent::DownloadStarted { module } => {
                self.module = Some(module.clone());
                self.phase = InstallPhase::Downloading;
                self.percent = Some(0);
            }
            FragmenterEvent::DownloadProgress { module, progress } => {
                self.module = Some(module.clone());
                self.phase = InstallPhase::Downloading;
                self.bytes_loaded = progress.loaded;
                if progress.percent.is_some() {
                    self.percent = progress.percent;
                }
            }
            FragmenterEvent::DownloadFinished { .. } => {
                self.percent = Some(100);
            }
            FragmenterEvent::UnzipStarted { .. } => self.phase = InstallPhase::Unzipping,
            FragmenterEvent::UnzipFinished { .. } => {}
            FragmenterEvent::CopyStarted { .. } => self.phase = InstallPhase::Copying,
            FragmenterEvent::CopyFinished { .. } => {}
            FragmenterEvent::RetryScheduled { retry_count, .. } => {
                self.phase = InstallPhase::Retrying;
                self.retry_count = *retry_count;
            }
            FragmenterEvent::RetryStarted { retry_count, .. } => {
                self.phase = InstallPhase::Downloading;
                self.retry_count = *retry_count;
                self.percent = Some(0);
                self.bytes_loaded = 0;
            }
            FragmenterEvent::FullDownload { .. } => self.full_download = true,
            FragmenterEvent::LogInfo { message } => self.push_log(message.clone()),
            FragmenterEvent::LogWarn { message } => self.push_log(format!("warning: {}", message)),
            FragmenterEvent::LogError { message } => self.push_log(format!("error: {}", message)),
        }
    }

    fn push_log(&mut self, line: String) {
        if self.log.len() >= LOG_LIMIT {
            self.log.remove(0);
        }
        self.log.push(line);
    }

    /// Record how the install settled.
    pub fn finish(&mut self, outcome: &Result<InstallOutcome, String>) {
        match outcome {
            Ok(InstallOutcome::Completed) => {
                self.phase = InstallPhase::Done;
                self.percent = Some(100);
            }
            Ok(InstallOutcome::Aborted) => self.phase = InstallPhase::Cancelled,
            Err(message) => {
                self.phase = InstallPhase::Failed;
                if self.error.is_none() {
                    self.error = Some(message.clone());
                }
            }
        }
    }

    /// One-line summary for status bars.
    pub fn describe(&self) -> String {
        let module = self.module.as_deref().unwrap_or("package");
        match self.phase {
            InstallPhase::Pending => format!("Preparing {}", module),
            InstallPhase::Downloading => match self.percent {
                Some(pct) => format!("Downloading {} ({}%)", module, pct),
                None => format!("Downloading {} ({} bytes)", module, self.bytes_loaded),
            },
            InstallPhase::Retrying => format!("Retrying {} (attempt {})", module, self.retry_count + 1),
            InstallPhase::Unzipping => format!("Decompressing {}", module),
            InstallPhase::Copying => format!("Copying {}", module),
            InstallPhase::Done => format!("Installed {}", module),
            InstallPhase::Cancelled => format!("Cancelled {}", module),
            InstallPhase::Failed => format!(
                "Failed to install {}: {}",
                module,
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Statuses for the install ids seen on the channel.
///
/// Running installs are always kept; settled ones are evicted oldest first
/// once more than the retention limit have piled up.
#[derive(Debug)]
pub struct StatusBoard {
    statuses: HashMap<InstallId, InstallStatus>,
    settled: VecDeque<InstallId>,
    retention: usize,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::with_retention(SETTLED_RETENTION)
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            statuses: HashMap::new(),
            settled: VecDeque::new(),
            retention,
        }
    }

    /// Route an event to the status of the install it is tagged with.
    pub fn apply(&mut self, event: &ForwardedEvent) -> &InstallStatus {
        let status = self
            .statuses
            .entry(event.install_id)
            .or_insert_with(|| InstallStatus::new(event.install_id));
        status.apply(&event.event);
        status
    }

    /// Start a fresh status; an id may be reused after its previous install
    /// settled.
    pub fn begin(&mut self, install_id: InstallId) {
        self.settled.retain(|id| *id != install_id);
        self.statuses.insert(install_id, InstallStatus::new(install_id));
    }

    pub fn finish(&mut self, install_id: InstallId, outcome: &Result<InstallOutcome, String>) {
        self.statuses
            .entry(install_id)
            .or_insert_with(|| InstallStatus::new(install_id))
            .finish(outcome);

        self.settled.retain(|id| *id != install_id);
        self.settled.push_back(install_id);
        while self.settled.len() > self.retention {
            if let Some(evicted) = self.settled.pop_front() {
                self.statuses.remove(&evicted);
            }
        }
    }

    pub fn get(&self, install_id: InstallId) -> Option<&InstallStatus> {
        self.statuses.get(&install_id)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}
