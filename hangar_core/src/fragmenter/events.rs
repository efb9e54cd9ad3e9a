use serde::{Deserialize, Serialize};

use crate::types::types::InstallId;

/// Byte-level progress of one module download.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub loaded: u64,
    /// `None` when the server did not announce a length.
    pub total: Option<u64>,
    /// 0–100, `None` while `total` is unknown.
    pub percent: Option<u8>,
}

impl DownloadProgress {
    pub fn new(loaded: u64, total: Option<u64>) -> Self {
        let percent = total.filter(|t| *t > 0).map(|t| {
            let pct = loaded.saturating_mul(100) / t;
            pct.min(100) as u8
        });
        Self { loaded, total, percent }
    }
}

/// Every lifecycle event a fragmenter can emit.
///
/// The set is closed: dispatch sites `match` on it exhaustively so that a
/// new kind fails to compile until every consumer handles it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FragmenterEvent {
    Error { message: String },
    DownloadStarted { module: String },
    DownloadProgress { module: String, progress: DownloadProgress },
    DownloadFinished { module: String },
    UnzipStarted { module: String },
    UnzipFinished { module: String },
    CopyStarted { module: String },
    CopyFinished { module: String },
    #[serde(rename_all = "camelCase")]
    RetryScheduled { module: String, retry_count: u32, wait_secs: u64 },
    #[serde(rename_all = "camelCase")]
    RetryStarted { module: String, retry_count: u32 },
    FullDownload { reason: String },
    LogInfo { message: String },
    LogWarn { message: String },
    LogError { message: String },
}

/// Payload-free tag of a [`FragmenterEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Error,
    DownloadStarted,
    DownloadProgress,
    DownloadFinished,
    UnzipStarted,
    UnzipFinished,
    CopyStarted,
    CopyFinished,
    RetryScheduled,
    RetryStarted,
    FullDownload,
    LogInfo,
    LogWarn,
    LogError,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::Error,
        EventKind::DownloadStarted,
        EventKind::DownloadProgress,
        EventKind::DownloadFinished,
        EventKind::UnzipStarted,
        EventKind::UnzipFinished,
        EventKind::CopyStarted,
        EventKind::CopyFinished,
        EventKind::RetryScheduled,
        EventKind::RetryStarted,
        EventKind::FullDownload,
        EventKind::LogInfo,
        EventKind::LogWarn,
        EventKind::LogError,
    ];

    /// Wire name, as the UI side knows it.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Error => "error",
            EventKind::DownloadStarted => "downloadStarted",
            EventKind::DownloadProgress => "downloadProgress",
            EventKind::DownloadFinished => "downloadFinished",
            EventKind::UnzipStarted => "unzipStarted",
            EventKind::UnzipFinished => "unzipFinished",
            EventKind::CopyStarted => "copyStarted",
            EventKind::CopyFinished => "copyFinished",
            EventKind::RetryScheduled => "retryScheduled",
            EventKind::RetryStarted => "retryStarted",
            EventKind::FullDownload => "fullDownload",
            EventKind::LogInfo => "logInfo",
            EventKind::LogWarn => "logWarn",
            EventKind::LogError => "logError",
        }
    }
}

impl FragmenterEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FragmenterEvent::Error { .. } => EventKind::Error,
            FragmenterEvent::DownloadStarted { .. } => EventKind::DownloadStarted,
            FragmenterEvent::DownloadProgress { .. } => EventKind::DownloadProgress,
            FragmenterEvent::DownloadFinished { .. } => EventKind::DownloadFinished,
            FragmenterEvent::UnzipStarted { .. } => EventKind::UnzipStarted,
            FragmenterEvent::UnzipFinished { .. } => EventKind::UnzipFinished,
            FragmenterEvent::CopyStarted { .. } => EventKind::CopyStarted,
            FragmenterEvent::CopyFinished { .. } => EventKind::CopyFinished,
            FragmenterEvent::RetryScheduled { .. } => EventKind::RetryScheduled,
            FragmenterEvent::RetryStarted { .. } => EventKind::RetryStarted,
            FragmenterEvent::FullDownload { .. } => EventKind::FullDownload,
            FragmenterEvent::LogInfo { .. } => EventKind::LogInfo,
            FragmenterEvent::LogWarn { .. } => EventKind::LogWarn,
            FragmenterEvent::LogError { .. } => EventKind::LogError,
        }
    }
}

/// A fragmenter event on its way back to the UI, tagged with the install
/// it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedEvent {
    pub install_id: InstallId,
    #[serde(flatten)]
    pub event: FragmenterEvent,
}

impl ForwardedEvent {
    pub fn new(install_id: InstallId, event: FragmenterEvent) -> Self {
        Self { install_id, event }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}
