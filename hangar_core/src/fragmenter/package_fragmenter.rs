use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::FragmenterEvent;

/// Sending half of the per-install event stream handed to a fragmenter.
pub type EventSender = mpsc::Sender<FragmenterEvent>;

/// Options passed alongside the source and destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Scratch space for downloads and extraction.
    pub temp_dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum FragmenterError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("disk error: {0}")]
    Disk(std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// The cancellation token was observed.
    #[error("install aborted")]
    Aborted,
}

impl FragmenterError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, FragmenterError::Aborted)
    }
}

/// The package installer the bridge drives.
///
/// Implementations download, decompress and copy one package into
/// `dest_dir`, emitting lifecycle events on `events` in the order they
/// happen. Cancellation is cooperative: implementations check `cancel`
/// when it suits them and return [`FragmenterError::Aborted`] once they
/// stop because of it. Non-abort failures are expected to be announced
/// with one [`FragmenterEvent::Error`] before the error is returned.
///
/// `events` is dropped when `install` returns; implementations must not
/// keep clones of it alive past that point.
#[async_trait]
pub trait Fragmenter: Send + Sync {
    async fn install(
        &self,
        source_url: &str,
        dest_dir: &Path,
        cancel: CancellationToken,
        options: InstallOptions,
        events: EventSender,
    ) -> Result<(), FragmenterError>;
}
