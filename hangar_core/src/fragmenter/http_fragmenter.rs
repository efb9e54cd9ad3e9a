use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use walkdir::WalkDir;

use super::events::{DownloadProgress, FragmenterEvent};
use super::package_fragmenter::{EventSender, Fragmenter, FragmenterError, InstallOptions};

/// Default number of retries after the first failed download attempt.
const MAX_RETRIES: u32 = 3;

/// First backoff delay; doubles on every retry.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for a single backoff wait.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Write buffer for the downloaded archive.
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Installs a package published as one zip archive over HTTP.
///
/// The archive is streamed into a per-install work directory under the
/// caller's temp dir, extracted next to it, then copied into the
/// destination. The work directory is removed on every exit path.
pub struct HttpFragmenter {
    client: Client,
    max_retries: u32,
    retry_base_delay: Duration,
}

pub struct HttpFragmenterBuilder {
    client: Option<Client>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl HttpFragmenter {
    pub fn builder() -> HttpFragmenterBuilder {
        HttpFragmenterBuilder::new()
    }

    async fn install_into(
        &self,
        source_url: &str,
        dest_dir: &Path,
        module: &str,
        work_dir: &Path,
        cancel: &CancellationToken,
        events: &EventSender,
    ) -> Result<(), FragmenterError> {
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(FragmenterError::Disk)?;

        emit(events, FragmenterEvent::FullDownload {
            reason: "source is a single archive".into(),
        })
        .await;

        let archive_path = work_dir.join(format!("{}.zip", module));
        self.download_with_retry(source_url, &archive_path, module, cancel, events)
            .await?;

        if cancel.is_cancelled() {
            return Err(FragmenterError::Aborted);
        }

        emit(events, FragmenterEvent::UnzipStarted { module: module.to_string() }).await;
        let extract_dir = work_dir.join("extract");
        let report = {
            let archive_path = archive_path.clone();
            let extract_dir = extract_dir.clone();
            let cancel = cancel.clone();
            run_blocking(move || extract_archive(&archive_path, &extract_dir, &cancel)).await?
        };
        for name in &report.skipped {
            emit(events, FragmenterEvent::LogWarn {
                message: format!("skipped archive entry with unsafe path: {}", name),
            })
            .await;
        }
        emit(events, FragmenterEvent::UnzipFinished { module: module.to_string() }).await;

        emit(events, FragmenterEvent::CopyStarted { module: module.to_string() }).await;
        let copied = {
            let dest_dir = dest_dir.to_path_buf();
            let cancel = cancel.clone();
            run_blocking(move || copy_tree(&extract_dir, &dest_dir, &cancel)).await?
        };
        emit(events, FragmenterEvent::CopyFinished { module: module.to_string() }).await;

        emit(events, FragmenterEvent::LogInfo {
            message: format!("installed {} file(s) into {}", copied, dest_dir.display()),
        })
        .await;
        Ok(())
    }

    async fn download_with_retry(
        &self,
        source_url: &str,
        archive_path: &Path,
        module: &str,
        cancel: &CancellationToken,
        events: &EventSender,
    ) -> Result<(), FragmenterError> {
        let mut retry_count = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(FragmenterError::Aborted);
            }

            if retry_count == 0 {
                emit(events, FragmenterEvent::DownloadStarted { module: module.to_string() }).await;
            } else {
                emit(events, FragmenterEvent::RetryStarted {
                    module: module.to_string(),
                    retry_count,
                })
                .await;
            }

            match self.download_once(source_url, archive_path, module, cancel, events).await {
                Ok(()) => {
                    emit(events, FragmenterEvent::DownloadFinished { module: module.to_string() }).await;
                    return Ok(());
                }
                Err(e) if is_transient(&e) && retry_count < self.max_retries => {
                    retry_count += 1;
                    let wait = backoff_delay(self.retry_base_delay, retry_count);
                    log::warn!(
                        "[http_fragmenter] module={}: attempt {} failed ({}), retrying in {:?}",
                        module,
                        retry_count,
                        e,
                        wait
                    );
                    emit(events, FragmenterEvent::LogWarn {
                        message: format!("download of {} failed: {}", module, e),
                    })
                    .await;
                    emit(events, FragmenterEvent::RetryScheduled {
                        module: module.to_string(),
                        retry_count,
                        wait_secs: wait.as_secs(),
                    })
                    .await;

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FragmenterError::Aborted),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn download_once(
        &self,
        source_url: &str,
        archive_path: &Path,
        module: &str,
        cancel: &CancellationToken,
        events: &EventSender,
    ) -> Result<(), FragmenterError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FragmenterError::Aborted),
            response = self.client.get(source_url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FragmenterError::Status(status.as_u16()));
        }
        let total = response.content_length();
        log::debug!(
            "[http_fragmenter] module={}: status={}  content_length={:?}",
            module,
            status,
            total
        );

        let file = tokio::fs::File::create(archive_path)
            .await
            .map_err(FragmenterError::Disk)?;
        let mut writer = tokio::io::BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        let mut stream = response.bytes_stream();
        let mut loaded: u64 = 0;
        let mut last_percent: Option<u8> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = writer.flush().await;
                    return Err(FragmenterError::Aborted);
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            writer.write_all(&chunk).await.map_err(FragmenterError::Disk)?;
            loaded += chunk.len() as u64;

            // One event per percent step; every chunk when the size is unknown.
            let progress = DownloadProgress::new(loaded, total);
            if progress.percent.is_none() || progress.percent != last_percent {
                last_percent = progress.percent;
                emit(events, FragmenterEvent::DownloadProgress {
                    module: module.to_string(),
                    progress,
                })
                .await;
            }
        }

        writer.flush().await.map_err(FragmenterError::Disk)?;
        Ok(())
    }
}

#[async_trait]
impl Fragmenter for HttpFragmenter {
    async fn install(
        &self,
        source_url: &str,
        dest_dir: &Path,
        cancel: CancellationToken,
        options: InstallOptions,
        events: EventSender,
    ) -> Result<(), FragmenterError> {
        let module = module_name(source_url);
        let work_dir = options.temp_dir.join(Uuid::new_v4().to_string());

        let result = self
            .install_into(source_url, dest_dir, &module, &work_dir, &cancel, &events)
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("[http_fragmenter] could not remove {:?}: {}", work_dir, e);
            }
        }

        if let Err(e) = &result {
            if !e.is_aborted() {
                emit(&events, FragmenterEvent::Error { message: e.to_string() }).await;
            }
        }
        result
    }
}

impl HttpFragmenterBuilder {
    pub fn new() -> Self {
        Self {
            client: None,
            max_retries: MAX_RETRIES,
            retry_base_delay: RETRY_BASE_DELAY,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn build(self) -> Result<HttpFragmenter, FragmenterError> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .tcp_nodelay(true)
                .build()?,
        };
        Ok(HttpFragmenter {
            client,
            max_retries: self.max_retries,
            retry_base_delay: self.retry_base_delay,
        })
    }
}

impl Default for HttpFragmenterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn emit(events: &EventSender, event: FragmenterEvent) {
    // The receiver only goes away once the bridge has stopped listening.
    let _ = events.send(event).await;
}

/// `base * 2^(retry_count - 1)`, capped at [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry_count.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

fn is_transient(error: &FragmenterError) -> bool {
    match error {
        FragmenterError::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
        FragmenterError::Status(code) => *code >= 500 || *code == 429,
        FragmenterError::Disk(_) | FragmenterError::Archive(_) | FragmenterError::Aborted => false,
    }
}

/// Derives the module name from the last non-empty URL path segment,
/// without its extension.
pub fn module_name(source_url: &str) -> String {
    reqwest::Url::parse(source_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .and_then(|segment| {
            Path::new(&segment)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "package".to_string())
}

async fn run_blocking<T, F>(f: F) -> Result<T, FragmenterError>
where
    F: FnOnce() -> Result<T, FragmenterError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FragmenterError::Disk(std::io::Error::other(e)))?
}

struct ExtractReport {
    skipped: Vec<String>,
}

fn extract_archive(
    archive_path: &Path,
    target: &Path,
    cancel: &CancellationToken,
) -> Result<ExtractReport, FragmenterError> {
    let file = std::fs::File::open(archive_path).map_err(FragmenterError::Disk)?;
    let mut archive = zip::ZipArchive::new(file)?;
    std::fs::create_dir_all(target).map_err(FragmenterError::Disk)?;

    let mut skipped = Vec::new();
    for i in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(FragmenterError::Aborted);
        }

        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            skipped.push(entry.name().to_string());
            continue;
        };
        let out_path = target.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(FragmenterError::Disk)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(FragmenterError::Disk)?;
        }
        let mut out = std::fs::File::create(&out_path).map_err(FragmenterError::Disk)?;
        std::io::copy(&mut entry, &mut out).map_err(FragmenterError::Disk)?;
    }

    Ok(ExtractReport { skipped })
}

fn copy_tree(src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<usize, FragmenterError> {
    std::fs::create_dir_all(dest).map_err(FragmenterError::Disk)?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        if cancel.is_cancelled() {
            return Err(FragmenterError::Aborted);
        }

        let entry = entry.map_err(|e| FragmenterError::Disk(e.into()))?;
        let relative: PathBuf = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| FragmenterError::Disk(std::io::Error::other(e)))?
            .to_path_buf();
        let target = dest.join(&relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(FragmenterError::Disk)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(FragmenterError::Disk)?;
            }
            std::fs::copy(entry.path(), &target).map_err(FragmenterError::Disk)?;
            copied += 1;
        }
    }
    Ok(copied)
}
