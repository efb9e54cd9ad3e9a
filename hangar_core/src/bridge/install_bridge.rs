use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::message_bus::MessageBus;
use crate::fragmenter::events::{FragmenterEvent, ForwardedEvent};
use crate::fragmenter::package_fragmenter::{Fragmenter, InstallOptions};
use crate::types::types::{InstallError, InstallId, InstallOutcome, InstallRequest, SessionState};

/// Capacity of the fragmenter → bridge event channel. A full channel makes
/// the fragmenter wait; events are never dropped.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Runs exactly one fragmenter install and relays its events.
///
/// # Lifecycle
///
/// | Step                         | State                                |
/// |------------------------------|--------------------------------------|
/// | `new()`                      | `Created`                            |
/// | fragmenter call issued       | `Running`                            |
/// | fragmenter settles           | `Completed` / `Aborted` / `Errored`  |
/// | cancel listener removed      | `TornDown`                           |
///
/// The cancel listener and the settlement report are held by guards, so
/// the listener is removed and observers hear `on_settled` on every exit
/// path, including a panic inside the fragmenter or the run future being
/// dropped.
pub struct InstallBridge {
    fragmenter: Arc<dyn Fragmenter>,
    bus: Arc<MessageBus>,
    state: SessionState,
    terminal_state: Option<SessionState>,
}

/// Counters from one forwarding loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ForwardStats {
    forwarded: usize,
    suppressed: usize,
}

impl InstallBridge {
    pub fn new(fragmenter: Arc<dyn Fragmenter>, bus: Arc<MessageBus>) -> Self {
        Self {
            fragmenter,
            bus,
            state: SessionState::Created,
            terminal_state: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The terminal state the session passed through before tear-down.
    pub fn terminal_state(&self) -> Option<SessionState> {
        self.terminal_state
    }

    /// Run the install to completion or cancellation.
    ///
    /// Returns `Ok(Aborted)` when the fragmenter stopped because of a
    /// matching cancel request, and the fragmenter's error unchanged when it
    /// failed.
    pub async fn run(&mut self, request: &InstallRequest) -> Result<InstallOutcome, InstallError> {
        let install_id = request.install_id;
        let fragmenter = Arc::clone(&self.fragmenter);
        let bus = Arc::clone(&self.bus);

        let cancel_token = CancellationToken::new();
        let subscription = {
            let token = cancel_token.clone();
            bus.on_cancel_install(install_id, move || {
                if !token.is_cancelled() {
                    log::info!("[bridge] install_id={}  cancel requested", install_id);
                }
                token.cancel();
            })
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let options = InstallOptions {
            temp_dir: request.temp_dir.clone(),
        };

        self.state = SessionState::Running;
        let mut settle = SettleGuard::new(&bus, install_id);
        log::info!(
            "[bridge] install_id={}  running  url=\"{}\"  dest={:?}  temp={:?}",
            install_id,
            request.source_url,
            request.dest_dir,
            request.temp_dir,
        );

        // Dropping `events_tx` when the install future finishes closes the
        // channel, which ends the forwarding loop.
        let install = fragmenter.install(
            &request.source_url,
            &request.dest_dir,
            cancel_token.clone(),
            options,
            events_tx,
        );
        let forward = forward_events(&bus, install_id, &cancel_token, events_rx);
        let (result, stats) = tokio::join!(install, forward);

        let outcome = match result {
            Ok(()) => Ok(InstallOutcome::Completed),
            Err(e) if e.is_aborted() => Ok(InstallOutcome::Aborted),
            Err(e) => Err(InstallError::Fragmenter(e)),
        };
        let terminal = match &outcome {
            Ok(InstallOutcome::Completed) => SessionState::Completed,
            Ok(InstallOutcome::Aborted) => SessionState::Aborted,
            Err(_) => SessionState::Errored,
        };
        self.terminal_state = Some(terminal);
        settle.report(outcome.as_ref().copied().map_err(|e| e.to_string()));

        drop(subscription);
        self.state = SessionState::TornDown;

        match &outcome {
            Ok(o) => log::info!(
                "[bridge] install_id={}  settled={:?}  forwarded={}  suppressed={}",
                install_id,
                o,
                stats.forwarded,
                stats.suppressed
            ),
            Err(e) => log::error!(
                "[bridge] install_id={}  failed: {}  forwarded={}",
                install_id,
                e,
                stats.forwarded
            ),
        }

        outcome
    }
}

/// Reports the settlement to the bus observers exactly once.
struct SettleGuard<'a> {
    bus: &'a MessageBus,
    install_id: InstallId,
    settled: bool,
}

impl<'a> SettleGuard<'a> {
    fn new(bus: &'a MessageBus, install_id: InstallId) -> Self {
        bus.session_started(install_id);
        Self {
            bus,
            install_id,
            settled: false,
        }
    }

    fn report(&mut self, outcome: Result<InstallOutcome, String>) {
        self.settled = true;
        self.bus.session_settled(self.install_id, &outcome);
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            log::error!("[bridge] install_id={}  session ended without settling", self.install_id);
            self.bus
                .session_settled(self.install_id, &Err("install ended unexpectedly".to_string()));
        }
    }
}

/// Drain the fragmenter's event channel, tagging and publishing each event.
///
/// After the bridge has observed its own cancellation the remaining events
/// are still drained, so a fragmenter blocked on a full channel can make
/// progress and notice the abort, but they are no longer published.
async fn forward_events(
    bus: &MessageBus,
    install_id: InstallId,
    cancel_token: &CancellationToken,
    mut events_rx: mpsc::Receiver<FragmenterEvent>,
) -> ForwardStats {
    let mut stats = ForwardStats::default();

    while let Some(event) = events_rx.recv().await {
        if cancel_token.is_cancelled() {
            stats.suppressed += 1;
            continue;
        }
        log_event(install_id, &event);
        bus.emit(ForwardedEvent::new(install_id, event));
        stats.forwarded += 1;
    }

    if stats.suppressed > 0 {
        log::debug!(
            "[bridge] install_id={}  suppressed {} event(s) after abort",
            install_id,
            stats.suppressed
        );
    }
    stats
}

fn log_event(install_id: InstallId, event: &FragmenterEvent) {
    match event {
        FragmenterEvent::Error { message } | FragmenterEvent::LogError { message } => {
            log::error!("[fragmenter] install_id={}  {}", install_id, message)
        }
        FragmenterEvent::LogWarn { message } => {
            log::warn!("[fragmenter] install_id={}  {}", install_id, message)
        }
        FragmenterEvent::LogInfo { message } => {
            log::info!("[fragmenter] install_id={}  {}", install_id, message)
        }
        FragmenterEvent::DownloadProgress { module, progress } => log::trace!(
            "[fragmenter] install_id={}  module={}  loaded={}  total={:?}",
            install_id,
            module,
            progress.loaded,
            progress.total
        ),
        FragmenterEvent::RetryScheduled { module, retry_count, wait_secs } => log::debug!(
            "[fragmenter] install_id={}  module={}  retry #{} in {}s",
            install_id,
            module,
            retry_count,
            wait_secs
        ),
        FragmenterEvent::RetryStarted { module, retry_count } => log::debug!(
            "[fragmenter] install_id={}  module={}  retry #{} started",
            install_id,
            module,
            retry_count
        ),
        FragmenterEvent::FullDownload { reason } => {
            log::debug!("[fragmenter] install_id={}  full download: {}", install_id, reason)
        }
        FragmenterEvent::DownloadStarted { module }
        | FragmenterEvent::DownloadFinished { module }
        | FragmenterEvent::UnzipStarted { module }
        | FragmenterEvent::UnzipFinished { module }
        | FragmenterEvent::CopyStarted { module }
        | FragmenterEvent::CopyFinished { module } => log::debug!(
            "[fragmenter] install_id={}  module={}  {}",
            install_id,
            module,
            event.kind().as_str()
        ),
    }
}
