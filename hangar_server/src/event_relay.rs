use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};

use hangar_core::bus::observer::SessionObserver;
use hangar_core::fragmenter::events::ForwardedEvent;
use hangar_core::projection::status::{InstallStatus, StatusBoard};
use hangar_core::types::types::{InstallId, InstallOutcome};

/// Per-client SSE buffer. A client that falls this far behind is told how
/// many events it missed.
const SSE_BUFFER: usize = 1024;

/// Keeps the status board current and fans forwarded events out to every
/// connected SSE client.
///
/// The board is updated from the bus observer callbacks, which run on the
/// bridge's task in the order the session produced them; SSE delivery goes
/// through the bus receiver and a broadcast channel.
pub struct EventRelay {
    sse_tx: broadcast::Sender<ForwardedEvent>,
    board: Mutex<StatusBoard>,
}

impl EventRelay {
    pub fn new() -> Arc<Self> {
        let (sse_tx, _) = broadcast::channel(SSE_BUFFER);
        Arc::new(Self {
            sse_tx,
            board: Mutex::new(StatusBoard::new()),
        })
    }

    /// Start pumping the bus receiver to SSE clients on the current runtime.
    pub fn start(&self, bus_rx: mpsc::UnboundedReceiver<ForwardedEvent>) {
        tokio::spawn(pump(bus_rx, self.sse_tx.clone()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForwardedEvent> {
        self.sse_tx.subscribe()
    }

    pub fn status(&self, install_id: InstallId) -> Option<InstallStatus> {
        self.board().get(install_id).cloned()
    }

    fn board(&self) -> MutexGuard<'_, StatusBoard> {
        self.board.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionObserver for EventRelay {
    fn on_started(&self, install_id: InstallId) {
        self.board().begin(install_id);
    }

    fn on_event(&self, event: &ForwardedEvent) {
        self.board().apply(event);
    }

    fn on_settled(&self, install_id: InstallId, outcome: &Result<InstallOutcome, String>) {
        log::debug!("[relay] install_id={}  settled={:?}", install_id, outcome);
        self.board().finish(install_id, outcome);
    }
}

async fn pump(mut bus_rx: mpsc::UnboundedReceiver<ForwardedEvent>, sse_tx: broadcast::Sender<ForwardedEvent>) {
    while let Some(event) = bus_rx.recv().await {
        // send() only fails when no SSE client is connected.
        let _ = sse_tx.send(event);
    }
    log::debug!("[relay] bus closed, pump exiting");
}
