use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::bus::observer::SessionObserver;
use crate::fragmenter::events::ForwardedEvent;
use crate::types::types::{InstallId, InstallOutcome};

/// Cancel-listener callback. Returns `true` when the request was addressed
/// to this listener.
type CancelHandler = Arc<dyn Fn(InstallId) -> bool + Send + Sync>;

struct CancelListener {
    listener_id: u64,
    install_id: InstallId,
    handler: CancelHandler,
}

/// The backend side of the boundary channel.
///
/// Outbound, it carries [`ForwardedEvent`]s to whoever holds the receiver
/// returned by [`MessageBus::new`], and reports session lifecycle to any
/// registered [`SessionObserver`]. Inbound, it keeps the registry of
/// cancel listeners: a cancel request is offered to every listener and each
/// one decides whether it is the addressee.
///
/// The outbound queue is unbounded so that forwarding never drops or
/// coalesces events while the UI side is slow.
pub struct MessageBus {
    outbound: mpsc::UnboundedSender<ForwardedEvent>,
    observers: Vec<Arc<dyn SessionObserver>>,
    cancel_listeners: Mutex<Vec<CancelListener>>,
    next_listener_id: AtomicU64,
}

impl MessageBus {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ForwardedEvent>) {
        Self::with_observers(Vec::new())
    }

    pub fn with_observers(
        observers: Vec<Arc<dyn SessionObserver>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ForwardedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Arc::new(Self {
            outbound: tx,
            observers,
            cancel_listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        });
        (bus, rx)
    }

    /// Publish one event to the UI side.
    pub fn emit(&self, event: ForwardedEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
        if let Err(e) = self.outbound.send(event) {
            log::debug!(
                "[bus] no receiver for event  install_id={}  kind={}",
                e.0.install_id,
                e.0.kind().as_str()
            );
        }
    }

    pub fn session_started(&self, install_id: InstallId) {
        for observer in &self.observers {
            observer.on_started(install_id);
        }
    }

    pub fn session_settled(&self, install_id: InstallId, outcome: &Result<InstallOutcome, String>) {
        for observer in &self.observers {
            observer.on_settled(install_id, outcome);
        }
    }

    /// Register a cancel listener for `install_id`.
    ///
    /// `on_cancel` runs when a matching cancel request arrives. The listener
    /// stays registered until the returned subscription is dropped.
    pub fn on_cancel_install<F>(self: &Arc<Self>, install_id: InstallId, on_cancel: F) -> CancelSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let handler: CancelHandler = Arc::new(move |requested| {
            if requested != install_id {
                return false;
            }
            on_cancel();
            true
        });

        self.listeners().push(CancelListener {
            listener_id,
            install_id,
            handler,
        });
        log::debug!("[bus] cancel listener added  install_id={}  listener={}", install_id, listener_id);

        CancelSubscription {
            bus: Arc::clone(self),
            listener_id,
            install_id,
        }
    }

    /// Offer a cancel request to every registered listener.
    ///
    /// Handlers run after the registry lock is released, so a handler may
    /// use the bus itself. Returns how many listeners accepted the request;
    /// zero for an unknown id.
    pub fn cancel_install(&self, install_id: InstallId) -> usize {
        let handlers: Vec<CancelHandler> = self
            .listeners()
            .iter()
            .map(|listener| Arc::clone(&listener.handler))
            .collect();
        let matched = handlers.iter().filter(|handler| handler(install_id)).count();
        log::debug!(
            "[bus] cancel request  install_id={}  listeners={}  matched={}",
            install_id,
            handlers.len(),
            matched
        );
        matched
    }

    pub fn cancel_listener_count(&self) -> usize {
        self.listeners().len()
    }

    pub fn has_cancel_listener(&self, install_id: InstallId) -> bool {
        self.listeners().iter().any(|l| l.install_id == install_id)
    }

    fn remove_listener(&self, listener_id: u64) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|l| l.listener_id != listener_id);
        before != listeners.len()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<CancelListener>> {
        self.cancel_listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps one cancel listener registered; removes it exactly once on drop.
pub struct CancelSubscription {
    bus: Arc<MessageBus>,
    listener_id: u64,
    install_id: InstallId,
}

impl CancelSubscription {
    pub fn install_id(&self) -> InstallId {
        self.install_id
    }
}

impl Drop for CancelSubscription {
    fn drop(&mut self) {
        if self.bus.remove_listener(self.listener_id) {
            log::debug!(
                "[bus] cancel listener removed  install_id={}  listener={}",
                self.install_id,
                self.listener_id
            );
        }
    }
}
