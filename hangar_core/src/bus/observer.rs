use crate::fragmenter::events::ForwardedEvent;
use crate::types::types::{InstallId, InstallOutcome};

/// Observes every session that runs over a [`MessageBus`].
///
/// Calls are made synchronously by the bus, in the order the bridge made
/// them:
/// - `on_started` once the install id has been claimed, before any event.
/// - `on_event` for every forwarded event, before it is queued outbound.
/// - `on_settled` once, after the last event and before the id is freed.
///
/// Implementations must not block; they run on the bridge's task.
///
/// [`MessageBus`]: super::message_bus::MessageBus
pub trait SessionObserver: Send + Sync + 'static {
    fn on_started(&self, _install_id: InstallId) {}

    fn on_event(&self, event: &ForwardedEvent);

    fn on_settled(&self, install_id: InstallId, outcome: &Result<InstallOutcome, String>);
}
