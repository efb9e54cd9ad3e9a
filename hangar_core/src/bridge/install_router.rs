use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bridge::install_bridge::InstallBridge;
use crate::bus::message_bus::MessageBus;
use crate::fragmenter::package_fragmenter::Fragmenter;
use crate::types::types::{InstallError, InstallId, InstallOutcome, InstallRequest};

/// Maps boundary-channel requests onto install bridges.
///
/// Install requests with distinct ids run concurrently; a request whose id
/// is already in flight is rejected. Cancel requests are handed to the bus,
/// which offers them to every active bridge's listener.
pub struct InstallRouter {
    fragmenter: Arc<dyn Fragmenter>,
    bus: Arc<MessageBus>,
    active: Mutex<HashSet<InstallId>>,
}

impl InstallRouter {
    pub fn new(fragmenter: Arc<dyn Fragmenter>, bus: Arc<MessageBus>) -> Self {
        Self {
            fragmenter,
            bus,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Handle one `install-from-url` request; resolves when the install
    /// settles.
    pub async fn handle_install_request(
        &self,
        request: InstallRequest,
    ) -> Result<InstallOutcome, InstallError> {
        if let Err(e) = request.validate() {
            log::warn!("[router] install_id={}  rejected: {}", request.install_id, e);
            return Err(e);
        }

        let _slot = self.claim(request.install_id)?;

        let mut bridge = InstallBridge::new(Arc::clone(&self.fragmenter), Arc::clone(&self.bus));
        bridge.run(&request).await
    }

    /// Handle one `cancel-install` request. Fire-and-forget: an id with no
    /// active session is ignored.
    pub fn handle_cancel_request(&self, install_id: InstallId) {
        let matched = self.bus.cancel_install(install_id);
        if matched == 0 {
            log::debug!("[router] install_id={}  cancel ignored, no active install", install_id);
        }
    }

    /// Ids of installs currently in flight, ascending.
    pub fn active_installs(&self) -> Vec<InstallId> {
        let mut ids: Vec<InstallId> = self.active().iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_active(&self, install_id: InstallId) -> bool {
        self.active().contains(&install_id)
    }

    fn claim(&self, install_id: InstallId) -> Result<ActiveSlot<'_>, InstallError> {
        if !self.active().insert(install_id) {
            log::warn!("[router] install_id={}  rejected: already in progress", install_id);
            return Err(InstallError::DuplicateInstall(install_id));
        }
        Ok(ActiveSlot {
            router: self,
            install_id,
        })
    }

    fn active(&self) -> MutexGuard<'_, HashSet<InstallId>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Marks an id as in flight until dropped.
struct ActiveSlot<'a> {
    router: &'a InstallRouter,
    install_id: InstallId,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.router.active().remove(&self.install_id);
    }
}
