//! Bridges a [`MigrationManager`]'s async `send` into the synchronous
//! [`clondike_task::PeerLink`] a task's pump thread calls into, the same
//! sync-to-async bridge `clondike_task::shadow::emigrate_p` already uses for
//! its own request/response wait (spec. §4.3.1).

use std::sync::Arc;

use clondike_task::PeerLink;
use clondike_wire::{Envelope, Result};

use crate::manager::MigrationManager;

pub struct ManagerPeerLink {
    manager: Arc<MigrationManager>,
    rt: tokio::runtime::Handle,
}

impl ManagerPeerLink {
    /// `rt` must be a handle to the runtime that drives `manager`'s
    /// connection; the pump thread this link is handed to is a plain OS
    /// thread, never one of that runtime's own workers, so blocking on it
    /// here can't deadlock the runtime.
    pub fn new(manager: Arc<MigrationManager>, rt: tokio::runtime::Handle) -> Arc<Self> {
        Arc::new(Self { manager, rt })
    }
}

impl PeerLink for ManagerPeerLink {
    fn send(&self, env: Envelope) -> Result<()> {
        self.rt.block_on(self.manager.send(&env))
    }
}
