//! The director client interface (spec. §6 "Director interface (external
//! collaborator)"): a policy engine consulted on connect, disconnect, and
//! migrate-home. The real director — whatever decides whether a given PEN
//! may join a cluster, or whether a process may migrate — lives outside
//! this crate entirely (spec. §1 "explicitly out of scope"); this crate
//! only specifies the trait the rest of the workspace calls through.

use clondike_wire::payload::GenericUser;

/// Consulted by the node manager and migration manager at the points spec.
/// §6 names. Failures other than "not configured" deny the operation; a
/// director that isn't configured is exactly [`NullDirector`].
pub trait Director: Send + Sync {
    /// A PEN or CCN peer has authenticated; accept or refuse the connection.
    fn node_connected(&self, peer_node_id: u32, peer_arch: &str) -> bool;

    /// A peer connection has ended, gracefully or otherwise.
    fn node_disconnected(&self, peer_node_id: u32);

    /// A process has returned home after a migration (PPM or NPM).
    fn migrated_home(&self, local_pid: i32);

    /// An opaque `GENERIC_USER` message arrived from a peer; the director
    /// may act on it but has no reply channel back into the protocol.
    fn generic_user_message_recv(&self, peer_node_id: u32, message: &GenericUser);
}

/// Default director: accepts every connection, ignores every notification.
/// Used whenever no real director is configured (spec. §6 "not configured"
/// is the one case that doesn't deny the operation).
pub struct NullDirector;

impl Director for NullDirector {
    fn node_connected(&self, peer_node_id: u32, peer_arch: &str) -> bool {
        tracing::debug!(peer_node_id, peer_arch, "no director configured, accepting");
        true
    }

    fn node_disconnected(&self, peer_node_id: u32) {
        tracing::debug!(peer_node_id, "peer disconnected");
    }

    fn migrated_home(&self, local_pid: i32) {
        tracing::debug!(local_pid, "process migrated home");
    }

    fn generic_user_message_recv(&self, peer_node_id: u32, message: &GenericUser) {
        tracing::debug!(peer_node_id, bytes = message.payload.len(), "generic user message received, discarding");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_director_accepts_everything() {
        let director = NullDirector;
        assert!(director.node_connected(1, "x86_64"));
        director.node_disconnected(1);
        director.migrated_home(42);
        director.generic_user_message_recv(1, &GenericUser { payload: vec![1, 2, 3] });
    }
}
