//! Per-peer migration manager (spec. §4.4): owns one control connection, a
//! message pump, the child-task table, and the authenticate/shutdown
//! lifecycle.

use std::sync::Arc;
use std::time::Duration;

use clondike_director::Director;
use clondike_task::Task;
use clondike_wire::payload::{Authenticate, AuthenticateResp};
use clondike_wire::{ClondikeError, Envelope, MessageHeader, MessageId, Result, TransactionTable};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::net::TcpStream;

use crate::connection::{self, ConnectionWriter};
use crate::state::{ManagerState, ManagerStateCell};
use crate::table::TaskTable;

/// Which end of the control connection this manager sits on — the
/// authentication handshake runs in opposite directions (spec. §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Ccn,
    Pen,
}

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MigrationManager {
    pub role: NodeRole,
    pub local_node_id: u32,
    pub local_arch: String,
    pub peer_node_id: Mutex<Option<u32>>,
    pub peer_arch: Mutex<Option<String>>,

    state: ManagerStateCell,
    writer: Arc<ConnectionWriter>,
    pub tasks: Arc<TaskTable>,
    pub transactions: Arc<TransactionTable>,
    director: Arc<dyn Director>,

    msg_tx: Sender<Envelope>,
    msg_rx: Receiver<Envelope>,
}

impl MigrationManager {
    /// Wires up a manager over an already-connected socket; the caller
    /// (node manager) owns accept/connect. Spawns the receive-loop task
    /// (spec. §5 "one message-pump thread per migration manager"). `director`
    /// is consulted on connect (CCN-side `authenticate_as_ccn`) and notified
    /// on disconnect (spec. §6) for the lifetime of this manager.
    pub fn new(
        role: NodeRole,
        local_node_id: u32,
        local_arch: impl Into<String>,
        stream: TcpStream,
        task_table_capacity: usize,
        director: Arc<dyn Director>,
    ) -> Arc<Self> {
        let (read_half, writer) = connection::split(stream);
        let tasks = Arc::new(TaskTable::new(task_table_capacity));
        let (msg_tx, msg_rx) = crossbeam_channel::unbounded();

        let manager = Arc::new(Self {
            role,
            local_node_id,
            local_arch: local_arch.into(),
            peer_node_id: Mutex::new(None),
            peer_arch: Mutex::new(None),
            state: ManagerStateCell::default(),
            writer,
            tasks: tasks.clone(),
            transactions: TransactionTable::new(),
            director,
            msg_tx: msg_tx.clone(),
            msg_rx,
        });

        let spawned = manager.clone();
        let on_disconnect = manager.clone();
        tokio::spawn(async move {
            let result = connection::run_receive_loop(read_half, tasks, move |env| {
                if env.header.transaction_id != clondike_wire::TRANSACTION_ID_INVAL
                    && spawned.transactions.contains(env.header.transaction_id)
                {
                    let id = env.header.transaction_id;
                    if env.header.is_error {
                        spawned.transactions.cancel(
                            id,
                            ClondikeError::InvalidMessage("peer returned an error response".into()),
                        );
                    } else {
                        spawned.transactions.complete(id, env);
                    }
                } else {
                    let _ = msg_tx.send(env);
                }
            })
            .await;
            if let Err(e) = result {
                tracing::debug!(error = %e, "connection receive loop ended");
            }
            if let Some(peer_node_id) = *on_disconnect.peer_node_id.lock() {
                on_disconnect.director.node_disconnected(peer_node_id);
            }
        });

        manager
    }

    pub fn state(&self) -> ManagerState {
        self.state.get()
    }

    pub async fn send(&self, env: &Envelope) -> Result<()> {
        self.writer.send(env).await
    }

    /// Next manager-scope message, bounded wait (used by a manager-level
    /// pump equivalent to the task's method pump; spec. §5).
    pub fn recv_msg_timeout(&self, dur: Duration) -> Option<Envelope> {
        self.msg_rx.recv_timeout(dur).ok()
    }

    /// CCN-side authentication (spec. §4.4): wait bounded for
    /// `AUTHENTICATE`, consult the director, reply, transition.
    pub async fn authenticate_as_ccn(&self) -> Result<()> {
        let request = tokio::time::timeout(AUTH_TIMEOUT, self.next_mgr_request(MessageId::Authenticate))
            .await
            .map_err(|_| ClondikeError::TransactionTimeout)??;
        let body: Authenticate = request.decode()?;
        let peer_arch = body.arch.clone();
        let accepted = self.director.node_connected(body.peer_node_id, &peer_arch);

        let resp = AuthenticateResp {
            node_id: self.local_node_id,
            arch: self.local_arch.clone(),
            result_code: if accepted { 0 } else { -libc::EACCES },
            mount_params: Vec::new(),
        };
        let env = Envelope::encode(
            MessageHeader::mgr_request(MessageId::AuthenticateResp, request.header.transaction_id),
            &resp,
        )?;
        self.send(&env).await?;

        if accepted {
            *self.peer_node_id.lock() = Some(body.peer_node_id);
            *self.peer_arch.lock() = Some(peer_arch);
            self.state.try_transition(ManagerState::Connected)
        } else {
            self.state.try_transition(ManagerState::ShutDown)
        }
    }

    /// PEN-side authentication (spec. §4.4): send the request, await the
    /// response, transition on success.
    pub async fn authenticate_as_pen(&self, opaque_auth_data: Vec<u8>) -> Result<()> {
        let handle = self.transactions.begin();
        let payload = Authenticate { peer_node_id: self.local_node_id, arch: self.local_arch.clone(), opaque_auth_data };
        let env = Envelope::encode(MessageHeader::mgr_request(MessageId::Authenticate, handle.id), &payload)?;
        self.send(&env).await?;

        let resp = handle.recv_timeout(AUTH_TIMEOUT).await;
        match resp {
            Ok(env) if !env.header.is_error => {
                let body: AuthenticateResp = env.decode()?;
                if body.result_code == 0 {
                    *self.peer_node_id.lock() = Some(body.node_id);
                    *self.peer_arch.lock() = Some(body.arch);
                    self.state.try_transition(ManagerState::Connected)
                } else {
                    let _ = self.state.try_transition(ManagerState::ShutDown);
                    Err(ClondikeError::AuthenticationFailed(format!("peer rejected with code {}", body.result_code)))
                }
            }
            Ok(_) => {
                let _ = self.state.try_transition(ManagerState::ShutDown);
                Err(ClondikeError::AuthenticationFailed("peer returned an error response".into()))
            }
            Err(e) => {
                let _ = self.state.try_transition(ManagerState::ShutDown);
                Err(e)
            }
        }
    }

    /// Blocks (bounded by the caller's surrounding timeout) for the next
    /// `Mgr`-group message matching `id`, used only during the
    /// authentication handshake before any general message-pump logic
    /// applies. The wait on the (sync) manager queue is offloaded to a
    /// blocking-pool thread via `spawn_blocking` so it never stalls the
    /// receive loop's own task on a single-threaded runtime.
    async fn next_mgr_request(&self, id: MessageId) -> Result<Envelope> {
        loop {
            let rx = self.msg_rx.clone();
            let attempt = tokio::task::spawn_blocking(move || {
                rx.recv_timeout(Duration::from_millis(20))
            })
            .await
            .map_err(|e| ClondikeError::InvalidMessage(e.to_string()))?;

            match attempt {
                Ok(env) if env.header.id == id => return Ok(env),
                Ok(_) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return Err(ClondikeError::PeerLost)
                }
            }
        }
    }

    /// Spawns the manager-level message-dispatch loop draining `Mgr`-group
    /// application messages once past authentication (spec. §4.6
    /// "Delivery"): `next_mgr_request` only serves the handshake, this loop
    /// serves everything after — `P_EMIGRATE`, `SIGNAL`, `GENERIC_USER` — so
    /// the node manager can act on them instead of them piling up unread.
    /// Runs until the connection's receive loop disconnects the queue.
    pub fn spawn_dispatch_loop(self: &Arc<Self>, handle: impl Fn(Envelope) + Send + Sync + 'static) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let rx = manager.msg_rx.clone();
                let attempt = tokio::task::spawn_blocking(move || rx.recv_timeout(DRAIN_POLL_INTERVAL)).await;
                match attempt {
                    Ok(Ok(env)) => handle(env),
                    Ok(Err(crossbeam_channel::RecvTimeoutError::Timeout)) => continue,
                    Ok(Err(crossbeam_channel::RecvTimeoutError::Disconnected)) => break,
                    Err(_) => break,
                }
            }
        });
    }

    /// Begins shutdown (spec. §4.4 "Shutdown"): PEN-side managers ask each
    /// child to migrate home; CCN-side kill all children outright, since
    /// their shadows are the residency roots.
    pub fn begin_shutdown(&self, migrate_home: impl Fn(&Arc<Task>)) -> Result<()> {
        self.state.try_transition(ManagerState::ShuttingDown)?;
        for task in self.tasks.all() {
            match self.role {
                NodeRole::Pen => migrate_home(&task),
                NodeRole::Ccn => {
                    let _ = task.set_peer_lost();
                }
            }
        }
        Ok(())
    }

    /// Polls (bounded interval, spec. §4.4 "≤100ms") until the child-task
    /// table has drained, then finishes the transition to `ShutDown`.
    pub async fn wait_for_drain(&self) -> Result<()> {
        while !self.tasks.is_empty() {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        self.state.try_transition(ManagerState::ShutDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ccn_pen_authenticate_over_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let ccn_accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mgr = MigrationManager::new(NodeRole::Ccn, 1, "x86_64", stream, 16, Arc::new(clondike_director::NullDirector));
            mgr.authenticate_as_ccn().await.unwrap();
            mgr
        });

        let pen_stream = TcpStream::connect(addr).await.unwrap();
        let pen_mgr = MigrationManager::new(NodeRole::Pen, 2, "x86_64", pen_stream, 16, Arc::new(clondike_director::NullDirector));
        pen_mgr.authenticate_as_pen(Vec::new()).await.unwrap();

        let ccn_mgr = ccn_accept.await.unwrap();
        assert_eq!(ccn_mgr.state(), ManagerState::Connected);
        assert_eq!(pen_mgr.state(), ManagerState::Connected);
        assert_eq!(*pen_mgr.peer_node_id.lock(), Some(1));
        assert_eq!(*ccn_mgr.peer_node_id.lock(), Some(2));
    }

    #[tokio::test]
    async fn rejected_peer_leaves_ccn_in_shutdown() {
        struct AlwaysReject;
        impl Director for AlwaysReject {
            fn node_connected(&self, _: u32, _: &str) -> bool {
                false
            }
            fn node_disconnected(&self, _: u32) {}
            fn migrated_home(&self, _: i32) {}
            fn generic_user_message_recv(&self, _: u32, _: &clondike_wire::payload::GenericUser) {}
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let ccn_accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mgr = MigrationManager::new(NodeRole::Ccn, 1, "x86_64", stream, 16, Arc::new(AlwaysReject));
            mgr.authenticate_as_ccn().await.unwrap();
            mgr
        });

        let pen_stream = TcpStream::connect(addr).await.unwrap();
        let pen_mgr = MigrationManager::new(NodeRole::Pen, 2, "x86_64", pen_stream, 16, Arc::new(clondike_director::NullDirector));
        let err = pen_mgr.authenticate_as_pen(Vec::new()).await.unwrap_err();
        assert!(matches!(err, ClondikeError::AuthenticationFailed(_)));

        let ccn_mgr = ccn_accept.await.unwrap();
        assert_eq!(ccn_mgr.state(), ManagerState::ShutDown);
    }

    #[tokio::test]
    async fn generic_user_message_round_trips_after_authentication() {
        use clondike_wire::payload::GenericUser;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let ccn_accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mgr = MigrationManager::new(NodeRole::Ccn, 1, "x86_64", stream, 16, Arc::new(clondike_director::NullDirector));
            mgr.authenticate_as_ccn().await.unwrap();
            mgr
        });

        let pen_stream = TcpStream::connect(addr).await.unwrap();
        let pen_mgr = MigrationManager::new(NodeRole::Pen, 2, "x86_64", pen_stream, 16, Arc::new(clondike_director::NullDirector));
        pen_mgr.authenticate_as_pen(Vec::new()).await.unwrap();
        let ccn_mgr = ccn_accept.await.unwrap();

        let env = Envelope::encode(
            MessageHeader::mgr_async(MessageId::GenericUser),
            &GenericUser { payload: vec![7, 8, 9] },
        )
        .unwrap();
        ccn_mgr.send(&env).await.unwrap();

        let received = pen_mgr.recv_msg_timeout(Duration::from_secs(2)).expect("generic user message arrived");
        assert_eq!(received.header.id, MessageId::GenericUser);
        let body: GenericUser = received.decode().unwrap();
        assert_eq!(body.payload, vec![7, 8, 9]);
    }
}
