//! The control connection and its message pump (spec. §4.4, §5 "a
//! receive-mutex and a send-mutex separately"). Grounded in
//! `wormhole`'s `bin/server/main.rs` accept-loop/`spawn_client_handler`
//! shape: one `tokio::spawn`ed task per connection, reading typed,
//! length-framed messages in a loop and dispatching by match.

use std::sync::Arc;

use clondike_task::Task;
use clondike_wire::{ClondikeError, Envelope, Group, Result};
use tokio::io::AsyncRead;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::table::TaskTable;

/// Send half, independently locked from the receive loop (spec. §5).
pub struct ConnectionWriter {
    inner: AsyncMutex<OwnedWriteHalf>,
}

impl ConnectionWriter {
    pub async fn send(&self, env: &Envelope) -> Result<()> {
        let mut stream = self.inner.lock().await;
        env.write_to(&mut *stream).await
    }
}

/// Splits a connected socket into its independently-lockable halves.
pub fn split(stream: TcpStream) -> (OwnedReadHalf, Arc<ConnectionWriter>) {
    let (read_half, write_half) = stream.into_split();
    (read_half, Arc::new(ConnectionWriter { inner: AsyncMutex::new(write_half) }))
}

/// One iteration of the delivery rule (spec. §4.6 "Delivery"): routes a
/// decoded envelope either to the destination task (by `target_pid`,
/// `Proc`-group) or to the manager's own queue/transaction table
/// (`Mgr`-group). `deliver_to_manager` is a closure since the manager owns
/// its own transaction table and queue and this module must not depend on
/// `MigrationManager` to avoid a cyclic crate-internal dependency.
pub fn route_envelope(
    env: Envelope,
    tasks: &TaskTable,
    deliver_to_manager: impl FnOnce(Envelope),
) {
    match env.header.id.group() {
        Group::Proc => match tasks.get(env.header.target_pid) {
            Some(task) => deliver_envelope_to_task(&task, env),
            None => {
                tracing::warn!(
                    target_pid = env.header.target_pid,
                    id = ?env.header.id,
                    "dropping Proc message for unknown task"
                );
            }
        },
        Group::Mgr => deliver_to_manager(env),
    }
}

fn deliver_envelope_to_task(task: &Arc<Task>, env: Envelope) {
    let has_transaction = env.header.transaction_id != clondike_wire::TRANSACTION_ID_INVAL
        && task.transactions.contains(env.header.transaction_id);
    if has_transaction {
        let transaction_id = env.header.transaction_id;
        if env.header.is_error {
            task.transactions.cancel(
                transaction_id,
                ClondikeError::InvalidMessage("peer returned an error response".into()),
            );
        } else {
            task.transactions.complete(transaction_id, env);
        }
        return;
    }
    task.deliver(env);
}

/// Reads length-framed envelopes off `reader` until the peer closes or a
/// framing error occurs, routing each one per [`route_envelope`]. Runs as
/// its own `tokio::spawn`ed task, one per connection (spec. §5 "one
/// message-pump thread per migration manager").
pub async fn run_receive_loop(
    mut reader: (impl AsyncRead + Unpin + Send),
    tasks: Arc<TaskTable>,
    deliver_to_manager: impl Fn(Envelope) + Send + Sync + 'static,
) -> Result<()> {
    loop {
        let env = Envelope::read_from(&mut reader).await?;
        route_envelope(env, &tasks, |env| deliver_to_manager(env));
    }
}
