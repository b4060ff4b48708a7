//! Post-fork handling (spec. §4.3.3): when a migrated process forks, the
//! child inherits the parent's task pointer by raw copy. The node manager's
//! fork hook must detach that copy, attach a fresh task of the same role,
//! and submit `PostForkSetTid`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use clondike_wire::payload::GuestStarted;
use clondike_wire::{Envelope, MessageHeader, MessageId, Result, TRANSACTION_ID_INVAL};

use crate::pump::{Method, Task, TaskRole};

/// Builds the fresh task a forked child attaches to, inheriting its
/// parent's role and peer link but none of its queues or transaction state.
pub fn fresh_child_task(parent: &Task, child_pid: i32) -> Arc<Task> {
    let child = Task::new(parent.role, child_pid, parent.peer.clone());
    child.remote_pid.store(parent.remote_pid.load(Ordering::SeqCst), Ordering::SeqCst);
    child.submit(Method::PostForkSetTid);
    child
}

/// CCN-side: the shadow fork opens a nested `GUEST_STARTED` dialogue with
/// an invalid transaction id to carry the newly-born remote pid (spec.
/// §4.3.3).
pub fn announce_shadow_fork(task: &Task, remote_child_pid: i32) -> Result<()> {
    let payload = GuestStarted { remote_pid: remote_child_pid, guest_pid: task.local_pid };
    let env = Envelope::encode(
        MessageHeader::request(MessageId::GuestStarted, TRANSACTION_ID_INVAL, remote_child_pid),
        &payload,
    )?;
    task.peer.send(env)
}

/// PEN-side: the guest reports either `GUEST_STARTED` or a degraded-fork
/// `EXIT` to the shadow depending on the fork return value (spec. §4.3.3).
pub fn announce_guest_fork(task: &Task, fork_result: Result<i32, i32>) -> Result<()> {
    let remote_pid = task.remote_pid.load(Ordering::SeqCst);
    match fork_result {
        Ok(child_local_pid) => {
            let payload = GuestStarted { remote_pid, guest_pid: child_local_pid };
            let env = Envelope::encode(
                MessageHeader::request(MessageId::GuestStarted, TRANSACTION_ID_INVAL, remote_pid),
                &payload,
            )?;
            task.peer.send(env)
        }
        Err(errno) => {
            let payload = clondike_wire::payload::Exit { remote_pid, code: errno };
            let env = Envelope::encode(MessageHeader::async_msg(MessageId::Exit, remote_pid), &payload)?;
            task.peer.send(env)
        }
    }
}
