//! Guest-side method and signal handling (spec. §4.3.2): the task backing a
//! process that has arrived on this (PEN) node.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use clondike_wire::payload::{Exit, GuestStarted, NpmParams as WireNpm, PpmMigrBackGuestReq};
use clondike_wire::{ClondikeError, Envelope, MessageHeader, MessageId, Result};

use crate::pump::{Method, PumpStatus, Task};

/// On `P_EMIGRATE` (spec. §4.3.2): extract the remote pid and checkpoint
/// path, answer `GUEST_STARTED`, and schedule the restart so the pump's
/// next iteration performs the `execve`.
pub fn handle_p_emigrate(task: &Arc<Task>, env: &Envelope) -> Result<PumpStatus> {
    let body: clondike_wire::payload::PEmigrate = env.decode()?;
    task.remote_pid.store(body.src_pid, Ordering::SeqCst);

    let resp = GuestStarted { remote_pid: body.src_pid, guest_pid: task.local_pid };
    let resp_env = Envelope::encode(
        MessageHeader::request(MessageId::GuestStarted, env.header.transaction_id, body.src_pid),
        &resp,
    )?;
    task.peer.send(resp_env)?;

    task.flush_and_submit(Method::Execve {
        path: body.ckpt_path.into(),
        argv: Vec::new(),
        envp: Vec::new(),
    });
    Ok(PumpStatus::KeepPumping)
}

/// Called when the scheduled restart `execve` fails: tell the CCN and die
/// (spec. §4.3.2: "On execve failure: send err(GUEST_STARTED, -ENOEXEC) and
/// return KillMe").
pub fn handle_execve_failure(task: &Task, transaction_id: u32) -> Result<PumpStatus> {
    let env = Envelope::encode_error(
        MessageId::GuestStarted,
        transaction_id,
        task.remote_pid.load(Ordering::SeqCst),
        -libc::ENOEXEC,
    )?;
    let _ = task.peer.send(env);
    Ok(PumpStatus::KillMe)
}

/// `migrate_back_ppm`: checkpoint self (caller's job), send
/// `PPM_MIGR_BACK_GUEST_REQ` asynchronously, then terminate unconditionally
/// — the shadow re-hydrates (spec. §4.3.2).
pub fn migrate_back_ppm(task: &Task, ckpt_path: &str) -> Result<PumpStatus> {
    let payload = PpmMigrBackGuestReq { ckpt_path: ckpt_path.to_string() };
    let target_pid = task.remote_pid.load(Ordering::SeqCst);
    let env = Envelope::encode(MessageHeader::async_msg(MessageId::PpmMigrBackGuestReq, target_pid), &payload)?;
    let _ = task.peer.send(env);
    Ok(PumpStatus::KillMe)
}

/// `migrate_back_npm`: same, with the NPM payload folded into the
/// checkpoint at `ckpt_path`; a send failure keeps the task running locally
/// for a later retry instead of killing it (spec. §4.3.2).
pub fn migrate_back_npm(task: &Task, ckpt_path: &str, _npm: WireNpm) -> Result<PumpStatus> {
    let payload = PpmMigrBackGuestReq { ckpt_path: ckpt_path.to_string() };
    let target_pid = task.remote_pid.load(Ordering::SeqCst);
    let env = Envelope::encode(MessageHeader::async_msg(MessageId::PpmMigrBackGuestReq, target_pid), &payload)?;
    match task.peer.send(env) {
        Ok(()) => Ok(PumpStatus::KillMe),
        Err(_) => Ok(PumpStatus::RemoveAndLetMeGo),
    }
}

/// `PPM_MIGR_BACK_SHADOW_REQ` inbound: trigger `migrate_back_ppm` on self.
pub fn handle_migrate_back_shadow_req(task: &Arc<Task>) {
    task.submit(Method::MigrateBackPpm);
}

/// Exit intercept (spec. §4.3.2): sync any proxied files if the peer is
/// alive (left to the node manager's file-proxy layer, out of scope here),
/// send `EXIT` asynchronously, detach.
pub fn handle_exit(task: &Task, code: i32) -> Result<PumpStatus> {
    let remote_pid = task.remote_pid.load(Ordering::SeqCst);
    let payload = Exit { remote_pid, code };
    let env = Envelope::encode(MessageHeader::async_msg(MessageId::Exit, remote_pid), &payload)?;
    let _ = task.peer.send(env);
    Ok(PumpStatus::RemoveAndLetMeGo)
}

pub fn handle_message(task: &Arc<Task>, env: &Envelope) -> Result<PumpStatus> {
    match env.header.id {
        MessageId::PEmigrate => handle_p_emigrate(task, env),
        MessageId::PpmMigrBackShadowReq => {
            handle_migrate_back_shadow_req(task);
            Ok(PumpStatus::KeepPumping)
        }
        other => Err(ClondikeError::InvalidMessage(format!("unexpected message for guest: {other:?}"))),
    }
}
