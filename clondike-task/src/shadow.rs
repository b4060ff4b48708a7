//! Shadow-side method and signal handling (spec. §4.3.1): the residual
//! controller for a process that has left this (CCN) node.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use clondike_wire::payload::{Exit, GuestStarted, NpmParams as WireNpmParams, PpmMigrBackShadowReq, Signal};
use clondike_wire::{ClondikeError, Envelope, MessageHeader, MessageId, Result};

use crate::pump::{Method, NpmParams, PumpStatus, Task};

/// `emigrate_p`: checkpoint self, send `P_EMIGRATE`, wait for the response.
/// On `GUEST_STARTED`, record the remote pid and move into the post-
/// emigration relay state; any failure resumes the process locally.
pub fn emigrate_p(
    task: &Arc<Task>,
    exec_name: &str,
    ckpt_path: &str,
    ids: ProcessIds,
    npm: Option<NpmParams>,
) -> Result<PumpStatus> {
    use clondike_wire::payload::PEmigrate;

    let wire_npm = npm.map(|n| WireNpmParams { filename: n.filename, argv: n.argv, envp: n.envp });
    let handle = task.transactions.begin();
    let payload = PEmigrate {
        src_pid: task.local_pid,
        exec_name: exec_name.to_string(),
        ckpt_path: ckpt_path.to_string(),
        uid: ids.uid,
        gid: ids.gid,
        fsuid: ids.fsuid,
        fsgid: ids.fsgid,
        npm: wire_npm,
    };
    let env = Envelope::encode(MessageHeader::mgr_request(MessageId::PEmigrate, handle.id), &payload)?;
    if task.peer.send(env).is_err() {
        return Ok(PumpStatus::RemoveAndLetMeGo);
    }

    let resp = match tokio::runtime::Handle::try_current() {
        Ok(rt) => rt.block_on(handle.recv_timeout(std::time::Duration::from_secs(10))),
        Err(_) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(handle.recv_timeout(std::time::Duration::from_secs(10)))
        }
    };

    match resp {
        Ok(env) if !env.header.is_error => {
            let body: GuestStarted = env.decode()?;
            task.remote_pid.store(body.remote_pid, Ordering::SeqCst);
            task.submit(Method::ProcessMsg { wait_for_msgs: true });
            Ok(PumpStatus::KeepPumping)
        }
        _ => Ok(PumpStatus::RemoveAndLetMeGo),
    }
}

pub struct ProcessIds {
    pub uid: u32,
    pub gid: u32,
    pub fsuid: u32,
    pub fsgid: u32,
}

/// `migrate_home_ppm`: send `PPM_MIGR_BACK_SHADOW_REQ` asynchronously; the
/// guest answers later with `PPM_MIGR_BACK_GUEST_REQ`, handled by
/// [`handle_message`] below.
pub fn migrate_home_ppm(task: &Task) -> Result<()> {
    let remote_pid = task.remote_pid.load(Ordering::SeqCst);
    let payload = PpmMigrBackShadowReq { target_remote_pid: remote_pid };
    let env = Envelope::encode(MessageHeader::async_msg(MessageId::PpmMigrBackShadowReq, remote_pid), &payload)?;
    task.peer.send(env)
}

/// Handles one inbound message while relaying (spec. §4.3.1): `EXIT`,
/// `VFORK_DONE`, and `PPM_MIGR_BACK_GUEST_REQ` are the shadow's concerns.
pub fn handle_message(task: &Arc<Task>, env: &Envelope) -> Result<PumpStatus> {
    match env.header.id {
        MessageId::Exit => {
            let body: Exit = env.decode()?;
            task.exit_code.store(body.code, Ordering::SeqCst);
            Ok(PumpStatus::KillMe)
        }
        MessageId::VforkDone => {
            // Completes the local vfork waiter; the actual waiter object
            // lives with the node manager's fork hook (spec. §4.3.3), so
            // this only acknowledges on the wire side.
            Ok(PumpStatus::KeepPumping)
        }
        MessageId::PpmMigrBackGuestReq => {
            let body: clondike_wire::payload::PpmMigrBackGuestReq = env.decode()?;
            task.flush_and_submit(Method::Execve {
                path: body.ckpt_path.into(),
                argv: Vec::new(),
                envp: Vec::new(),
            });
            Ok(PumpStatus::KeepPumping)
        }
        other => Err(ClondikeError::InvalidMessage(format!("unexpected message for shadow: {other:?}"))),
    }
}

/// Forwards a locally-delivered signal to the peer (spec. §4.3.1: "On any
/// signal delivered locally: forward as SIGNAL, no response expected").
pub fn forward_signal(task: &Task, signo: i32, code: i32) -> Result<()> {
    let payload = Signal { target_pid: task.remote_pid.load(Ordering::SeqCst), signo, code };
    let env = Envelope::encode(MessageHeader::mgr_async(MessageId::Signal), &payload)?;
    if task.peer.send(env).is_err() {
        task.set_peer_lost()?;
    }
    Ok(())
}
