//! The method pump: a task's core loop (spec. §4.3 "Task controller").
//! Modeled as a blocking, per-thread loop matching on a method queue, built
//! the way `wormhole-attach::subreaper::run` matches on an epoll event
//! source and dispatches — here the dispatch source is a
//! `crossbeam_channel::Select` over the method queue, the inbound message
//! queue, and a signal-ready notification instead of raw epoll fds.

use std::ffi::CString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use clondike_wire::{ClondikeError, Envelope, Result, TransactionTable};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::pidfd::PidFd;

/// Stop-reason returned by a method or signal handler; interpreted by the
/// pump's caller (the node/manager controller), never by the pump itself
/// (spec. §4.3 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    KeepPumping,
    MoveMe,
    KillMe,
    ExecveFailedKillMe,
    LetMeGo,
    RemoveAndLetMeGo,
}

impl PumpStatus {
    pub fn stops_pump(self) -> bool {
        !matches!(self, PumpStatus::KeepPumping)
    }
}

/// Exec-args-only migration payload, reused verbatim from the checkpoint
/// wire type for methods that don't need the full serialized block.
pub type NpmParams = clondike_ckpt::npm::NpmParams;

/// One unit of work in the pump's FIFO (spec. §4.3, §9 "tagged-enum sum
/// type in place of the source's function-pointer queue").
#[derive(Debug)]
pub enum Method {
    EmigratePpm { npm: Option<NpmParams> },
    MigrateBackPpm,
    MigrateBackNpm { npm: NpmParams },
    ProcessMsg { wait_for_msgs: bool },
    Exit { code: i32 },
    Execve { path: PathBuf, argv: Vec<CString>, envp: Vec<CString> },
    SendMessage { msg: Envelope },
    PostForkSetTid,
}

/// Outbound connection to the peer manager, implemented by
/// `clondike-manager`'s per-peer connection; kept as a trait here so this
/// crate's tests don't need a real socket.
pub trait PeerLink: Send + Sync {
    fn send(&self, env: Envelope) -> Result<()>;
}

pub struct ExecveContext {
    pub path: PathBuf,
    pub argv: Vec<CString>,
    pub envp: Vec<CString>,
}

/// A task variant: `Shadow` tracks a process that has left the node;
/// `Guest` backs an arrived process (spec. §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRole {
    Shadow,
    Guest,
}

/// Per-migrated-process controller (spec. §4.3). The sole strong owner is
/// the manager's child-task table; everything else holds a cheap `Arc`
/// clone or a weak back-link, never an owning cycle (spec. §9).
pub struct Task {
    pub role: TaskRole,
    pub local_pid: i32,
    pub remote_pid: AtomicI32,
    pub exit_code: AtomicI32,
    pub peer_lost: AtomicBool,

    method_tx: Sender<Method>,
    method_rx: Receiver<Method>,
    msg_tx: Sender<Envelope>,
    msg_rx: Receiver<Envelope>,

    pub transactions: Arc<TransactionTable>,
    pub execve_context: Mutex<Option<ExecveContext>>,
    pub picked_up: tokio::sync::Notify,
    pub peer: Arc<dyn PeerLink>,
}

const NO_REMOTE_PID: i32 = -1;

impl Task {
    pub fn new(role: TaskRole, local_pid: i32, peer: Arc<dyn PeerLink>) -> Arc<Self> {
        let (method_tx, method_rx) = crossbeam_channel::unbounded();
        let (msg_tx, msg_rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            role,
            local_pid,
            remote_pid: AtomicI32::new(NO_REMOTE_PID),
            exit_code: AtomicI32::new(0),
            peer_lost: AtomicBool::new(false),
            method_tx,
            method_rx,
            msg_tx,
            msg_rx,
            transactions: TransactionTable::new(),
            execve_context: Mutex::new(None),
            picked_up: tokio::sync::Notify::new(),
            peer,
        })
    }

    /// Appends a method (spec. §4.3 "Queueing primitives").
    pub fn submit(&self, method: Method) {
        let _ = self.method_tx.send(method);
    }

    /// Atomically drains the queue then appends — used when a method must
    /// run strictly next, notably `execve` and `exit` (spec. §4.3).
    pub fn flush_and_submit(&self, method: Method) {
        while self.method_rx.try_recv().is_ok() {}
        let _ = self.method_tx.send(method);
    }

    /// Delivers an inbound message targeted at this task (manager's
    /// dispatcher calls this after verifying ownership, spec. §4.4).
    pub fn deliver(&self, env: Envelope) {
        let _ = self.msg_tx.send(env);
    }

    /// Marks the attached thread as having acknowledged migration-mode
    /// entry (spec. §4.3 "picked-up one-shot completion").
    pub fn acknowledge_pick_up(&self) {
        self.picked_up.notify_one();
    }

    pub fn set_peer_lost(&self) -> Result<()> {
        self.peer_lost.store(true, Ordering::SeqCst);
        if let Ok(pidfd) = PidFd::open(self.local_pid) {
            let _ = pidfd.kill(nix::sys::signal::Signal::SIGKILL);
        }
        Ok(())
    }

    /// The pump loop proper: dequeues and invokes methods in order,
    /// checking for inbound messages between each one (spec. §4.3 "Between
    /// closures, the pump checks for pending signals and invokes a
    /// task-specific signal handler; the handler's return status is treated
    /// identically").
    pub fn run_pump(
        self: &Arc<Self>,
        mut handle_method: impl FnMut(&Arc<Task>, Method) -> Result<PumpStatus>,
        mut handle_signal: impl FnMut(&Arc<Task>) -> Result<Option<PumpStatus>>,
    ) -> PumpStatus {
        loop {
            if let Some(status) = match handle_signal(self) {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(error = %e, "signal handler failed, killing task");
                    Some(PumpStatus::KillMe)
                }
            } {
                if status.stops_pump() {
                    return status;
                }
            }

            let method = match self.method_rx.recv_timeout(std::time::Duration::from_millis(50)) {
                Ok(method) => method,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return PumpStatus::KillMe,
            };

            match handle_method(self, method) {
                Ok(status) if status.stops_pump() => return status,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "method handler failed, killing task");
                    return PumpStatus::KillMe;
                }
            }
        }
    }

    /// Next inbound message, if any, without blocking (used by
    /// `ProcessMsg { wait_for_msgs: false }`).
    pub fn try_recv_msg(&self) -> Option<Envelope> {
        self.msg_rx.try_recv().ok()
    }

    /// Blocks (bounded) for the next inbound message (used by
    /// `ProcessMsg { wait_for_msgs: true }`).
    pub fn recv_msg_timeout(&self, dur: std::time::Duration) -> Option<Envelope> {
        self.msg_rx.recv_timeout(dur).ok()
    }
}

thread_local! {
    /// The task bound to this OS thread, if any (spec. §5 "one 'attached'
    /// thread per task"). Set by [`Task::bind_to_current_thread`] before the
    /// pump runs so PEN-side operations that act on "the current attached
    /// task" (spec. §4.5 `migrate_back_npm`) can find it without a pid
    /// lookup.
    static ATTACHED_TASK: std::cell::RefCell<Option<Arc<Task>>> = std::cell::RefCell::new(None);
}

impl Task {
    /// Binds `self` as the current OS thread's attached task.
    pub fn bind_to_current_thread(self: &Arc<Self>) {
        ATTACHED_TASK.with(|cell| *cell.borrow_mut() = Some(self.clone()));
    }

    /// The task bound to the calling OS thread, if any.
    pub fn current() -> Option<Arc<Task>> {
        ATTACHED_TASK.with(|cell| cell.borrow().clone())
    }
}

/// `enter_mig_mode` primitive: causes the attached OS thread to run the pump
/// at its next syscall boundary or signal-return (spec. §4.3). The actual
/// interception is the out-of-scope syscall-interception glue (spec. §1);
/// this crate only owns the queueing side, so the call here is a thin
/// marker left for the external collaborator to drive.
pub fn enter_mig_mode(task: &Task) {
    task.submit(Method::ProcessMsg { wait_for_msgs: false });
}

pub fn classify_exec_failure(err: &ClondikeError) -> PumpStatus {
    match err {
        ClondikeError::Io(_) => PumpStatus::ExecveFailedKillMe,
        _ => PumpStatus::KillMe,
    }
}
