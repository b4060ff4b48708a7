//! Per-role pump-method drivers: the closures a task's pump thread actually
//! runs (spec. §4.3). Lives here rather than in `clondike-task` because
//! building an `EmigratePpm` method into a wire request needs `/proc`
//! introspection and checkpoint-path config only the node manager has.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clondike_director::Director;
use clondike_task::{guest, postfork, shadow, Method, PumpStatus, Task, TaskRole};
use clondike_wire::{ClondikeError, Envelope, Result};

use crate::config::ClondikeConfig;
use crate::procinfo;

const PROCESS_MSG_POLL: Duration = Duration::from_millis(100);

/// Spawns the dedicated OS thread that drives `task`'s pump loop end to
/// end, binding the thread first (spec. §5 "one attached thread per task"),
/// the shape `run_pump` itself is grounded on
/// (`wormhole-attach::subreaper::run`'s blocking dispatch loop).
pub fn spawn_pump_thread(
    task: Arc<Task>,
    config: ClondikeConfig,
    director: Arc<dyn Director>,
) -> std::thread::JoinHandle<PumpStatus> {
    let role = task.role;
    std::thread::spawn(move || {
        task.bind_to_current_thread();
        task.run_pump(
            move |t, method| match role {
                TaskRole::Shadow => shadow_handle_method(t, method, &config, director.as_ref()),
                TaskRole::Guest => guest_handle_method(t, method, &config),
            },
            |_t| Ok(None),
        )
    })
}

fn shadow_handle_method(
    task: &Arc<Task>,
    method: Method,
    config: &ClondikeConfig,
    director: &dyn Director,
) -> Result<PumpStatus> {
    match method {
        Method::EmigratePpm { npm } => {
            let desc = procinfo::describe(task.local_pid)?;
            let ckpt_path = config.checkpoint_path(&desc.comm, task.local_pid, desc.start_jiffies);
            shadow::emigrate_p(task, &desc.exec_name, &ckpt_path, desc.ids, npm)
        }
        Method::MigrateBackPpm | Method::MigrateBackNpm { .. } => {
            shadow::migrate_home_ppm(task)?;
            Ok(PumpStatus::KeepPumping)
        }
        Method::ProcessMsg { wait_for_msgs } => process_msg(task, wait_for_msgs, shadow::handle_message),
        Method::Exit { .. } => Ok(PumpStatus::RemoveAndLetMeGo),
        Method::Execve { .. } => on_execve(task, Some(director)),
        Method::SendMessage { msg } => {
            task.peer.send(msg)?;
            Ok(PumpStatus::KeepPumping)
        }
        Method::PostForkSetTid => {
            postfork::announce_shadow_fork(task, task.remote_pid.load(Ordering::SeqCst))?;
            Ok(PumpStatus::KeepPumping)
        }
    }
}

fn guest_handle_method(task: &Arc<Task>, method: Method, config: &ClondikeConfig) -> Result<PumpStatus> {
    match method {
        Method::ProcessMsg { wait_for_msgs } => process_msg(task, wait_for_msgs, guest::handle_message),
        Method::MigrateBackPpm => {
            let desc = procinfo::describe(task.local_pid)?;
            let ckpt_path = config.checkpoint_path(&desc.comm, task.local_pid, desc.start_jiffies);
            guest::migrate_back_ppm(task, &ckpt_path)
        }
        Method::MigrateBackNpm { npm } => {
            let desc = procinfo::describe(task.local_pid)?;
            let ckpt_path = config.checkpoint_path(&desc.comm, task.local_pid, desc.start_jiffies);
            let wire_npm = clondike_wire::payload::NpmParams { filename: npm.filename, argv: npm.argv, envp: npm.envp };
            guest::migrate_back_npm(task, &ckpt_path, wire_npm)
        }
        Method::Exit { code } => guest::handle_exit(task, code),
        Method::Execve { .. } => on_execve(task, None),
        Method::EmigratePpm { .. } => Err(ClondikeError::InvalidMessage("guest tasks never emigrate".into())),
        Method::SendMessage { msg } => {
            task.peer.send(msg)?;
            Ok(PumpStatus::KeepPumping)
        }
        Method::PostForkSetTid => {
            postfork::announce_guest_fork(task, Ok(task.local_pid))?;
            Ok(PumpStatus::KeepPumping)
        }
    }
}

/// `execve` itself is out of this daemon's reach (spec. §1 "syscall
/// interception" is the external collaborator's job); treat scheduling one
/// as an immediately-completed restore and settle into the relay state.
/// Firing `migrated_home` only applies to the shadow side re-establishing
/// residency — a guest arriving for the first time isn't "home".
fn on_execve(task: &Arc<Task>, director: Option<&dyn Director>) -> Result<PumpStatus> {
    tracing::debug!(pid = task.local_pid, "execve scheduled; treating as a completed restore");
    if let Some(director) = director {
        director.migrated_home(task.local_pid);
    }
    task.submit(Method::ProcessMsg { wait_for_msgs: true });
    Ok(PumpStatus::KeepPumping)
}

/// Drains one inbound message (blocking if `wait_for_msgs`) and dispatches
/// it through `handle`, resubmitting `ProcessMsg` to keep relaying as long
/// as the handler doesn't ask to stop (spec. §4.3.1/§4.3.2 "relay state").
fn process_msg(
    task: &Arc<Task>,
    wait_for_msgs: bool,
    handle: impl Fn(&Arc<Task>, &Envelope) -> Result<PumpStatus>,
) -> Result<PumpStatus> {
    let env = if wait_for_msgs { task.recv_msg_timeout(PROCESS_MSG_POLL) } else { task.try_recv_msg() };
    let status = match env {
        Some(env) => handle(task, &env)?,
        None => PumpStatus::KeepPumping,
    };
    if status == PumpStatus::KeepPumping && wait_for_msgs {
        task.submit(Method::ProcessMsg { wait_for_msgs: true });
    }
    Ok(status)
}
