//! Node manager (spec. §4.5): the process-wide singleton for a node's CCN
//! or PEN role. Constructed explicitly by the `ccnd`/`pend` binaries and
//! threaded through the control-FS layer by reference — never a
//! `static`/`lazy_static` global (spec. §9 "Global singletons").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use clondike_ckpt::npm::NpmParams as CkptNpmParams;
use clondike_director::Director;
use clondike_manager::{ManagerPeerLink, MigrationManager, NodeRole};
use clondike_task::{Method, Task, TaskRole};
use clondike_wire::payload::GenericUser;
use clondike_wire::{ClondikeError, Envelope, MessageHeader, MessageId, Result};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ClondikeConfig;
use crate::drive;
use crate::slotvec::SlotVec;
use crate::tasktable::TaskByPid;

/// Starting point for guest pids synthesized on inbound `P_EMIGRATE`
/// (spec. §1 non-goal: actually forking the arriving process is the
/// syscall-interception collaborator's job, out of reach here). Picked well
/// past any real pid range so log output is unambiguous at a glance.
const FIRST_SYNTHETIC_GUEST_PID: i32 = 1_000_000;

/// Parses the `arch:addr` endpoint format used by both `ccn/listen` and
/// `pen/connect` (spec. §6).
fn parse_endpoint(endpoint: &str) -> Result<(&str, &str)> {
    endpoint
        .split_once(':')
        .ok_or_else(|| ClondikeError::InvalidMessage(format!("endpoint must be arch:addr, got {endpoint:?}")))
}

/// Relays a `SIGNAL` message arrived over the wire to the actual local
/// process (spec. §4.3.1's counterpart on the receiving end of
/// `shadow::forward_signal`), the same `nix`-based delivery
/// `clondike_task::pidfd` already uses for peer-loss kills.
fn relay_signal(target_pid: i32, signo: i32) {
    let Ok(signal) = nix::sys::signal::Signal::try_from(signo) else {
        tracing::warn!(signo, "unknown signal number in relayed SIGNAL");
        return;
    };
    if let Err(e) = nix::sys::signal::kill(nix::unistd::Pid::from_raw(target_pid), signal) {
        tracing::warn!(target_pid, error = %e, "failed to relay signal to local process");
    }
}

pub struct CcnNodeManager {
    node_id: u32,
    config: ClondikeConfig,
    director: Arc<dyn Director>,
    managers: RwLock<SlotVec<Arc<MigrationManager>>>,
    tasks: TaskByPid,
    task_managers: RwLock<HashMap<i32, Arc<MigrationManager>>>,
    ready: AtomicBool,
}

impl CcnNodeManager {
    pub fn new(config: ClondikeConfig, director: Arc<dyn Director>) -> Arc<Self> {
        Arc::new(Self {
            node_id: rand::random(),
            managers: RwLock::new(SlotVec::new(config.manager_table_capacity)),
            config,
            director,
            tasks: TaskByPid::default(),
            task_managers: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(true),
        })
    }

    /// `ccn/listen`: adds a listening endpoint, `arch:addr` (spec. §6). Each
    /// accepted connection reserves a slot, runs authentication, and on
    /// success is inserted (spec. §4.5 "Role = CCN").
    pub async fn listen(self: &Arc<Self>, endpoint: &str) -> Result<()> {
        let (_arch, addr) = parse_endpoint(endpoint)?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr, "ccn listening");

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        this.clone().spawn_authenticate(stream);
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
        });
        Ok(())
    }

    fn spawn_authenticate(self: Arc<Self>, stream: TcpStream) {
        tokio::spawn(async move {
            let mgr = MigrationManager::new(
                NodeRole::Ccn,
                self.node_id,
                self.config.local_arch.clone(),
                stream,
                self.config.manager_table_capacity,
                self.director.clone(),
            );
            match mgr.authenticate_as_ccn().await {
                Ok(()) => match self.managers.write().insert(mgr.clone()) {
                    Ok(slot) => {
                        tracing::info!(slot, "peer authenticated");
                        self.clone().spawn_dispatch_loop(mgr);
                    }
                    Err(e) => tracing::warn!(error = %e, "no free manager slot, dropping connection"),
                },
                Err(e) => tracing::warn!(error = %e, "authentication failed"),
            }
        });
    }

    /// Drains the manager-scope messages a CCN-side connection can receive
    /// after authentication (spec. §4.6 "Delivery"): `SIGNAL` relayed to the
    /// local process, `GENERIC_USER` forwarded to the director. `P_EMIGRATE`
    /// never legitimately arrives here — the CCN only ever sends it — so a
    /// stray one is logged and dropped rather than acted on.
    fn spawn_dispatch_loop(self: Arc<Self>, manager: Arc<MigrationManager>) {
        let peer_node_id = (*manager.peer_node_id.lock()).unwrap_or(0);
        manager.spawn_dispatch_loop(move |env| match env.header.id {
            MessageId::Signal => {
                if let Ok(body) = env.decode::<clondike_wire::payload::Signal>() {
                    relay_signal(body.target_pid, body.signo);
                }
            }
            MessageId::GenericUser => {
                if let Ok(body) = env.decode::<GenericUser>() {
                    self.director.generic_user_message_recv(peer_node_id, &body);
                }
            }
            other => tracing::warn!(id = ?other, "unexpected manager-scope message on ccn side"),
        });
    }

    pub fn manager_state(&self, slot: usize) -> Result<clondike_manager::ManagerState> {
        self.managers
            .read()
            .get(slot)
            .map(|m| m.state())
            .ok_or_else(|| ClondikeError::NotFound(format!("manager slot {slot}")))
    }

    /// Creates and registers the Shadow task backing `pid` the first time it
    /// emigrates: a fresh [`Task`], a [`ManagerPeerLink`] bridging its
    /// synchronous pump thread back to `manager`'s async `send`, inserted
    /// into both this node's pid table and `manager`'s own child-task table
    /// (spec. §4.4 routes `Proc`-group replies by `target_pid` through the
    /// latter), and a dedicated pump thread (spec. §4.3).
    fn spawn_shadow_task(&self, pid: i32, manager: Arc<MigrationManager>) -> Result<Arc<Task>> {
        let peer = ManagerPeerLink::new(manager.clone(), tokio::runtime::Handle::current());
        let task = Task::new(TaskRole::Shadow, pid, peer);
        manager.tasks.insert(pid, task.clone())?;
        self.tasks.insert(task.clone());
        self.task_managers.write().insert(pid, manager);
        drive::spawn_pump_thread(task.clone(), self.config.clone(), self.director.clone());
        Ok(task)
    }

    fn emigrate(&self, pid: i32, manager_slot: usize, npm: Option<CkptNpmParams>) -> Result<()> {
        let manager = self
            .managers
            .read()
            .get(manager_slot)
            .cloned()
            .ok_or_else(|| ClondikeError::NotFound(format!("manager {manager_slot}")))?;
        let task = match self.tasks.get(pid) {
            Some(task) => task,
            None => self.spawn_shadow_task(pid, manager)?,
        };
        task.submit(Method::EmigratePpm { npm });
        Ok(())
    }

    /// `ccn/mig/emigrate-ppm-p`: start preemptive emigration of `pid` over
    /// the manager in `manager_slot` (spec. §4.5). The checkpoint path and
    /// exec-time arguments are resolved by the pump handler that ultimately
    /// runs `shadow::emigrate_p`; this entry point only validates the
    /// destination, attaches the task if it isn't already tracked, and
    /// enqueues the method.
    pub fn emigrate_ppm(&self, pid: i32, manager_slot: usize) -> Result<()> {
        self.emigrate(pid, manager_slot, None)
    }

    /// `ccn/mig/emigrate-ppm-p` variant carrying exec-args-only (NPM)
    /// migration parameters (spec. §4.1 "NpmParams present only when the
    /// header flags it as non-preemptive").
    pub fn emigrate_npm(&self, pid: i32, manager_slot: usize, npm_params: CkptNpmParams) -> Result<()> {
        self.emigrate(pid, manager_slot, Some(npm_params))
    }

    /// `ccn/mig/migrate-home`: migrate a PID back (spec. §6).
    pub fn migrate_home_ppm(&self, pid: i32) -> Result<()> {
        let task = self.tasks.get(pid).ok_or_else(|| ClondikeError::NotFound(format!("pid {pid}")))?;
        task.submit(Method::MigrateBackPpm);
        Ok(())
    }

    /// Remote-fork notification (spec. §4.3.3): attach the freshly-forked
    /// child to a new task sharing the parent's peer link and remote pid,
    /// registered the same way [`spawn_shadow_task`] registers an emigrated
    /// one, and given its own pump thread.
    pub fn fork_hook(&self, parent_pid: i32, child_pid: i32) -> Result<()> {
        let parent = self.tasks.get(parent_pid).ok_or_else(|| ClondikeError::NotFound(format!("pid {parent_pid}")))?;
        let manager = self
            .task_managers
            .read()
            .get(&parent_pid)
            .cloned()
            .ok_or_else(|| ClondikeError::NotFound(format!("no manager recorded for pid {parent_pid}")))?;
        let child = clondike_task::postfork::fresh_child_task(&parent, child_pid);
        manager.tasks.insert(child_pid, child.clone())?;
        self.tasks.insert(child.clone());
        self.task_managers.write().insert(child_pid, manager);
        drive::spawn_pump_thread(child, self.config.clone(), self.director.clone());
        Ok(())
    }

    /// `GENERIC_USER` forwarding on the manager in `slot` (spec. §4.5).
    pub fn send_generic_user_message(&self, slot: usize, payload: Vec<u8>) -> Result<()> {
        let manager = self
            .managers
            .read()
            .get(slot)
            .cloned()
            .ok_or_else(|| ClondikeError::NotFound(format!("manager {slot}")))?;
        let env = Envelope::encode(MessageHeader::mgr_async(MessageId::GenericUser), &GenericUser { payload })?;
        tokio::spawn(async move {
            if let Err(e) = manager.send(&env).await {
                tracing::warn!(error = %e, "failed to send generic user message");
            }
        });
        Ok(())
    }

    /// Teardown (spec. §4.5 "Teardown"): compare-exchanges the ready flag
    /// from `true` to `false` so only one caller actually tears down, then
    /// poll-waits for every manager to drain.
    pub async fn shutdown(&self) {
        if self.ready.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        for (_slot, manager) in self.managers.read().iter() {
            let _ = manager.begin_shutdown(|_task| {});
        }
        loop {
            let drained = self.managers.read().iter().all(|(_, m)| m.tasks.is_empty());
            if drained {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

pub struct PenNodeManager {
    node_id: u32,
    config: ClondikeConfig,
    director: Arc<dyn Director>,
    managers: RwLock<SlotVec<Arc<MigrationManager>>>,
    connected_endpoints: RwLock<std::collections::HashSet<String>>,
    tasks: TaskByPid,
    next_guest_pid: AtomicI32,
}

impl PenNodeManager {
    pub fn new(config: ClondikeConfig, director: Arc<dyn Director>) -> Arc<Self> {
        Arc::new(Self {
            node_id: rand::random(),
            managers: RwLock::new(SlotVec::new(config.manager_table_capacity)),
            config,
            director,
            connected_endpoints: RwLock::new(std::collections::HashSet::new()),
            tasks: TaskByPid::default(),
            next_guest_pid: AtomicI32::new(FIRST_SYNTHETIC_GUEST_PID),
        })
    }

    /// `pen/connect`: connects outbound to a CCN, refusing a duplicate
    /// connection to the same peer endpoint (spec. §4.5 "Role = PEN").
    pub async fn connect(self: &Arc<Self>, endpoint: &str, auth_data: Vec<u8>) -> Result<usize> {
        {
            let mut connected = self.connected_endpoints.write();
            if !connected.insert(endpoint.to_string()) {
                return Err(ClondikeError::InvalidMessage(format!("already connected to {endpoint}")));
            }
        }

        let (_arch, addr) = parse_endpoint(endpoint)?;
        let stream = match TcpStream::connect(addr).await {
            Ok(s) => s,
            Err(e) => {
                self.connected_endpoints.write().remove(endpoint);
                return Err(e.into());
            }
        };

        let mgr = MigrationManager::new(
            NodeRole::Pen,
            self.node_id,
            self.config.local_arch.clone(),
            stream,
            self.config.manager_table_capacity,
            self.director.clone(),
        );
        if let Err(e) = mgr.authenticate_as_pen(auth_data).await {
            self.connected_endpoints.write().remove(endpoint);
            return Err(e);
        }
        self.director.node_connected(self.node_id, &self.config.local_arch);
        let slot = self.managers.write().insert(mgr.clone())?;
        self.clone().spawn_dispatch_loop(mgr);
        Ok(slot)
    }

    /// Drains the manager-scope messages a PEN-side connection receives
    /// after authentication (spec. §4.6 "Delivery"): `P_EMIGRATE` attaches a
    /// fresh Guest task with a synthetic local pid and hands the envelope to
    /// its pump (`guest::handle_p_emigrate` runs from there), `SIGNAL` is
    /// relayed locally, `GENERIC_USER` goes to the director.
    fn spawn_dispatch_loop(self: Arc<Self>, manager: Arc<MigrationManager>) {
        let rt = tokio::runtime::Handle::current();
        let dispatch_manager = manager.clone();
        let peer_node_id = (*manager.peer_node_id.lock()).unwrap_or(0);
        manager.spawn_dispatch_loop(move |env| match env.header.id {
            MessageId::PEmigrate => self.attach_guest_task(&dispatch_manager, env, &rt),
            MessageId::Signal => {
                if let Ok(body) = env.decode::<clondike_wire::payload::Signal>() {
                    relay_signal(body.target_pid, body.signo);
                }
            }
            MessageId::GenericUser => {
                if let Ok(body) = env.decode::<GenericUser>() {
                    self.director.generic_user_message_recv(peer_node_id, &body);
                }
            }
            other => tracing::warn!(id = ?other, "unexpected manager-scope message on pen side"),
        });
    }

    fn attach_guest_task(&self, manager: &Arc<MigrationManager>, env: Envelope, rt: &tokio::runtime::Handle) {
        let local_pid = self.next_guest_pid.fetch_add(1, Ordering::SeqCst);
        let peer = ManagerPeerLink::new(manager.clone(), rt.clone());
        let task = Task::new(TaskRole::Guest, local_pid, peer);
        if let Err(e) = manager.tasks.insert(local_pid, task.clone()) {
            tracing::warn!(error = %e, "failed to register arriving guest task");
            return;
        }
        self.tasks.insert(task.clone());
        drive::spawn_pump_thread(task.clone(), self.config.clone(), self.director.clone());
        task.deliver(env);
        task.submit(Method::ProcessMsg { wait_for_msgs: true });
    }

    /// `pen/nodes/<n>/migrate-home-all`: asks every child task on manager
    /// `slot` to migrate home (spec. §6).
    pub fn migrate_home_all(&self, slot: usize) -> Result<()> {
        let managers = self.managers.read();
        let manager = managers.get(slot).ok_or_else(|| ClondikeError::NotFound(format!("manager {slot}")))?;
        for task in manager.tasks.all() {
            task.submit(Method::MigrateBackPpm);
        }
        Ok(())
    }

    /// `migrate_back_npm`: operates on the current OS thread's attached
    /// task (spec. §4.5 "Role = PEN").
    pub fn migrate_back_npm(&self, npm_params: CkptNpmParams) -> Result<()> {
        let task = Task::current().ok_or_else(|| ClondikeError::NotFound("no attached task on this thread".into()))?;
        task.submit(Method::MigrateBackNpm { npm: npm_params });
        Ok(())
    }

    pub fn manager_state(&self, slot: usize) -> Result<clondike_manager::ManagerState> {
        self.managers
            .read()
            .get(slot)
            .map(|m| m.state())
            .ok_or_else(|| ClondikeError::NotFound(format!("manager slot {slot}")))
    }
}
