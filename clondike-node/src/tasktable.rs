//! Process-wide pid → task registry backing a node manager's
//! `emigrate_ppm`/`migrate_home_ppm`/`fork_hook` lookups (spec. §4.5). Not
//! itself named by the spec as a distinct component, but required for those
//! operations to resolve a pid to the `Task` that owns it.

use std::collections::HashMap;
use std::sync::Arc;

use clondike_task::Task;
use parking_lot::RwLock;

#[derive(Default)]
pub struct TaskByPid {
    tasks: RwLock<HashMap<i32, Arc<Task>>>,
}

impl TaskByPid {
    pub fn insert(&self, task: Arc<Task>) {
        self.tasks.write().insert(task.local_pid, task);
    }

    pub fn get(&self, pid: i32) -> Option<Arc<Task>> {
        self.tasks.read().get(&pid).cloned()
    }

    pub fn remove(&self, pid: i32) -> Option<Arc<Task>> {
        self.tasks.write().remove(&pid)
    }
}
