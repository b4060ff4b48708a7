//! Child-task table: `Proc`-group messages are routed to the owning task by
//! destination pid after verifying the task belongs to this manager (spec.
//! §4.4). Bounded the same way the node manager bounds its manager slots
//! (§3 "Node manager... bounded slot vector").

use std::collections::HashMap;
use std::sync::Arc;

use clondike_task::Task;
use clondike_wire::{ClondikeError, Result};
use parking_lot::RwLock;

pub struct TaskTable {
    capacity: usize,
    tasks: RwLock<HashMap<i32, Arc<Task>>>,
}

impl TaskTable {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, tasks: RwLock::new(HashMap::new()) }
    }

    pub fn insert(&self, pid: i32, task: Arc<Task>) -> Result<()> {
        let mut tasks = self.tasks.write();
        if tasks.len() >= self.capacity {
            return Err(ClondikeError::ResourceExhausted(format!(
                "child-task table full ({}/{})",
                tasks.len(),
                self.capacity
            )));
        }
        tasks.insert(pid, task);
        Ok(())
    }

    pub fn get(&self, pid: i32) -> Option<Arc<Task>> {
        self.tasks.read().get(&pid).cloned()
    }

    pub fn remove(&self, pid: i32) -> Option<Arc<Task>> {
        self.tasks.write().remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Arc<Task>> {
        self.tasks.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clondike_task::TaskRole;
    use clondike_wire::Envelope;

    struct NullPeer;
    impl clondike_task::PeerLink for NullPeer {
        fn send(&self, _env: Envelope) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn insert_get_remove_roundtrip() {
        let table = TaskTable::new(2);
        let task = Task::new(TaskRole::Shadow, 100, Arc::new(NullPeer));
        table.insert(100, task.clone()).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get(100).is_some());
        assert!(table.remove(100).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn insert_over_capacity_is_rejected() {
        let table = TaskTable::new(1);
        table.insert(1, Task::new(TaskRole::Shadow, 1, Arc::new(NullPeer))).unwrap();
        let err = table.insert(2, Task::new(TaskRole::Shadow, 2, Arc::new(NullPeer))).unwrap_err();
        assert!(matches!(err, ClondikeError::ResourceExhausted(_)));
    }
}
