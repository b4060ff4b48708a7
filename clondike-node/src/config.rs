//! Daemon-wide configuration (ambient, spec. §1 workspace shape). A plain
//! serde struct passed around by value, the way `wormhole::model::WormholeConfig`
//! is — no global/lazy-static config singleton.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ClondikeConfig {
    /// Directory checkpoint files are written to and read from on restart
    /// (spec. §3 checkpoint file naming convention).
    pub checkpoint_dir: String,

    /// Capacity shared by the node manager's manager slot vector and each
    /// manager's child-task table (spec. §3 "bounded slot vector").
    pub manager_table_capacity: usize,

    /// This node's architecture tag, sent during authentication.
    pub local_arch: String,
}

impl Default for ClondikeConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: "/home/clondike".to_string(),
            manager_table_capacity: 64,
            local_arch: std::env::consts::ARCH.to_string(),
        }
    }
}

impl ClondikeConfig {
    pub fn checkpoint_path(&self, comm: &str, pid: i32, jiffies: u64) -> String {
        format!("{}/{}", self.checkpoint_dir, clondike_ckpt::restart::checkpoint_file_name(comm, pid, jiffies))
    }
}
