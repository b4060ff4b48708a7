//! Control-FS surface (spec. §6 "Control surface (key/value)"): the
//! user-visible pseudo-filesystem itself is out of scope (spec. §1); this
//! module implements the namespace dispatch and read/write handlers named
//! in §6 against a node manager, exposed as a pure key/value trait so the
//! actual mount can be bolted on separately — the way `wormhole`'s
//! `RPC_SOCKET` is the transport beneath its own key/value-ish `dctl`
//! commands.

use std::sync::Arc;

use async_trait::async_trait;
use clondike_wire::{ClondikeError, Result};

use crate::node::{CcnNodeManager, PenNodeManager};

#[async_trait]
pub trait ControlSurface: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;
    async fn write(&self, path: &str, value: &str) -> Result<()>;
}

fn not_found(path: &str) -> ClondikeError {
    ClondikeError::NotFound(format!("no control-fs entry at {path}"))
}

fn parse_slot(rest: &str, suffix: &str) -> Result<usize> {
    rest.strip_suffix(suffix)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| not_found(rest))
}

pub struct CcnControlSurface {
    node: Arc<CcnNodeManager>,
}

impl CcnControlSurface {
    pub fn new(node: Arc<CcnNodeManager>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl ControlSurface for CcnControlSurface {
    async fn read(&self, path: &str) -> Result<String> {
        if let Some(rest) = path.strip_prefix("ccn/nodes/") {
            let slot = parse_slot(rest, "/state")?;
            return Ok(format!("{:?}", self.node.manager_state(slot)?));
        }
        Err(not_found(path))
    }

    async fn write(&self, path: &str, value: &str) -> Result<()> {
        match path {
            "ccn/listen" => self.node.listen(value).await,
            "ccn/mig/emigrate-ppm-p" => {
                let (pid, slot) = parse_pid_slot(value)?;
                self.node.emigrate_ppm(pid, slot)
            }
            "ccn/mig/migrate-home" => {
                let pid: i32 = value.parse().map_err(|_| ClondikeError::InvalidMessage(value.to_string()))?;
                self.node.migrate_home_ppm(pid)
            }
            other => Err(not_found(other)),
        }
    }
}

pub struct PenControlSurface {
    node: Arc<PenNodeManager>,
}

impl PenControlSurface {
    pub fn new(node: Arc<PenNodeManager>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl ControlSurface for PenControlSurface {
    async fn read(&self, path: &str) -> Result<String> {
        if let Some(rest) = path.strip_prefix("pen/nodes/") {
            let slot = parse_slot(rest, "/state")?;
            return Ok(format!("{:?}", self.node.manager_state(slot)?));
        }
        Err(not_found(path))
    }

    async fn write(&self, path: &str, value: &str) -> Result<()> {
        if path == "pen/connect" {
            let (endpoint, auth) = match value.split_once('@') {
                Some((endpoint, auth)) => (endpoint, auth.as_bytes().to_vec()),
                None => (value, Vec::new()),
            };
            self.node.connect(endpoint, auth).await?;
            return Ok(());
        }
        if let Some(rest) = path.strip_prefix("pen/nodes/") {
            let slot = parse_slot(rest, "/migrate-home-all")?;
            return self.node.migrate_home_all(slot);
        }
        Err(not_found(path))
    }
}

fn parse_pid_slot(value: &str) -> Result<(i32, usize)> {
    let (pid, slot) = value
        .split_once(',')
        .ok_or_else(|| ClondikeError::InvalidMessage(format!("expected `pid,manager_id`, got {value:?}")))?;
    let pid: i32 = pid.trim().parse().map_err(|_| ClondikeError::InvalidMessage(value.to_string()))?;
    let slot: usize = slot.trim().parse().map_err(|_| ClondikeError::InvalidMessage(value.to_string()))?;
    Ok((pid, slot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pid_and_slot() {
        assert_eq!(parse_pid_slot("123, 4").unwrap(), (123, 4));
        assert!(parse_pid_slot("not-a-pid").is_err());
    }

    #[test]
    fn parses_slot_from_suffixed_path() {
        assert_eq!(parse_slot("2/state", "/state").unwrap(), 2);
        assert!(parse_slot("2/other", "/state").is_err());
    }
}
