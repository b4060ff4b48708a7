//! `/proc` introspection filling in the exec name, credentials, and
//! checkpoint-naming fields a control-surface emigration request doesn't
//! itself carry (spec. §6: `ccn/mig/emigrate-ppm-p`'s payload is just
//! `pid,manager_id`). The shadow task's pump handler reads these once per
//! emigration, the way the original gathers the same facts from the task
//! struct it already has in-kernel.

use std::fs;

use clondike_task::shadow::ProcessIds;
use clondike_wire::{ClondikeError, Result};

pub struct ProcessDescriptor {
    pub exec_name: String,
    pub comm: String,
    pub start_jiffies: u64,
    pub ids: ProcessIds,
}

pub fn describe(pid: i32) -> Result<ProcessDescriptor> {
    Ok(ProcessDescriptor {
        exec_name: exe_path(pid)?,
        comm: comm(pid)?,
        start_jiffies: start_jiffies(pid)?,
        ids: credentials(pid)?,
    })
}

fn exe_path(pid: i32) -> Result<String> {
    let link = fs::read_link(format!("/proc/{pid}/exe")).map_err(ClondikeError::Io)?;
    link.to_str()
        .map(str::to_string)
        .ok_or_else(|| ClondikeError::InvalidMessage(format!("non-utf8 exe path for pid {pid}")))
}

fn comm(pid: i32) -> Result<String> {
    let raw = fs::read_to_string(format!("/proc/{pid}/comm")).map_err(ClondikeError::Io)?;
    Ok(raw.trim_end().to_string())
}

/// Field 22 of `/proc/<pid>/stat` (start time in clock ticks since boot):
/// the closest portable stand-in for the original's raw `jiffies` stamp.
fn start_jiffies(pid: i32) -> Result<u64> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).map_err(ClondikeError::Io)?;
    let after_comm = stat.rfind(')').ok_or_else(|| ClondikeError::InvalidMessage("malformed /proc/*/stat".into()))?;
    // Fields after the closing paren start at `state` (field 3); `starttime`
    // is field 22 overall, index 19 in this post-comm split.
    stat[after_comm + 1..]
        .split_whitespace()
        .nth(19)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ClondikeError::InvalidMessage("missing starttime field".into()))
}

fn credentials(pid: i32) -> Result<ProcessIds> {
    let status = fs::read_to_string(format!("/proc/{pid}/status")).map_err(ClondikeError::Io)?;
    let (uid, fsuid) = parse_id_line(&status, "Uid:")?;
    let (gid, fsgid) = parse_id_line(&status, "Gid:")?;
    Ok(ProcessIds { uid, gid, fsuid, fsgid })
}

/// Parses a `Uid:`/`Gid:` line's four whitespace-separated fields (real,
/// effective, saved, filesystem), returning (real, filesystem).
fn parse_id_line(status: &str, prefix: &str) -> Result<(u32, u32)> {
    let line = status
        .lines()
        .find(|line| line.starts_with(prefix))
        .ok_or_else(|| ClondikeError::InvalidMessage(format!("missing {prefix} line")))?;
    let mut fields = line[prefix.len()..].split_whitespace();
    let real: u32 = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ClondikeError::InvalidMessage(line.to_string()))?;
    fields.next();
    fields.next();
    let fs: u32 = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ClondikeError::InvalidMessage(line.to_string()))?;
    Ok((real, fs))
}
