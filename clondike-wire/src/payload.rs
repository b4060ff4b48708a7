//! Payload bodies for each [`crate::message::MessageId`] (spec. §4.6 table).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authenticate {
    pub peer_node_id: u32,
    pub arch: String,
    pub opaque_auth_data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateResp {
    pub node_id: u32,
    pub arch: String,
    pub result_code: i32,
    pub mount_params: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PEmigrate {
    pub src_pid: i32,
    pub exec_name: String,
    pub ckpt_path: String,
    pub uid: u32,
    pub gid: u32,
    pub fsuid: u32,
    pub fsgid: u32,
    pub npm: Option<NpmParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpmParams {
    pub argv: Vec<String>,
    pub envp: Vec<String>,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestStarted {
    pub remote_pid: i32,
    pub guest_pid: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PpmMigrBackShadowReq {
    pub target_remote_pid: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PpmMigrBackGuestReq {
    pub ckpt_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exit {
    pub remote_pid: i32,
    pub code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VforkDone {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub target_pid: i32,
    pub signo: i32,
    pub code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericUser {
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rpc {
    pub syscall_number: i64,
    pub args: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResp {
    pub ret: i64,
}
