//! Length-framed, typed wire messages with transaction IDs and error flags
//! (spec. §4.6). Framing mirrors `wormhole-attach`'s `protocol::Message`:
//! a `u32` big-endian length prefix around a `bincode`-serialized payload.

use std::io::{Read, Write};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ClondikeError, Result};

/// Sentinel transaction id for async messages (spec. §4.6).
pub const TRANSACTION_ID_INVAL: u32 = u32::MAX;

/// High bit set on `id` to mark an error response (spec. §6 "Wire protocol").
pub const ERR_FLAG: u32 = 0x8000_0000;

/// Whether a message is routed to a task's `msg_queue` or to the owning
/// manager's own `msg_queue` (spec. §4.6 delivery rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Proc,
    Mgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageId {
    Authenticate = 1,
    AuthenticateResp = 2,
    PEmigrate = 3,
    GuestStarted = 4,
    PpmMigrBackShadowReq = 5,
    PpmMigrBackGuestReq = 6,
    Exit = 7,
    VforkDone = 8,
    Signal = 9,
    GenericUser = 10,
    Rpc = 11,
    RpcResp = 12,
}

impl MessageId {
    pub fn group(self) -> Group {
        match self {
            MessageId::Authenticate
            | MessageId::AuthenticateResp
            | MessageId::PEmigrate
            | MessageId::Signal
            | MessageId::GenericUser => Group::Mgr,
            MessageId::GuestStarted
            | MessageId::PpmMigrBackShadowReq
            | MessageId::PpmMigrBackGuestReq
            | MessageId::Exit
            | MessageId::VforkDone
            | MessageId::Rpc
            | MessageId::RpcResp => Group::Proc,
        }
    }

    fn from_raw(raw: u32) -> Result<Self> {
        Ok(match raw {
            1 => MessageId::Authenticate,
            2 => MessageId::AuthenticateResp,
            3 => MessageId::PEmigrate,
            4 => MessageId::GuestStarted,
            5 => MessageId::PpmMigrBackShadowReq,
            6 => MessageId::PpmMigrBackGuestReq,
            7 => MessageId::Exit,
            8 => MessageId::VforkDone,
            9 => MessageId::Signal,
            10 => MessageId::GenericUser,
            11 => MessageId::Rpc,
            12 => MessageId::RpcResp,
            other => return Err(ClondikeError::InvalidMessage(format!("unknown id {other}"))),
        })
    }
}

/// Sentinel `target_pid` for `Mgr`-group messages, which have no per-task
/// destination (spec. §4.6 "Delivery").
pub const NO_TARGET_PID: i32 = -1;

/// Fixed header in front of every message: `{id, flags, transaction_id}`,
/// plus the destination-pid routing tag the manager's decoder uses for
/// `Proc`-group delivery (spec. §4.4 "routed by destination PID after
/// verifying that the task belongs to this manager").
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub id: MessageId,
    pub is_error: bool,
    pub transaction_id: u32,
    pub target_pid: i32,
}

impl MessageHeader {
    pub fn request(id: MessageId, transaction_id: u32, target_pid: i32) -> Self {
        Self { id, is_error: false, transaction_id, target_pid }
    }

    pub fn async_msg(id: MessageId, target_pid: i32) -> Self {
        Self { id, is_error: false, transaction_id: TRANSACTION_ID_INVAL, target_pid }
    }

    pub fn error(id: MessageId, transaction_id: u32, target_pid: i32) -> Self {
        Self { id, is_error: true, transaction_id, target_pid }
    }

    /// Manager-group request, with no per-task destination.
    pub fn mgr_request(id: MessageId, transaction_id: u32) -> Self {
        Self::request(id, transaction_id, NO_TARGET_PID)
    }

    /// Manager-group async message, with no per-task destination.
    pub fn mgr_async(id: MessageId) -> Self {
        Self::async_msg(id, NO_TARGET_PID)
    }

    fn raw_id(&self) -> u32 {
        let base = self.id as u32;
        if self.is_error { base | ERR_FLAG } else { base }
    }

    fn from_raw(raw_id: u32, transaction_id: u32, target_pid: i32) -> Result<Self> {
        let is_error = raw_id & ERR_FLAG != 0;
        let id = MessageId::from_raw(raw_id & !ERR_FLAG)?;
        Ok(Self { id, is_error, transaction_id, target_pid })
    }
}

/// A fully decoded message: header plus raw (still bincode-encoded) payload
/// bytes. Kept as bytes at this layer so the transaction table and the
/// manager's dispatcher don't need to know every payload type; callers
/// decode with [`Envelope::decode`].
#[derive(Debug, Clone)]
pub struct Envelope {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn encode<T: Serialize>(header: MessageHeader, payload: &T) -> Result<Self> {
        let payload = bincode::serialize(payload)
            .map_err(|e| ClondikeError::InvalidMessage(e.to_string()))?;
        Ok(Self { header, payload })
    }

    pub fn encode_error(id: MessageId, transaction_id: u32, target_pid: i32, errno: i32) -> Result<Self> {
        Self::encode(MessageHeader::error(id, transaction_id, target_pid), &errno)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        bincode::deserialize(&self.payload).map_err(|e| ClondikeError::InvalidMessage(e.to_string()))
    }

    pub fn error_code(&self) -> Result<i32> {
        self.decode()
    }

    pub fn write_to_sync(&self, mut stream: impl Write) -> Result<()> {
        let mut buf = Vec::with_capacity(4 + 4 + 4 + 4 + self.payload.len());
        buf.extend_from_slice(&self.header.raw_id().to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes()); // reserved flags word
        buf.extend_from_slice(&self.header.transaction_id.to_be_bytes());
        buf.extend_from_slice(&self.header.target_pid.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let len_bytes = u32::try_from(buf.len())
            .map_err(|_| ClondikeError::InvalidMessage("message too large".into()))?
            .to_be_bytes();
        stream.write_all(&len_bytes)?;
        stream.write_all(&buf)?;
        Ok(())
    }

    pub fn read_from_sync(mut stream: impl Read) -> Result<Self> {
        let len = read_u32_sync(&mut stream)? as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body)?;
        Self::parse_body(&body)
    }

    pub async fn write_to(&self, stream: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
        let mut buf = Vec::with_capacity(4 + 4 + 4 + 4 + self.payload.len());
        buf.extend_from_slice(&self.header.raw_id().to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&self.header.transaction_id.to_be_bytes());
        buf.extend_from_slice(&self.header.target_pid.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let len_bytes = u32::try_from(buf.len())
            .map_err(|_| ClondikeError::InvalidMessage("message too large".into()))?
            .to_be_bytes();
        stream.write_all(&len_bytes).await?;
        stream.write_all(&buf).await?;
        Ok(())
    }

    pub async fn read_from(stream: &mut (impl AsyncRead + Unpin)) -> Result<Self> {
        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        Self::parse_body(&body)
    }

    fn parse_body(body: &[u8]) -> Result<Self> {
        if body.len() < 16 {
            return Err(ClondikeError::InvalidMessage("short message".into()));
        }
        let raw_id = u32::from_be_bytes(body[0..4].try_into().unwrap());
        // body[4..8] is the reserved flags word.
        let transaction_id = u32::from_be_bytes(body[8..12].try_into().unwrap());
        let target_pid = i32::from_be_bytes(body[12..16].try_into().unwrap());
        let header = MessageHeader::from_raw(raw_id, transaction_id, target_pid)?;
        Ok(Self { header, payload: body[16..].to_vec() })
    }
}

fn read_u32_sync(stream: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Ping {
        pid: i32,
    }

    #[test]
    fn round_trips_request() {
        let env = Envelope::encode(MessageHeader::request(MessageId::PEmigrate, 7, 1234), &Ping { pid: 1234 }).unwrap();
        let mut buf = Vec::new();
        env.write_to_sync(&mut buf).unwrap();

        let decoded = Envelope::read_from_sync(&buf[..]).unwrap();
        assert_eq!(decoded.header.id, MessageId::PEmigrate);
        assert_eq!(decoded.header.transaction_id, 7);
        assert_eq!(decoded.header.target_pid, 1234);
        assert!(!decoded.header.is_error);
        assert_eq!(decoded.decode::<Ping>().unwrap(), Ping { pid: 1234 });
    }

    #[test]
    fn round_trips_async_message() {
        let env = Envelope::encode(MessageHeader::mgr_async(MessageId::Exit), &42i32).unwrap();
        let mut buf = Vec::new();
        env.write_to_sync(&mut buf).unwrap();
        let decoded = Envelope::read_from_sync(&buf[..]).unwrap();
        assert_eq!(decoded.header.transaction_id, TRANSACTION_ID_INVAL);
        assert_eq!(decoded.header.target_pid, NO_TARGET_PID);
        assert_eq!(decoded.decode::<i32>().unwrap(), 42);
    }

    #[test]
    fn round_trips_error_response() {
        let env = Envelope::encode_error(MessageId::GuestStarted, 3, 77, -libc::ENOEXEC).unwrap();
        let mut buf = Vec::new();
        env.write_to_sync(&mut buf).unwrap();
        let decoded = Envelope::read_from_sync(&buf[..]).unwrap();
        assert!(decoded.header.is_error);
        assert_eq!(decoded.header.id, MessageId::GuestStarted);
        assert_eq!(decoded.header.target_pid, 77);
        assert_eq!(decoded.error_code().unwrap(), -libc::ENOEXEC);
    }

    #[test]
    fn group_assignment_matches_table() {
        assert_eq!(MessageId::Authenticate.group(), Group::Mgr);
        assert_eq!(MessageId::PEmigrate.group(), Group::Mgr);
        assert_eq!(MessageId::Signal.group(), Group::Mgr);
        assert_eq!(MessageId::GenericUser.group(), Group::Mgr);
        assert_eq!(MessageId::GuestStarted.group(), Group::Proc);
        assert_eq!(MessageId::Exit.group(), Group::Proc);
        assert_eq!(MessageId::VforkDone.group(), Group::Proc);
        assert_eq!(MessageId::Rpc.group(), Group::Proc);
    }
}
