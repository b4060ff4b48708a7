//! Transaction table: matches responses to in-flight requests (spec. §3,
//! §4.6 "Transactions", §8 "for every in-flight transaction t ... removed
//! before its completion is signalled and never signalled twice").

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{ClondikeError, Result};
use crate::message::Envelope;

struct Slot {
    // `None` once taken by a completion/cancellation; guards against
    // double-signalling even under a racing timeout + late response.
    tx: Option<oneshot::Sender<Result<Envelope>>>,
}

/// Per-owner (task or manager) slot vector keyed by a locally unique id,
/// guarded by a single lock (spec. §5 "lock-per-table; the producer inserts
/// then sends; the consumer matches then removes").
#[derive(Default)]
pub struct TransactionTable {
    next_id: Mutex<u32>,
    slots: Mutex<HashMap<u32, Slot>>,
}

/// Held by the sender of a request; `recv()` blocks (async) until a
/// matching response arrives, the transaction is cancelled, or it times out.
pub struct TransactionHandle {
    pub id: u32,
    rx: oneshot::Receiver<Result<Envelope>>,
}

impl TransactionHandle {
    pub async fn recv(self) -> Result<Envelope> {
        self.rx.await.unwrap_or(Err(ClondikeError::PeerLost))
    }

    pub async fn recv_timeout(self, dur: std::time::Duration) -> Result<Envelope> {
        match tokio::time::timeout(dur, self.rx).await {
            Ok(inner) => inner.unwrap_or(Err(ClondikeError::PeerLost)),
            Err(_) => Err(ClondikeError::TransactionTimeout),
        }
    }
}

impl TransactionTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a transaction before `send_and_receive`, inserting it into the
    /// sender's table keyed by a locally unique id (spec. §4.6).
    pub fn begin(&self) -> TransactionHandle {
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id = next_id.wrapping_add(1);
        drop(next_id);

        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(id, Slot { tx: Some(tx) });
        TransactionHandle { id, rx }
    }

    /// Response delivery fulfils the transaction's completion; removes the
    /// slot first so a duplicate/late response can never signal twice.
    pub fn complete(&self, id: u32, envelope: Envelope) -> bool {
        self.finish(id, Ok(envelope))
    }

    /// Timeouts and signal interruption cancel the transaction and wake the
    /// sender with an error (spec. §4.6).
    pub fn cancel(&self, id: u32, err: ClondikeError) -> bool {
        self.finish(id, Err(err))
    }

    fn finish(&self, id: u32, result: Result<Envelope>) -> bool {
        let slot = self.slots.lock().remove(&id);
        match slot {
            Some(mut slot) => {
                if let Some(tx) = slot.tx.take() {
                    let _ = tx.send(result);
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.slots.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageHeader, MessageId};

    #[tokio::test]
    async fn completes_exactly_once() {
        let table = TransactionTable::new();
        let handle = table.begin();
        let id = handle.id;

        let env = Envelope::encode(MessageHeader::request(MessageId::GuestStarted, id, 7), &7i32).unwrap();
        assert!(table.complete(id, env));
        // Second completion attempt for the same (now-removed) id is a no-op,
        // never double-signals.
        assert!(!table.complete(id, Envelope::encode(MessageHeader::request(MessageId::GuestStarted, id, 7), &7i32).unwrap()));

        let got = handle.recv().await.unwrap();
        assert_eq!(got.decode::<i32>().unwrap(), 7);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn cancel_wakes_sender_with_error() {
        let table = TransactionTable::new();
        let handle = table.begin();
        table.cancel(handle.id, ClondikeError::TransactionTimeout);
        let err = handle.recv().await.unwrap_err();
        assert!(matches!(err, ClondikeError::TransactionTimeout));
    }

    #[tokio::test]
    async fn timeout_without_response_errors() {
        let table = TransactionTable::new();
        let handle = table.begin();
        let err = handle
            .recv_timeout(std::time::Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClondikeError::TransactionTimeout));
    }
}
