//! Pending transactions of one handler, keyed by (txid, channel).

use std::collections::HashMap;

use ccsupport_shared::ChaincodeMessage;
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use parking_lot::Mutex;
use tokio::sync::oneshot;

pub(crate) type ResponseSlot = oneshot::Receiver<ChaincodeResult<ChaincodeMessage>>;

type TxKey = (String, String);

#[derive(Default)]
struct ContextsInner {
    pending: HashMap<TxKey, oneshot::Sender<ChaincodeResult<ChaincodeMessage>>>,
    /// Set once the stream ended; no new entries are accepted after that.
    closed: Option<ChaincodeError>,
}

#[derive(Default)]
pub(crate) struct TransactionContexts {
    inner: Mutex<ContextsInner>,
}

impl TransactionContexts {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a pending transaction and return the slot its response will
    /// be delivered to.
    pub(crate) fn create(&self, txid: &str, channel_id: &str) -> ChaincodeResult<ResponseSlot> {
        let mut inner = self.inner.lock();
        if let Some(err) = &inner.closed {
            return Err(err.clone());
        }

        let key = (txid.to_string(), channel_id.to_string());
        if inner.pending.contains_key(&key) {
            return Err(ChaincodeError::DuplicateTransaction {
                txid: txid.to_string(),
                channel_id: channel_id.to_string(),
            });
        }

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(key, tx);
        Ok(rx)
    }

    /// Hand `msg` to the transaction it correlates with.
    ///
    /// Returns the message back when nothing is waiting for it.
    pub(crate) fn deliver(&self, msg: ChaincodeMessage) -> Option<ChaincodeMessage> {
        let key = (msg.txid.clone(), msg.channel_id.clone());
        let slot = self.inner.lock().pending.remove(&key);
        match slot {
            Some(tx) => {
                // a receiver dropped between timeout and removal just loses the reply
                let _ = tx.send(Ok(msg));
                None
            }
            None => Some(msg),
        }
    }

    pub(crate) fn remove(&self, txid: &str, channel_id: &str) -> bool {
        let key = (txid.to_string(), channel_id.to_string());
        self.inner.lock().pending.remove(&key).is_some()
    }

    /// Fail every pending transaction with `err` and refuse new ones.
    /// Returns how many were failed.
    pub(crate) fn close(&self, err: ChaincodeError) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = Some(err.clone());
            inner.pending.drain().map(|(_, tx)| tx).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(err.clone()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

/// Removes a pending entry when dropped, so every exit path of an execute
/// (including a dropped caller future) cleans up after itself.
pub(crate) struct PendingGuard<'a> {
    pub(crate) contexts: &'a TransactionContexts,
    pub(crate) txid: &'a str,
    pub(crate) channel_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.contexts.remove(self.txid, self.channel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsupport_shared::MessageKind;

    fn completed(txid: &str, channel_id: &str) -> ChaincodeMessage {
        ChaincodeMessage::new(MessageKind::Completed, txid, channel_id, Vec::new())
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let contexts = TransactionContexts::new();
        let _slot = contexts.create("tx1", "ch1").unwrap();

        assert!(matches!(
            contexts.create("tx1", "ch1"),
            Err(ChaincodeError::DuplicateTransaction { .. })
        ));
        // same txid on another channel is a different transaction
        assert!(contexts.create("tx1", "ch2").is_ok());
    }

    #[test]
    fn delivery_matches_txid_and_channel() {
        let contexts = TransactionContexts::new();
        let mut slot = contexts.create("tx1", "ch1").unwrap();

        assert!(contexts.deliver(completed("tx1", "ch2")).is_some());
        assert!(contexts.deliver(completed("tx2", "ch1")).is_some());
        assert!(slot.try_recv().is_err());

        assert!(contexts.deliver(completed("tx1", "ch1")).is_none());
        assert_eq!(slot.try_recv().unwrap().unwrap().txid, "tx1");
        assert_eq!(contexts.len(), 0);
    }

    #[test]
    fn close_fails_pending_and_refuses_new() {
        let contexts = TransactionContexts::new();
        let mut a = contexts.create("tx1", "ch1").unwrap();
        let mut b = contexts.create("tx2", "ch1").unwrap();

        let err = ChaincodeError::StreamClosed {
            reason: "eof".into(),
        };
        assert_eq!(contexts.close(err.clone()), 2);

        assert_eq!(a.try_recv().unwrap(), Err(err.clone()));
        assert_eq!(b.try_recv().unwrap(), Err(err.clone()));
        assert_eq!(contexts.create("tx3", "ch1").unwrap_err(), err);
    }

    #[test]
    fn guard_removes_entry() {
        let contexts = TransactionContexts::new();
        let _slot = contexts.create("tx1", "ch1").unwrap();
        {
            let _guard = PendingGuard {
                contexts: &contexts,
                txid: "tx1",
                channel_id: "ch1",
            };
        }
        assert_eq!(contexts.len(), 0);
    }
}
