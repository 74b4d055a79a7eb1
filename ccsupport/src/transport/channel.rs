//! In-memory stream pair used for in-process chaincodes and tests.

use async_trait::async_trait;
use ccsupport_shared::ChaincodeMessage;
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use tokio::sync::{Mutex, mpsc};

use super::ChaincodeStream;

const DEFAULT_CAPACITY: usize = 64;

/// One end of an in-memory duplex stream.
///
/// Dropping an end closes the stream: the other end's `recv` returns `None`
/// and its `send` fails.
pub struct ChannelStream {
    tx: mpsc::Sender<ChaincodeMessage>,
    rx: Mutex<mpsc::Receiver<ChaincodeMessage>>,
}

impl ChannelStream {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(a_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }
}

#[async_trait]
impl ChaincodeStream for ChannelStream {
    async fn send(&self, msg: ChaincodeMessage) -> ChaincodeResult<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ChaincodeError::StreamClosed {
                reason: "remote end dropped".into(),
            })
    }

    async fn recv(&self) -> ChaincodeResult<Option<ChaincodeMessage>> {
        Ok(self.rx.lock().await.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsupport_shared::MessageKind;

    #[tokio::test]
    async fn messages_cross_between_ends() {
        let (peer, chaincode) = ChannelStream::pair();

        peer.send(ChaincodeMessage::control(MessageKind::Keepalive))
            .await
            .unwrap();
        let received = chaincode.recv().await.unwrap().unwrap();
        assert_eq!(received.message_kind().unwrap(), MessageKind::Keepalive);
    }

    #[tokio::test]
    async fn dropping_one_end_closes_the_other() {
        let (peer, chaincode) = ChannelStream::pair();
        drop(chaincode);

        assert_eq!(peer.recv().await.unwrap(), None);
        assert!(matches!(
            peer.send(ChaincodeMessage::control(MessageKind::Ready)).await,
            Err(ChaincodeError::StreamClosed { .. })
        ));
    }
}
