//! Length-delimited protobuf frames over any byte stream.

use async_trait::async_trait;
use ccsupport_shared::ChaincodeMessage;
use ccsupport_shared::constants::MAX_MESSAGE_SIZE;
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::ChaincodeStream;

type Transport<T> = Framed<T, LengthDelimitedCodec>;

/// [`ChaincodeStream`] over a socket or any other `AsyncRead + AsyncWrite`.
///
/// Each message is one frame: a 4-byte big-endian length followed by the
/// protobuf encoding.
pub struct FramedStream<T> {
    sink: Mutex<SplitSink<Transport<T>, Bytes>>,
    stream: Mutex<SplitStream<Transport<T>>>,
}

impl<T> FramedStream<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(io: T) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_MESSAGE_SIZE)
            .new_codec();
        let (sink, stream) = Framed::new(io, codec).split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl<T> ChaincodeStream for FramedStream<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&self, msg: ChaincodeMessage) -> ChaincodeResult<()> {
        let frame = Bytes::from(msg.encode_to_vec());
        self.sink
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| ChaincodeError::StreamClosed {
                reason: format!("send failed: {}", e),
            })
    }

    async fn recv(&self) -> ChaincodeResult<Option<ChaincodeMessage>> {
        match self.stream.lock().await.next().await {
            None => Ok(None),
            Some(Ok(frame)) => Ok(Some(ChaincodeMessage::decode(frame.as_ref())?)),
            Some(Err(e)) => Err(ChaincodeError::Transport(format!(
                "failed to read frame: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsupport_shared::MessageKind;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(4096);
        let peer = FramedStream::new(a);
        let chaincode = FramedStream::new(b);

        let msg = ChaincodeMessage::new(MessageKind::Transaction, "tx1", "ch1", b"args".to_vec());
        peer.send(msg.clone()).await.unwrap();

        assert_eq!(chaincode.recv().await.unwrap(), Some(msg));
    }

    #[tokio::test]
    async fn closed_pipe_ends_the_stream() {
        let (a, b) = tokio::io::duplex(64);
        let peer = FramedStream::new(a);
        drop(b);

        assert_eq!(peer.recv().await.unwrap(), None);
    }
}
