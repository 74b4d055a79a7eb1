//! Duplex message streams between the peer and a chaincode.
//!
//! A [`ChaincodeStream`] moves whole [`ChaincodeMessage`]s. Sending and
//! receiving take `&self` so one task can block in `recv` while others send.

mod channel;
mod framed;

pub use channel::ChannelStream;
pub use framed::FramedStream;

use async_trait::async_trait;
use ccsupport_shared::ChaincodeMessage;
use ccsupport_shared::errors::ChaincodeResult;

#[async_trait]
pub trait ChaincodeStream: Send + Sync {
    /// Send one message. Fails with `StreamClosed` once the other end is gone.
    ///
    /// Must be cancel-safe: a dropped send either never reaches the stream or
    /// is delivered whole, never as a partial frame.
    async fn send(&self, msg: ChaincodeMessage) -> ChaincodeResult<()>;

    /// Receive the next message, `None` when the other end closed cleanly.
    ///
    /// Must be cancel-safe: dropping the future loses no message.
    async fn recv(&self) -> ChaincodeResult<Option<ChaincodeMessage>>;
}
