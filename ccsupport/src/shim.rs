//! Chaincode side of the protocol.
//!
//! [`start`] registers a [`Chaincode`] with the peer over a stream and serves
//! INIT and TRANSACTION requests until the stream ends. Requests are served
//! concurrently, each on its own task; dropping the session aborts them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ccsupport_shared::constants::status;
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use ccsupport_shared::{
    ChaincodeEvent, ChaincodeId, ChaincodeInput, ChaincodeKey, ChaincodeMessage, MessageKind,
    Response,
};
use prost::Message;
use tokio::task::JoinSet;

use crate::transport::ChaincodeStream;

/// Request context handed to a chaincode.
#[derive(Debug, Clone, Default)]
pub struct ChaincodeStub {
    pub txid: String,
    pub channel_id: String,
    pub args: Vec<Vec<u8>>,
    pub decorations: HashMap<String, Vec<u8>>,
    event: Option<ChaincodeEvent>,
}

impl ChaincodeStub {
    fn from_request(msg: &ChaincodeMessage, input: ChaincodeInput) -> Self {
        Self {
            txid: msg.txid.clone(),
            channel_id: msg.channel_id.clone(),
            args: input.args,
            decorations: input.decorations,
            event: None,
        }
    }

    /// Function name and remaining arguments as strings.
    pub fn function_and_parameters(&self) -> (String, Vec<String>) {
        let mut args = self
            .args
            .iter()
            .map(|arg| String::from_utf8_lossy(arg).into_owned());
        let function = args.next().unwrap_or_default();
        (function, args.collect())
    }

    /// Attach an event to the response. The peer stamps chaincode id and txid.
    pub fn set_event(&mut self, name: impl Into<String>, payload: Vec<u8>) {
        self.event = Some(ChaincodeEvent {
            event_name: name.into(),
            payload,
            ..Default::default()
        });
    }
}

/// Business logic of a chaincode.
///
/// A response with status at or above 400 is reported to the peer as ERROR
/// carrying the response message.
#[async_trait]
pub trait Chaincode: Send + Sync {
    async fn init(&self, stub: &mut ChaincodeStub) -> Response;

    async fn invoke(&self, stub: &mut ChaincodeStub) -> Response;
}

/// Register `chaincode` as `key` over `stream` and serve it.
///
/// Returns `Ok(())` when the peer closes the stream, or the error that ended
/// the session.
pub async fn start<S>(stream: S, key: ChaincodeKey, chaincode: Arc<dyn Chaincode>) -> ChaincodeResult<()>
where
    S: ChaincodeStream + 'static,
{
    let stream: Arc<dyn ChaincodeStream> = Arc::new(stream);

    let id = ChaincodeId {
        name: key.to_string(),
        ..Default::default()
    };
    stream
        .send(ChaincodeMessage::new(MessageKind::Register, "", "", id.encode_to_vec()))
        .await?;
    tracing::debug!(chaincode = %key, "Sent REGISTER");

    let mut ready = false;
    let mut requests = JoinSet::new();
    while let Some(msg) = stream.recv().await? {
        while requests.try_join_next().is_some() {}
        match msg.message_kind()? {
            MessageKind::Registered => {
                tracing::debug!(chaincode = %key, "Registered with peer");
            }
            MessageKind::Ready => {
                ready = true;
                tracing::debug!(chaincode = %key, "Peer reports ready");
            }
            MessageKind::Error if !ready => {
                return Err(ChaincodeError::Protocol(format!(
                    "peer rejected registration: {}",
                    msg.payload_text()
                )));
            }
            kind @ (MessageKind::Init | MessageKind::Transaction) if ready => {
                let stream = Arc::clone(&stream);
                let chaincode = Arc::clone(&chaincode);
                requests.spawn(async move {
                    let reply = serve_request(chaincode.as_ref(), kind, &msg).await;
                    if let Err(e) = stream.send(reply).await {
                        tracing::debug!(txid = %msg.txid, error = %e, "Failed to send response");
                    }
                });
            }
            MessageKind::Keepalive => {}
            other => {
                tracing::warn!(chaincode = %key, kind = %other, ready, "Unexpected message from peer");
            }
        }
    }
    Ok(())
}

async fn serve_request(chaincode: &dyn Chaincode, kind: MessageKind, msg: &ChaincodeMessage) -> ChaincodeMessage {
    let input = match ChaincodeInput::decode(msg.payload.as_slice()) {
        Ok(input) => input,
        Err(e) => {
            return ChaincodeMessage::new(
                MessageKind::Error,
                &msg.txid,
                &msg.channel_id,
                format!("failed to unmarshal input: {}", e).into_bytes(),
            );
        }
    };

    let mut stub = ChaincodeStub::from_request(msg, input);
    let response = match kind {
        MessageKind::Init => chaincode.init(&mut stub).await,
        _ => chaincode.invoke(&mut stub).await,
    };

    if response.status >= status::ERROR_THRESHOLD {
        return ChaincodeMessage::new(
            MessageKind::Error,
            &msg.txid,
            &msg.channel_id,
            response.message.into_bytes(),
        );
    }

    let mut reply = ChaincodeMessage::new(
        MessageKind::Completed,
        &msg.txid,
        &msg.channel_id,
        response.encode_to_vec(),
    );
    reply.chaincode_event = stub.event;
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelStream;

    struct Divider;

    #[async_trait]
    impl Chaincode for Divider {
        async fn init(&self, _stub: &mut ChaincodeStub) -> Response {
            Response::success(Vec::new())
        }

        async fn invoke(&self, stub: &mut ChaincodeStub) -> Response {
            let (_, params) = stub.function_and_parameters();
            let a: i64 = params[0].parse().unwrap_or(0);
            let b: i64 = params[1].parse().unwrap_or(0);
            if b == 0 {
                return Response::error("division by zero");
            }
            stub.set_event("divided", Vec::new());
            Response::success((a / b).to_string().into_bytes())
        }
    }

    async fn registered_peer() -> ChannelStream {
        let (peer, chaincode) = ChannelStream::pair();
        tokio::spawn(start(chaincode, ChaincodeKey::new("cc1", "v1"), Arc::new(Divider)));

        let register = peer.recv().await.unwrap().unwrap();
        assert_eq!(register.message_kind().unwrap(), MessageKind::Register);
        let id = ChaincodeId::decode(register.payload.as_slice()).unwrap();
        assert_eq!(id.name, "cc1:v1");

        peer.send(ChaincodeMessage::control(MessageKind::Registered)).await.unwrap();
        peer.send(ChaincodeMessage::control(MessageKind::Ready)).await.unwrap();
        peer
    }

    fn transaction(txid: &str, args: [&str; 3]) -> ChaincodeMessage {
        ChaincodeMessage::new(
            MessageKind::Transaction,
            txid,
            "ch1",
            ChaincodeInput::from_args(args).encode_to_vec(),
        )
    }

    #[tokio::test]
    async fn transaction_gets_completed_response() {
        let peer = registered_peer().await;
        peer.send(transaction("tx1", ["divide", "9", "3"])).await.unwrap();

        let reply = peer.recv().await.unwrap().unwrap();
        assert_eq!(reply.message_kind().unwrap(), MessageKind::Completed);
        assert_eq!(reply.txid, "tx1");
        let response = Response::decode(reply.payload.as_slice()).unwrap();
        assert_eq!(response.payload, b"3");
        assert_eq!(reply.chaincode_event.unwrap().event_name, "divided");
    }

    #[tokio::test]
    async fn error_status_becomes_error_message() {
        let peer = registered_peer().await;
        peer.send(transaction("tx1", ["divide", "1", "0"])).await.unwrap();

        let reply = peer.recv().await.unwrap().unwrap();
        assert_eq!(reply.message_kind().unwrap(), MessageKind::Error);
        assert_eq!(reply.payload_text(), "division by zero");
    }

    #[tokio::test]
    async fn rejected_registration_ends_session() {
        let (peer, chaincode) = ChannelStream::pair();
        let session = tokio::spawn(start(chaincode, ChaincodeKey::new("cc1", "v1"), Arc::new(Divider)));

        let _register = peer.recv().await.unwrap().unwrap();
        peer.send(ChaincodeMessage::new(MessageKind::Error, "", "", b"duplicate".to_vec()))
            .await
            .unwrap();

        assert!(matches!(
            session.await.unwrap(),
            Err(ChaincodeError::Protocol(_))
        ));
    }
}
