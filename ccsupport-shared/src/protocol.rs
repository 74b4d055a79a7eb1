//! Wire protocol between the peer and a chaincode.
//!
//! The message types are generated from `proto/ccsupport/v1/chaincode.proto`;
//! this module adds the helpers both ends use to build and inspect them.

use std::fmt;

use crate::constants::status;
use crate::errors::ChaincodeError;

// Generated protobuf types
mod generated {
    #![allow(clippy::all, unused_qualifications)]
    include!(concat!(env!("OUT_DIR"), "/ccsupport.v1.rs"));
}

pub use generated::{
    ChaincodeEvent, ChaincodeId, ChaincodeInput, ChaincodeMessage, MessageKind, Response,
};

// ============================================================================
// MESSAGE KINDS
// ============================================================================

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Undefined => "UNDEFINED",
            MessageKind::Register => "REGISTER",
            MessageKind::Registered => "REGISTERED",
            MessageKind::Init => "INIT",
            MessageKind::Ready => "READY",
            MessageKind::Transaction => "TRANSACTION",
            MessageKind::Completed => "COMPLETED",
            MessageKind::Error => "ERROR",
            MessageKind::Keepalive => "KEEPALIVE",
        }
    }

    /// True for the kinds a chaincode sends in answer to a request.
    pub fn is_response(&self) -> bool {
        matches!(self, MessageKind::Completed | MessageKind::Error)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

impl ChaincodeMessage {
    pub fn new(
        kind: MessageKind,
        txid: impl Into<String>,
        channel_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind: kind as i32,
            payload,
            txid: txid.into(),
            chaincode_event: None,
            channel_id: channel_id.into(),
        }
    }

    /// Message with no transaction context, such as REGISTERED or KEEPALIVE.
    pub fn control(kind: MessageKind) -> Self {
        Self::new(kind, "", "", Vec::new())
    }

    /// Decoded kind; unknown wire values are an error rather than a default.
    pub fn message_kind(&self) -> Result<MessageKind, ChaincodeError> {
        MessageKind::try_from(self.kind).map_err(|_| ChaincodeError::UnexpectedMessageKind {
            txid: self.txid.clone(),
            kind: self.kind.to_string(),
        })
    }

    /// Human-readable kind for logs, including unknown values.
    pub fn kind_name(&self) -> String {
        match MessageKind::try_from(self.kind) {
            Ok(kind) => kind.as_str().to_string(),
            Err(_) => format!("UNKNOWN({})", self.kind),
        }
    }

    /// Payload rendered as text, as carried by ERROR messages.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl Response {
    pub fn success(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status: status::OK,
            message: String::new(),
            payload: payload.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: status::ERROR,
            message: message.into(),
            payload: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status >= status::ERROR_THRESHOLD
    }
}

impl ChaincodeInput {
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// First argument interpreted as the function name.
    pub fn function(&self) -> Option<String> {
        self.args
            .first()
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn unknown_kind_is_rejected() {
        let msg = ChaincodeMessage {
            kind: 42,
            txid: "tx1".into(),
            ..Default::default()
        };
        assert!(matches!(
            msg.message_kind(),
            Err(ChaincodeError::UnexpectedMessageKind { .. })
        ));
        assert_eq!(msg.kind_name(), "UNKNOWN(42)");
    }

    #[test]
    fn completed_message_carries_response() {
        let response = Response::success(b"42".to_vec());
        let msg = ChaincodeMessage::new(
            MessageKind::Completed,
            "tx1",
            "ch1",
            response.encode_to_vec(),
        );

        let decoded = ChaincodeMessage::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.message_kind().unwrap(), MessageKind::Completed);
        assert_eq!(decoded.txid, "tx1");
        assert_eq!(decoded.channel_id, "ch1");

        let inner = Response::decode(decoded.payload.as_slice()).unwrap();
        assert_eq!(inner.status, status::OK);
        assert_eq!(inner.payload, b"42");
    }

    #[test]
    fn kind_uses_the_peer_field_tag() {
        // field 1, varint, KEEPALIVE = 18
        let wire = ChaincodeMessage::control(MessageKind::Keepalive).encode_to_vec();
        assert_eq!(wire, vec![0x08, 18]);
    }

    #[test]
    fn response_error_threshold() {
        assert!(!Response::success(Vec::new()).is_error());
        assert!(Response::error("boom").is_error());
    }

    #[test]
    fn input_function_is_first_arg() {
        let input = ChaincodeInput::from_args(["invoke", "a", "b"]);
        assert_eq!(input.function().as_deref(), Some("invoke"));
        assert_eq!(input.args.len(), 3);
    }
}
