//! ccsupport shared - code common to the peer-side broker and chaincode shims
//!
//! This crate contains the wire protocol, chaincode identity, constants and
//! error types used on both ends of a chaincode stream.

pub mod constants;
pub mod errors;
pub mod key;
pub mod protocol;

pub use errors::{ChaincodeError, ChaincodeResult};
pub use key::ChaincodeKey;
pub use protocol::{
    ChaincodeEvent, ChaincodeId, ChaincodeInput, ChaincodeMessage, MessageKind, Response,
};
