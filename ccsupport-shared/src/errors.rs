//! Error types shared by the broker and the chaincode shim.
//!
//! Every failure in the launch and invocation path resolves to a
//! [`ChaincodeError`] returned to some caller. The type is `Clone` because a
//! single launch outcome is broadcast to every caller waiting on that launch.

use thiserror::Error;

/// Result alias used across the workspace.
pub type ChaincodeResult<T> = Result<T, ChaincodeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChaincodeError {
    // ------------------------------------------------------------------
    // Launch path
    // ------------------------------------------------------------------
    /// The chaincode definition could not be resolved.
    #[error("[channel {channel_id}] failed to get chaincode container info for {name}: {reason}")]
    DefinitionNotFound {
        channel_id: String,
        name: String,
        reason: String,
    },

    /// The code package lookup failed; the launch is aborted.
    #[error("failed to get chaincode package for {key}: {reason}")]
    PackageRetrievalFailed { key: String, reason: String },

    /// The workload supervisor refused to start the chaincode.
    #[error("error starting container for {key}: {reason}")]
    LaunchStartFailed { key: String, reason: String },

    /// The chaincode did not register within the startup timeout.
    #[error("timeout expired while starting chaincode {key} ({timeout_ms}ms)")]
    LaunchTimeout { key: String, timeout_ms: u64 },

    /// The chaincode process exited before it became ready.
    #[error("container for {key} exited with {exit_code}")]
    ContainerExited { key: String, exit_code: i32 },

    /// A launch failed; wraps the underlying cause with channel and chaincode identity.
    #[error("[channel {channel_id}] could not launch chaincode {key}: {source}")]
    LaunchFailed {
        channel_id: String,
        key: String,
        source: Box<ChaincodeError>,
    },

    /// The launcher reported success but no handler is registered.
    #[error("[channel {channel_id}] claimed to start chaincode container for {key} but could not find handler")]
    RegistrationMissing { channel_id: String, key: String },

    // ------------------------------------------------------------------
    // Execution path
    // ------------------------------------------------------------------
    /// No correlated response arrived in time.
    #[error("timeout expired while executing transaction {txid} on channel {channel_id} for {key} ({timeout_ms}ms)")]
    ExecuteTimeout {
        key: String,
        channel_id: String,
        txid: String,
        timeout_ms: u64,
    },

    /// The chaincode stream ended.
    #[error("chaincode stream closed: {reason}")]
    StreamClosed { reason: String },

    /// A COMPLETED payload did not decode into a response.
    #[error("failed to unmarshal response for transaction {txid}: {reason}")]
    MalformedResponse { txid: String, reason: String },

    /// A response carried a kind other than COMPLETED or ERROR.
    #[error("unexpected response type {kind} for transaction {txid}")]
    UnexpectedMessageKind { txid: String, kind: String },

    /// The chaincode explicitly reported an ERROR.
    #[error("transaction returned with failure: {message}")]
    RemoteExecutionError { txid: String, message: String },

    /// An execution failed; wraps the underlying cause with the transaction id.
    #[error("failed to execute transaction {txid}: {source}")]
    ExecutionFailed {
        txid: String,
        source: Box<ChaincodeError>,
    },

    /// The (txid, channel) pair already has an outstanding request.
    #[error("txid: {txid}({channel_id}) exists")]
    DuplicateTransaction { txid: String, channel_id: String },

    /// Init policy: a TRANSACTION arrived before a successful INIT.
    #[error("chaincode {key} has not been initialized on channel {channel_id}")]
    InitRequired { key: String, channel_id: String },

    /// Init policy: a second INIT for the same channel.
    #[error("chaincode {key} is already initialized on channel {channel_id}")]
    AlreadyInitialized { key: String, channel_id: String },

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------
    #[error("duplicate chaincodeID: {key}")]
    DuplicateRegistration { key: String },

    #[error("peer will not accept external chaincode connection {key} (except in dev mode)")]
    UnsolicitedRegistration { key: String },

    #[error("could not find handler: {key}")]
    HandlerNotFound { key: String },

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChaincodeError {
    /// Strip `LaunchFailed` / `ExecutionFailed` wrappers.
    pub fn root_cause(&self) -> &ChaincodeError {
        match self {
            ChaincodeError::LaunchFailed { source, .. }
            | ChaincodeError::ExecutionFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True for errors produced while bringing a chaincode up.
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self.root_cause(),
            ChaincodeError::PackageRetrievalFailed { .. }
                | ChaincodeError::LaunchStartFailed { .. }
                | ChaincodeError::LaunchTimeout { .. }
                | ChaincodeError::ContainerExited { .. }
                | ChaincodeError::RegistrationMissing { .. }
        )
    }
}

impl From<prost::DecodeError> for ChaincodeError {
    fn from(err: prost::DecodeError) -> Self {
        ChaincodeError::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for ChaincodeError {
    fn from(err: std::io::Error) -> Self {
        ChaincodeError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_wrappers() {
        let inner = ChaincodeError::LaunchStartFailed {
            key: "cc1:v1".into(),
            reason: "port in use".into(),
        };
        let err = ChaincodeError::ExecutionFailed {
            txid: "tx1".into(),
            source: Box::new(ChaincodeError::LaunchFailed {
                channel_id: "ch1".into(),
                key: "cc1:v1".into(),
                source: Box::new(inner.clone()),
            }),
        };

        assert_eq!(err.root_cause(), &inner);
        assert!(err.is_launch_failure());
    }

    #[test]
    fn display_keeps_remote_diagnostic() {
        let err = ChaincodeError::RemoteExecutionError {
            txid: "tx1".into(),
            message: "division by zero".into(),
        };
        assert_eq!(
            err.to_string(),
            "transaction returned with failure: division by zero"
        );
    }

    #[test]
    fn launch_failed_display_includes_channel_and_cause() {
        let err = ChaincodeError::LaunchFailed {
            channel_id: "ch1".into(),
            key: "cc1:v1".into(),
            source: Box::new(ChaincodeError::LaunchTimeout {
                key: "cc1:v1".into(),
                timeout_ms: 50,
            }),
        };
        let text = err.to_string();
        assert!(text.contains("[channel ch1]"));
        assert!(text.contains("timeout expired while starting chaincode cc1:v1"));
    }
}
