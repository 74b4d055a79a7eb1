//! Shared constants between the broker and chaincode shims
//!
//! These values must be identical on both sides of the peer/chaincode boundary.

/// Environment variables handed to a launched chaincode process
pub mod env {
    /// Chaincode identity, formatted `name:version`
    pub const CHAINCODE_ID_NAME: &str = "CORE_CHAINCODE_ID_NAME";

    /// Address the chaincode dials to reach the peer
    pub const PEER_ADDRESS: &str = "CORE_PEER_ADDRESS";

    /// Chaincode application log level
    pub const LOGGING_LEVEL: &str = "CORE_CHAINCODE_LOGGING_LEVEL";

    /// Shim log level
    pub const LOGGING_SHIM: &str = "CORE_CHAINCODE_LOGGING_SHIM";

    /// Log line format
    pub const LOGGING_FORMAT: &str = "CORE_CHAINCODE_LOGGING_FORMAT";
}

/// Response status codes
pub mod status {
    pub const OK: i32 = 200;

    /// Statuses at or above this value are errors
    pub const ERROR_THRESHOLD: i32 = 400;

    pub const ERROR: i32 = 500;
}

/// Timeouts, in seconds
pub mod timeouts {
    /// How long a launch may take before the chaincode must have registered
    pub const STARTUP_SECS: u64 = 300;

    /// How long a single INIT/TRANSACTION may wait for a response
    pub const EXECUTE_SECS: u64 = 30;

    /// Longest accepted keepalive interval
    pub const MAX_KEEPALIVE_SECS: u64 = 24 * 60 * 60;
}

/// Namespace under which chaincode definitions are stored in the ledger
pub const LIFECYCLE_NAMESPACE: &str = "_lifecycle";

/// Maximum frame size accepted on a chaincode stream (100 MiB)
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;
