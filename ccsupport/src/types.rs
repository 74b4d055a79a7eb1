//! Core types passed between the broker components.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ccsupport_shared::errors::ChaincodeResult;
use ccsupport_shared::{ChaincodeEvent, ChaincodeKey, Response};
use serde::{Deserialize, Serialize};

/// Execution environment a chaincode runs in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    /// Separate OS process built from a code package.
    #[default]
    Process,
    /// Task inside the broker's own process. Needs no code package.
    InProcess,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::Process => "process",
            ContainerType::InProcess => "in_process",
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to launch: identity, execution environment and package reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub container_type: ContainerType,
    /// Opaque reference to the installed code package, empty when the package
    /// is found by name and version.
    #[serde(default)]
    pub package_id: String,
}

impl ContainerInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        container_type: ContainerType,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            container_type,
            package_id: String::new(),
        }
    }

    pub fn key(&self) -> ChaincodeKey {
        ChaincodeKey::new(&self.name, &self.version)
    }
}

/// A chaincode definition as committed on a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub container_type: ContainerType,
    #[serde(default)]
    pub package_id: String,
}

impl ChaincodeDefinition {
    pub fn container_info(&self) -> ContainerInfo {
        ContainerInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            container_type: self.container_type,
            package_id: self.package_id.clone(),
        }
    }
}

/// Read access to world state, handed in with a transaction.
pub trait QueryExecutor: Send + Sync {
    fn get_state(&self, namespace: &str, key: &str) -> ChaincodeResult<Option<Vec<u8>>>;
}

/// Per-transaction parameters.
#[derive(Clone, Default)]
pub struct TransactionParams {
    pub tx_id: String,
    pub channel_id: String,
    pub proposal_decorations: HashMap<String, Vec<u8>>,
    pub query: Option<Arc<dyn QueryExecutor>>,
}

impl TransactionParams {
    pub fn new(tx_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            channel_id: channel_id.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: Arc<dyn QueryExecutor>) -> Self {
        self.query = Some(query);
        self
    }
}

impl fmt::Debug for TransactionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionParams")
            .field("tx_id", &self.tx_id)
            .field("channel_id", &self.channel_id)
            .field("decorations", &self.proposal_decorations.len())
            .field("query", &self.query.is_some())
            .finish()
    }
}

/// The chaincode a request is addressed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChaincodeContext {
    pub name: String,
    pub version: String,
}

impl ChaincodeContext {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn key(&self) -> ChaincodeKey {
        ChaincodeKey::new(&self.name, &self.version)
    }
}

/// Typed outcome of a successful INIT or TRANSACTION.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    pub response: Response,
    pub event: Option<ChaincodeEvent>,
}
