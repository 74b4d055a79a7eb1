//! Chaincode definition resolvers.

use std::collections::HashMap;

use ccsupport_shared::constants::LIFECYCLE_NAMESPACE;
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};

use crate::types::{ChaincodeDefinition, ContainerInfo, QueryExecutor};

/// Resolves what to launch for a chaincode name on a channel.
pub trait Lifecycle: Send + Sync {
    /// # Errors
    ///
    /// `DefinitionNotFound` when `name` is not defined on `channel_id`.
    fn chaincode_definition(
        &self,
        channel_id: &str,
        name: &str,
        query: Option<&dyn QueryExecutor>,
    ) -> ChaincodeResult<ChaincodeDefinition>;

    fn chaincode_container_info(
        &self,
        channel_id: &str,
        name: &str,
        query: Option<&dyn QueryExecutor>,
    ) -> ChaincodeResult<ContainerInfo> {
        self.chaincode_definition(channel_id, name, query)
            .map(|definition| definition.container_info())
    }
}

fn not_found(channel_id: &str, name: &str, reason: impl Into<String>) -> ChaincodeError {
    ChaincodeError::DefinitionNotFound {
        channel_id: channel_id.to_string(),
        name: name.to_string(),
        reason: reason.into(),
    }
}

// ============================================================================
// Static definitions
// ============================================================================

/// Definitions fixed at construction, valid on every channel.
#[derive(Debug, Clone, Default)]
pub struct StaticLifecycle {
    definitions: HashMap<String, ChaincodeDefinition>,
}

impl StaticLifecycle {
    pub fn new(definitions: impl IntoIterator<Item = ChaincodeDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|definition| (definition.name.clone(), definition))
                .collect(),
        }
    }

    pub fn with_definition(mut self, definition: ChaincodeDefinition) -> Self {
        self.definitions.insert(definition.name.clone(), definition);
        self
    }
}

impl Lifecycle for StaticLifecycle {
    fn chaincode_definition(
        &self,
        channel_id: &str,
        name: &str,
        _query: Option<&dyn QueryExecutor>,
    ) -> ChaincodeResult<ChaincodeDefinition> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(channel_id, name, "chaincode is not defined"))
    }
}

// ============================================================================
// Ledger definitions
// ============================================================================

/// Reads JSON definition records from world state through the transaction's
/// query executor, under the `_lifecycle` namespace.
#[derive(Debug, Clone, Default)]
pub struct LedgerLifecycle;

impl LedgerLifecycle {
    pub fn new() -> Self {
        Self
    }

    /// World-state key holding the definition of `name`.
    pub fn definition_key(name: &str) -> String {
        format!("namespaces/fields/{}/Definition", name)
    }
}

impl Lifecycle for LedgerLifecycle {
    fn chaincode_definition(
        &self,
        channel_id: &str,
        name: &str,
        query: Option<&dyn QueryExecutor>,
    ) -> ChaincodeResult<ChaincodeDefinition> {
        let query =
            query.ok_or_else(|| not_found(channel_id, name, "no query executor for the transaction"))?;

        let raw = query
            .get_state(LIFECYCLE_NAMESPACE, &Self::definition_key(name))
            .map_err(|e| not_found(channel_id, name, format!("could not query definition: {}", e)))?
            .ok_or_else(|| not_found(channel_id, name, "chaincode is not defined"))?;

        let definition: ChaincodeDefinition = serde_json::from_slice(&raw)
            .map_err(|e| not_found(channel_id, name, format!("corrupt definition: {}", e)))?;

        if definition.name != name {
            return Err(not_found(
                channel_id,
                name,
                format!("definition record names '{}'", definition.name),
            ));
        }
        Ok(definition)
    }
}
