//! Shared fixtures for ccsupport integration tests.

mod chaincode;
mod runtime;

pub use chaincode::TestChaincode;
pub use runtime::{FakeBehavior, FakeRuntime};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ccsupport::{
    ChaincodeContext, ChaincodeDefinition, ChaincodeError, ChaincodeInput, ChaincodeKey,
    ChaincodeResult, ChaincodeSupport, ContainerInfo, ContainerType, PackageProvider,
    QueryExecutor, StaticLifecycle, SupportConfig, TransactionParams,
};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const CHANNEL: &str = "ch1";
pub const CC_NAME: &str = "cc1";
pub const CC_VERSION: &str = "v1";

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Packages held in memory, keyed by chaincode.
#[derive(Default)]
pub struct MemoryPackages {
    packages: Mutex<HashMap<ChaincodeKey, Vec<u8>>>,
}

impl MemoryPackages {
    pub fn with_package(self, key: ChaincodeKey, bytes: &[u8]) -> Self {
        self.packages.lock().insert(key, bytes.to_vec());
        self
    }
}

#[async_trait]
impl PackageProvider for MemoryPackages {
    async fn get_chaincode_code_package(&self, info: &ContainerInfo) -> ChaincodeResult<Vec<u8>> {
        let key = info.key();
        self.packages
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| ChaincodeError::PackageRetrievalFailed {
                key: key.to_string(),
                reason: "package not installed".into(),
            })
    }
}

/// World state held in memory.
#[derive(Default)]
pub struct MemoryQuery {
    state: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryQuery {
    pub fn put(&self, namespace: &str, key: &str, value: Vec<u8>) {
        self.state
            .lock()
            .insert((namespace.to_string(), key.to_string()), value);
    }
}

impl QueryExecutor for MemoryQuery {
    fn get_state(&self, namespace: &str, key: &str) -> ChaincodeResult<Option<Vec<u8>>> {
        Ok(self
            .state
            .lock()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }
}

// ============================================================================
// TEST CONTEXT
// ============================================================================

/// Broker wired to a [`FakeRuntime`], with `cc1:v1` defined and installed.
pub struct TestContext {
    pub support: ChaincodeSupport,
    pub runtime: Arc<FakeRuntime>,
    _temp_dir: TempDir, // Dropped after test
}

impl TestContext {
    pub fn new(runtime: FakeRuntime) -> Self {
        Self::with_config(runtime, |_| {})
    }

    /// Build with short timeouts, after letting `configure` adjust them.
    pub fn with_config(runtime: FakeRuntime, configure: impl FnOnce(&mut SupportConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = SupportConfig {
            startup_timeout_ms: 2_000,
            execute_timeout_ms: 2_000,
            work_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        configure(&mut config);

        let runtime = Arc::new(runtime);
        let lifecycle = StaticLifecycle::default().with_definition(cc1_definition());
        let packages = MemoryPackages::default().with_package(cc1_key(), b"cc1 package");

        let support = ChaincodeSupport::new(
            config,
            runtime.clone(),
            Arc::new(lifecycle),
            Arc::new(packages),
        )
        .expect("Failed to create chaincode support");
        runtime.bind(support.acceptor());

        Self {
            support,
            runtime,
            _temp_dir: temp_dir,
        }
    }

    /// Broker whose containers run [`TestChaincode`] as `cc1`.
    pub fn connecting() -> Self {
        Self::new(FakeRuntime::connecting(CC_NAME, Arc::new(TestChaincode)))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

pub fn cc1_key() -> ChaincodeKey {
    ChaincodeKey::new(CC_NAME, CC_VERSION)
}

pub fn cc1() -> ChaincodeContext {
    ChaincodeContext::new(CC_NAME, CC_VERSION)
}

pub fn cc1_definition() -> ChaincodeDefinition {
    ChaincodeDefinition {
        name: CC_NAME.into(),
        version: CC_VERSION.into(),
        container_type: ContainerType::Process,
        package_id: "cc1-package".into(),
    }
}

pub fn cc1_info() -> ContainerInfo {
    cc1_definition().container_info()
}

pub fn params(txid: &str) -> TransactionParams {
    TransactionParams::new(txid, CHANNEL)
}

pub fn args(args: &[&str]) -> ChaincodeInput {
    ChaincodeInput::from_args(args.iter().copied())
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 2s"
        );
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
