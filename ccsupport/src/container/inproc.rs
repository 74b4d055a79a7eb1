//! Chaincodes run as tasks inside the broker process.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use ccsupport_shared::ChaincodeKey;
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::Runtime;
use crate::acceptor::ConnectionAcceptor;
use crate::shim::{self, Chaincode};
use crate::transport::ChannelStream;
use crate::types::ContainerInfo;

const STOPPED_EXIT_CODE: i32 = -1;

struct Instance {
    task: JoinHandle<()>,
    exit: Arc<watch::Sender<Option<i32>>>,
}

/// Runs registered Rust chaincodes on tokio tasks.
///
/// Each start connects the chaincode's shim to the broker through an
/// in-memory [`ChannelStream`] pair. No code package is involved. The runtime
/// must be bound to the broker's [`ConnectionAcceptor`] before the first
/// start. Cheaply cloneable.
#[derive(Clone, Default)]
pub struct InProcRuntime {
    inner: Arc<InProcInner>,
}

#[derive(Default)]
struct InProcInner {
    chaincodes: RwLock<HashMap<String, Arc<dyn Chaincode>>>,
    acceptor: OnceLock<ConnectionAcceptor>,
    instances: Mutex<HashMap<ChaincodeKey, Instance>>,
}

impl InProcRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `chaincode` available under `name`, for any version.
    pub fn register(&self, name: impl Into<String>, chaincode: Arc<dyn Chaincode>) {
        self.inner.chaincodes.write().insert(name.into(), chaincode);
    }

    pub fn with_chaincode(self, name: impl Into<String>, chaincode: Arc<dyn Chaincode>) -> Self {
        self.register(name, chaincode);
        self
    }

    /// Attach the acceptor that in-process chaincodes connect to. Later calls
    /// are ignored.
    pub fn bind(&self, acceptor: ConnectionAcceptor) {
        if self.inner.acceptor.set(acceptor).is_err() {
            tracing::debug!("In-process runtime already bound to an acceptor");
        }
    }

    pub fn is_running(&self, key: &ChaincodeKey) -> bool {
        self.inner
            .instances
            .lock()
            .get(key)
            .is_some_and(|instance| instance.exit.borrow().is_none())
    }
}

#[async_trait]
impl Runtime for InProcRuntime {
    async fn start(&self, info: &ContainerInfo, _package: Option<Vec<u8>>) -> ChaincodeResult<()> {
        let key = info.key();
        let start_failed = |reason: &str| ChaincodeError::LaunchStartFailed {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let acceptor = self
            .inner
            .acceptor
            .get()
            .cloned()
            .ok_or_else(|| start_failed("in-process runtime is not bound to an acceptor"))?;
        let chaincode = self
            .inner
            .chaincodes
            .read()
            .get(&info.name)
            .cloned()
            .ok_or_else(|| start_failed("chaincode is not registered with the in-process runtime"))?;

        let mut instances = self.inner.instances.lock();
        if instances
            .get(&key)
            .is_some_and(|instance| instance.exit.borrow().is_none())
        {
            return Err(start_failed("chaincode is already running"));
        }

        let (peer_side, chaincode_side) = ChannelStream::pair();
        let exit = Arc::new(watch::channel(None).0);
        let task = {
            let exit = Arc::clone(&exit);
            let key = key.clone();
            tokio::spawn(async move {
                tokio::spawn(async move {
                    if let Err(e) = acceptor.handle_stream(Arc::new(peer_side)).await {
                        tracing::debug!(error = %e, "In-process chaincode stream ended with error");
                    }
                });

                let code = match shim::start(chaincode_side, key.clone(), chaincode).await {
                    Ok(()) => 0,
                    Err(e) => {
                        tracing::warn!(chaincode = %key, error = %e, "In-process chaincode failed");
                        1
                    }
                };
                exit.send_replace(Some(code));
            })
        };

        tracing::info!(chaincode = %key, "In-process chaincode started");
        instances.insert(key, Instance { task, exit });
        Ok(())
    }

    async fn stop(&self, info: &ContainerInfo) -> ChaincodeResult<()> {
        let key = info.key();
        if let Some(instance) = self.inner.instances.lock().remove(&key) {
            // aborting drops the shim's stream end, which closes the handler
            instance.task.abort();
            instance.exit.send_if_modified(|code| {
                if code.is_some() {
                    return false;
                }
                *code = Some(STOPPED_EXIT_CODE);
                true
            });
            tracing::debug!(chaincode = %key, "In-process chaincode stopped");
        }
        Ok(())
    }

    async fn wait(&self, info: &ContainerInfo) -> ChaincodeResult<i32> {
        let key = info.key();
        let mut exit = self
            .inner
            .instances
            .lock()
            .get(&key)
            .map(|instance| instance.exit.subscribe())
            .ok_or_else(|| ChaincodeError::Runtime(format!("no in-process chaincode {}", key)))?;

        let code = exit
            .wait_for(Option::is_some)
            .await
            .map(|code| code.unwrap_or(STOPPED_EXIT_CODE))
            .unwrap_or(STOPPED_EXIT_CODE);
        Ok(code)
    }
}
