//! Scriptable container runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ccsupport::{
    ChaincodeError, ChaincodeKey, ChaincodeResult, ConnectionAcceptor, ContainerInfo,
    InProcRuntime, Runtime,
};
use ccsupport::shim::Chaincode;
use parking_lot::Mutex;
use tokio::sync::watch;

/// What the next `start` does.
#[derive(Clone, Debug)]
pub enum FakeBehavior {
    /// Start fails with this reason.
    FailStart(String),
    /// Start succeeds but the chaincode never dials back.
    NeverConnect,
    /// Start succeeds and the container exits at once with this code.
    ExitWith(i32),
    /// Start runs the registered chaincode in-process, which registers.
    Connect,
}

/// Runtime that counts calls and behaves as scripted.
pub struct FakeRuntime {
    behavior: Mutex<FakeBehavior>,
    start_delay: Mutex<Duration>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    inproc: InProcRuntime,
    parked: Mutex<HashMap<ChaincodeKey, Arc<watch::Sender<Option<i32>>>>>,
}

impl FakeRuntime {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            start_delay: Mutex::new(Duration::ZERO),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            inproc: InProcRuntime::new(),
            parked: Mutex::new(HashMap::new()),
        }
    }

    /// Runtime whose containers run `chaincode` under `name`.
    pub fn connecting(name: &str, chaincode: Arc<dyn Chaincode>) -> Self {
        let runtime = Self::new(FakeBehavior::Connect);
        runtime.inproc.register(name, chaincode);
        runtime
    }

    pub fn with_start_delay(self, delay: Duration) -> Self {
        *self.start_delay.lock() = delay;
        self
    }

    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn bind(&self, acceptor: ConnectionAcceptor) {
        self.inproc.bind(acceptor);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn park(&self, info: &ContainerInfo, exit: Option<i32>) {
        let (tx, _rx) = watch::channel(exit);
        self.parked.lock().insert(info.key(), Arc::new(tx));
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn start(&self, info: &ContainerInfo, package: Option<Vec<u8>>) -> ChaincodeResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.start_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behavior.lock().clone();
        match behavior {
            FakeBehavior::FailStart(reason) => Err(ChaincodeError::LaunchStartFailed {
                key: info.key().to_string(),
                reason,
            }),
            FakeBehavior::NeverConnect => {
                self.park(info, None);
                Ok(())
            }
            FakeBehavior::ExitWith(code) => {
                self.park(info, Some(code));
                Ok(())
            }
            FakeBehavior::Connect => self.inproc.start(info, package).await,
        }
    }

    async fn stop(&self, info: &ContainerInfo) -> ChaincodeResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let parked = self.parked.lock().remove(&info.key());
        if let Some(exit) = parked {
            exit.send_replace(Some(-1));
        }
        self.inproc.stop(info).await
    }

    async fn wait(&self, info: &ContainerInfo) -> ChaincodeResult<i32> {
        let parked = self.parked.lock().get(&info.key()).map(|tx| tx.subscribe());
        match parked {
            Some(mut exit) => Ok(exit
                .wait_for(Option::is_some)
                .await
                .map(|code| code.unwrap_or(-1))
                .unwrap_or(-1)),
            None => self.inproc.wait(info).await,
        }
    }
}
