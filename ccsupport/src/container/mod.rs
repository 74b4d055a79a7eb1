//! Workload supervisors that start, stop and wait on chaincode containers.

mod inproc;
mod log_stream;
mod process;

pub use inproc::InProcRuntime;
pub use process::ProcessRuntime;

use async_trait::async_trait;
use ccsupport_shared::errors::ChaincodeResult;

use crate::types::ContainerInfo;

/// Supervisor contract consumed by the launcher.
///
/// `start` returns once the workload is running (or failed to start). The
/// workload connects back on its own; readiness is observed through the
/// registry, not through this trait.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Start the workload. `package` is `None` for in-process containers.
    async fn start(&self, info: &ContainerInfo, package: Option<Vec<u8>>) -> ChaincodeResult<()>;

    /// Stop the workload. Succeeds when it is not running.
    async fn stop(&self, info: &ContainerInfo) -> ChaincodeResult<()>;

    /// Block until the workload exits and return its exit code.
    async fn wait(&self, info: &ContainerInfo) -> ChaincodeResult<i32>;
}
