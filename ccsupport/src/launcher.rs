//! Launch sequencing for chaincode containers.
//!
//! A launch moves a key from not-launching through launching to ready or
//! failed. The registry guarantees only one caller (the originator) starts
//! the container; every other caller joins its [`LaunchState`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use tokio::sync::oneshot;

use crate::container::Runtime;
use crate::metrics::LaunchMetricsStorage;
use crate::package::PackageProvider;
use crate::registry::{HandlerRegistry, LaunchState};
use crate::types::{ContainerInfo, ContainerType};

/// Ensures a chaincode container is running and registered.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Resolve once the chaincode for `info` registered, or fail with the
    /// launch error every concurrent caller observes.
    async fn launch(&self, info: &ContainerInfo) -> ChaincodeResult<()>;
}

/// [`Launcher`] backed by a [`Runtime`] and the shared registry.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct RuntimeLauncher {
    runtime: Arc<dyn Runtime>,
    registry: Arc<HandlerRegistry>,
    packages: Arc<dyn PackageProvider>,
    startup_timeout: Duration,
    metrics: LaunchMetricsStorage,
}

impl RuntimeLauncher {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        registry: Arc<HandlerRegistry>,
        packages: Arc<dyn PackageProvider>,
        startup_timeout: Duration,
        metrics: LaunchMetricsStorage,
    ) -> Self {
        Self {
            runtime,
            registry,
            packages,
            startup_timeout,
            metrics,
        }
    }

    fn timeout_error(&self, info: &ContainerInfo) -> ChaincodeError {
        ChaincodeError::LaunchTimeout {
            key: info.key().to_string(),
            timeout_ms: self.startup_timeout.as_millis() as u64,
        }
    }

    /// Originator path: start the container, race its outcome, clean up on
    /// failure.
    ///
    /// Cleanup never overtakes a start still in progress, so the originator
    /// may return after the startup timeout when the runtime is slow to
    /// start. Callers that joined the launch are released at the deadline.
    async fn originate(self, info: ContainerInfo, state: LaunchState) -> ChaincodeResult<()> {
        let started = Instant::now();
        let key = info.key();

        let package = match info.container_type {
            ContainerType::InProcess => None,
            ContainerType::Process => match self.packages.get_chaincode_code_package(&info).await {
                Ok(package) => Some(package),
                Err(e) => {
                    let err = match e {
                        ChaincodeError::PackageRetrievalFailed { .. } => e,
                        other => ChaincodeError::PackageRetrievalFailed {
                            key: key.to_string(),
                            reason: other.to_string(),
                        },
                    };
                    let outcome = settle(&state, err);
                    if let Err(e) = self.registry.deregister(&key) {
                        tracing::debug!(chaincode = %key, error = %e, "Nothing to deregister");
                    }
                    self.metrics.record_launch(started.elapsed(), false);
                    return outcome;
                }
            },
        };

        let (started_tx, mut started_rx) = oneshot::channel::<ChaincodeResult<()>>();
        {
            let runtime = Arc::clone(&self.runtime);
            let state = state.clone();
            let info = info.clone();
            tokio::spawn(async move {
                let key = info.key();
                let start_result = runtime.start(&info, package).await.map_err(|e| match e {
                    ChaincodeError::LaunchStartFailed { .. } => e,
                    other => ChaincodeError::LaunchStartFailed {
                        key: key.to_string(),
                        reason: other.to_string(),
                    },
                });
                let is_started = start_result.is_ok();
                let _ = started_tx.send(start_result);
                if !is_started {
                    return;
                }

                // a container that exits is a failure unless registration already won
                let exited = match runtime.wait(&info).await {
                    Ok(exit_code) => ChaincodeError::ContainerExited {
                        key: key.to_string(),
                        exit_code,
                    },
                    Err(e) => ChaincodeError::Runtime(format!("failed to wait for {}: {}", key, e)),
                };
                if state.notify(Err(exited.clone())) {
                    tracing::debug!(chaincode = %key, error = %exited, "Container exited before registering");
                }
            });
        }

        let deadline = tokio::time::sleep(self.startup_timeout);
        tokio::pin!(deadline);
        let mut start_returned = false;
        let outcome = loop {
            tokio::select! {
                result = state.done() => break result,
                start_result = &mut started_rx, if !start_returned => {
                    start_returned = true;
                    if let Ok(Err(err)) = start_result {
                        break settle(&state, err);
                    }
                }
                _ = &mut deadline => {
                    let outcome = settle(&state, self.timeout_error(&info));
                    if matches!(outcome, Err(ChaincodeError::LaunchTimeout { .. })) {
                        self.metrics.record_timeout();
                    }
                    break outcome;
                }
            }
        };

        if outcome.is_err() && !start_returned {
            // stopping before start returns would miss the workload it is
            // about to bring up
            tracing::debug!(chaincode = %key, "Waiting for container start to return before cleanup");
            let _ = started_rx.await;
        }

        if let Err(err) = &outcome {
            tracing::warn!(chaincode = %key, error = %err, "Launch failed, cleaning up");
            if let Err(e) = self.runtime.stop(&info).await {
                tracing::warn!(chaincode = %key, error = %e, "Failed to stop container after launch failure");
            }
            if let Err(e) = self.registry.deregister(&key) {
                tracing::debug!(chaincode = %key, error = %e, "Nothing to deregister");
            }
        } else {
            tracing::info!(
                chaincode = %key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Chaincode launched"
            );
        }

        self.metrics.record_launch(started.elapsed(), outcome.is_ok());
        outcome
    }
}

/// Record `err` as the launch outcome. If another outcome was recorded first,
/// that one wins so every caller reports the same result.
fn settle(state: &LaunchState, err: ChaincodeError) -> ChaincodeResult<()> {
    if state.notify(Err(err.clone())) {
        return Err(err);
    }
    state.outcome().unwrap_or(Err(err))
}

#[async_trait]
impl Launcher for RuntimeLauncher {
    async fn launch(&self, info: &ContainerInfo) -> ChaincodeResult<()> {
        let key = info.key();
        let (state, already_started) = self.registry.launching(&key);

        if already_started {
            tracing::debug!(chaincode = %key, "Joining launch already in flight");
            // late joiners never clean up; that is the originator's job
            return match tokio::time::timeout(self.startup_timeout, state.done()).await {
                Ok(result) => result,
                Err(_) => Err(self.timeout_error(info)),
            };
        }

        tracing::debug!(chaincode = %key, container_type = %info.container_type, "Launching chaincode");
        // run on its own task so a dropped caller cannot strand the registry entry
        let task = tokio::spawn(self.clone().originate(info.clone(), state));
        task.await
            .unwrap_or_else(|e| Err(ChaincodeError::Internal(format!("launch task failed: {}", e))))
    }
}
