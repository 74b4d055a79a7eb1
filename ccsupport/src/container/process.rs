//! Chaincodes run as local OS processes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use ccsupport_shared::ChaincodeKey;
use ccsupport_shared::constants::env;
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use parking_lot::Mutex;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};

use super::Runtime;
use super::log_stream::LogStreamHandler;
use crate::config::SupportConfig;
use crate::types::ContainerInfo;

const EXECUTABLE_NAME: &str = "chaincode";

/// Exit code reported when a process was killed or its status was lost.
const KILLED_EXIT_CODE: i32 = -1;

struct ProcessEntry {
    pid: Option<u32>,
    exit: watch::Receiver<Option<i32>>,
    kill: Option<oneshot::Sender<()>>,
}

impl ProcessEntry {
    fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }
}

/// Runs each chaincode package as an executable in its own directory under
/// the work dir.
///
/// The process receives its identity and the peer address through the
/// environment and is expected to dial back. Cheaply cloneable.
#[derive(Clone)]
pub struct ProcessRuntime {
    inner: Arc<ProcessRuntimeInner>,
}

struct ProcessRuntimeInner {
    work_dir: PathBuf,
    env: Vec<(String, String)>,
    processes: Mutex<HashMap<ChaincodeKey, ProcessEntry>>,
}

impl ProcessRuntime {
    pub fn new(config: &SupportConfig) -> Self {
        Self {
            inner: Arc::new(ProcessRuntimeInner {
                work_dir: config.work_dir.clone(),
                env: config.chaincode_env(),
                processes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Pid of the running process for `key`, if any.
    pub fn pid(&self, key: &ChaincodeKey) -> Option<u32> {
        self.inner
            .processes
            .lock()
            .get(key)
            .filter(|entry| entry.is_running())
            .and_then(|entry| entry.pid)
    }

    fn chaincode_dir(&self, info: &ContainerInfo) -> PathBuf {
        self.inner
            .work_dir
            .join(format!("{}-{}", info.name, info.version))
    }

    async fn write_executable(dir: &Path, package: &[u8]) -> ChaincodeResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(EXECUTABLE_NAME);
        tokio::fs::write(&path, package).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(path)
    }
}

#[async_trait]
impl Runtime for ProcessRuntime {
    async fn start(&self, info: &ContainerInfo, package: Option<Vec<u8>>) -> ChaincodeResult<()> {
        let key = info.key();
        let start_failed = |reason: String| ChaincodeError::LaunchStartFailed {
            key: key.to_string(),
            reason,
        };

        if self
            .inner
            .processes
            .lock()
            .get(&key)
            .is_some_and(ProcessEntry::is_running)
        {
            return Err(start_failed("a process is already running".into()));
        }

        let package = package.ok_or_else(|| start_failed("no code package provided".into()))?;
        let dir = self.chaincode_dir(info);
        let executable = Self::write_executable(&dir, &package)
            .await
            .map_err(|e| start_failed(format!("failed to write package: {}", e)))?;

        let mut cmd = Command::new(&executable);
        cmd.current_dir(&dir)
            .envs(self.inner.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(env::CHAINCODE_ID_NAME, key.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Pass RUST_LOG through so Rust chaincodes log at the broker's level
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            cmd.env("RUST_LOG", rust_log);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| start_failed(format!("failed to spawn {}: {}", executable.display(), e)))?;
        let pid = child.id();
        let logs = LogStreamHandler::new(child.stdout.take(), child.stderr.take(), &key.to_string());

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let monitor_key = key.clone();
        tokio::spawn(async move {
            let (code, killed) = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => (status.code().unwrap_or(KILLED_EXIT_CODE), false),
                    Err(e) => {
                        tracing::warn!(chaincode = %monitor_key, "Failed to wait for chaincode process: {}", e);
                        (KILLED_EXIT_CODE, false)
                    }
                },
                Ok(()) = &mut kill_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(chaincode = %monitor_key, "Failed to kill chaincode process: {}", e);
                    }
                    (KILLED_EXIT_CODE, true)
                }
            };
            tracing::info!(chaincode = %monitor_key, exit_code = code, "Chaincode process exited");
            exit_tx.send_replace(Some(code));

            // descendants of a killed process may hold the pipes open
            if killed {
                drop(logs);
            } else {
                logs.shutdown().await;
            }
        });

        tracing::info!(chaincode = %key, pid = ?pid, path = %executable.display(), "Chaincode process started");
        self.inner.processes.lock().insert(
            key,
            ProcessEntry {
                pid,
                exit: exit_rx,
                kill: Some(kill_tx),
            },
        );
        Ok(())
    }

    async fn stop(&self, info: &ContainerInfo) -> ChaincodeResult<()> {
        let key = info.key();
        let Some(mut entry) = self.inner.processes.lock().remove(&key) else {
            tracing::debug!(chaincode = %key, "Stop requested for a chaincode that is not running");
            return Ok(());
        };

        if let Some(kill) = entry.kill.take() {
            let _ = kill.send(());
        }
        // the monitor publishes an exit code once the process is reaped
        let _ = entry.exit.wait_for(Option::is_some).await;
        tracing::debug!(chaincode = %key, "Chaincode process stopped");
        Ok(())
    }

    async fn wait(&self, info: &ContainerInfo) -> ChaincodeResult<i32> {
        let key = info.key();
        let mut exit = self
            .inner
            .processes
            .lock()
            .get(&key)
            .map(|entry| entry.exit.clone())
            .ok_or_else(|| ChaincodeError::Runtime(format!("no process for {}", key)))?;

        let code = exit
            .wait_for(Option::is_some)
            .await
            .map(|code| code.unwrap_or(KILLED_EXIT_CODE))
            .unwrap_or(KILLED_EXIT_CODE);
        Ok(code)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::ContainerType;
    use tempfile::TempDir;

    fn runtime(temp_dir: &TempDir) -> ProcessRuntime {
        let config = SupportConfig {
            work_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        ProcessRuntime::new(&config)
    }

    fn info() -> ContainerInfo {
        ContainerInfo::new("cc1", "v1", ContainerType::Process)
    }

    #[tokio::test]
    async fn wait_reports_exit_code() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = runtime(&temp_dir);
        let script = b"#!/bin/sh\necho \"$CORE_CHAINCODE_ID_NAME\"\nexit 3\n".to_vec();

        runtime.start(&info(), Some(script)).await.unwrap();
        assert_eq!(runtime.wait(&info()).await.unwrap(), 3);
        assert!(temp_dir.path().join("cc1-v1").join("chaincode").exists());
    }

    #[tokio::test]
    async fn stop_kills_and_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = runtime(&temp_dir);
        let script = b"#!/bin/sh\nsleep 30\n".to_vec();

        runtime.start(&info(), Some(script)).await.unwrap();
        assert!(runtime.pid(&info().key()).is_some());

        runtime.stop(&info()).await.unwrap();
        runtime.stop(&info()).await.unwrap();
        assert!(runtime.pid(&info().key()).is_none());
    }

    #[tokio::test]
    async fn start_without_package_fails() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = runtime(&temp_dir);

        assert!(matches!(
            runtime.start(&info(), None).await,
            Err(ChaincodeError::LaunchStartFailed { .. })
        ));
    }
}
