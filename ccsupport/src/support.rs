//! Entry point used by transaction execution.

use std::sync::Arc;

use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use ccsupport_shared::{ChaincodeInput, ChaincodeKey, ChaincodeMessage, MessageKind, Response};
use prost::Message;

use crate::acceptor::ConnectionAcceptor;
use crate::config::SupportConfig;
use crate::container::Runtime;
use crate::handler::{Handler, HandlerOptions};
use crate::launcher::{Launcher, RuntimeLauncher};
use crate::lifecycle::Lifecycle;
use crate::metrics::{HandlerMetrics, HandlerMetricsStorage, LaunchMetrics, LaunchMetricsStorage};
use crate::package::PackageProvider;
use crate::registry::{HandlerRegistry, WorkerStatus};
use crate::transport::ChaincodeStream;
use crate::types::{ChaincodeContext, ContainerInfo, ExecutionResult, QueryExecutor, TransactionParams};

// ============================================================================
// PUBLIC API
// ============================================================================

/// Launches chaincodes on demand and routes INIT / TRANSACTION requests to
/// them.
///
/// **Cloning**: cheaply cloneable via `Arc`; all clones share the registry,
/// the launcher and the metrics.
#[derive(Clone)]
pub struct ChaincodeSupport {
    inner: Arc<SupportInner>,
}

struct SupportInner {
    config: SupportConfig,
    registry: Arc<HandlerRegistry>,
    launcher: RuntimeLauncher,
    runtime: Arc<dyn Runtime>,
    lifecycle: Arc<dyn Lifecycle>,
    acceptor: ConnectionAcceptor,
    launch_metrics: LaunchMetricsStorage,
    handler_metrics: HandlerMetricsStorage,
}

impl ChaincodeSupport {
    /// Build a broker around the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `config` fails validation.
    pub fn new(
        config: SupportConfig,
        runtime: Arc<dyn Runtime>,
        lifecycle: Arc<dyn Lifecycle>,
        packages: Arc<dyn PackageProvider>,
    ) -> ChaincodeResult<Self> {
        config.validate()?;

        let registry = Arc::new(HandlerRegistry::new(config.user_runs_cc));
        let launch_metrics = LaunchMetricsStorage::new();
        let handler_metrics = HandlerMetricsStorage::new();

        let launcher = RuntimeLauncher::new(
            Arc::clone(&runtime),
            Arc::clone(&registry),
            packages,
            config.startup_timeout(),
            launch_metrics.clone(),
        );
        let acceptor = ConnectionAcceptor::new(
            Arc::clone(&registry),
            HandlerOptions {
                keepalive: config.keepalive(),
                init_policy: config.init_policy,
            },
            handler_metrics.clone(),
        );

        tracing::debug!(
            startup_timeout_ms = config.startup_timeout_ms,
            execute_timeout_ms = config.execute_timeout_ms,
            user_runs_cc = config.user_runs_cc,
            init_policy = ?config.init_policy,
            "Chaincode support created"
        );

        Ok(Self {
            inner: Arc::new(SupportInner {
                config,
                registry,
                launcher,
                runtime,
                lifecycle,
                acceptor,
                launch_metrics,
                handler_metrics,
            }),
        })
    }

    pub fn config(&self) -> &SupportConfig {
        &self.inner.config
    }

    /// The registry shared by every component of this broker.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// Acceptor that builds handlers bound to this broker.
    pub fn acceptor(&self) -> ConnectionAcceptor {
        self.inner.acceptor.clone()
    }

    pub fn launch_metrics(&self) -> LaunchMetrics {
        LaunchMetrics::new(self.inner.launch_metrics.clone())
    }

    pub fn handler_metrics(&self) -> HandlerMetrics {
        HandlerMetrics::new(self.inner.handler_metrics.clone())
    }

    pub fn status(&self, key: &ChaincodeKey) -> WorkerStatus {
        self.inner.registry.status(key)
    }

    // ========================================================================
    // LAUNCH
    // ========================================================================

    /// Ensure `name:version` is running on `channel_id` and return its handler.
    ///
    /// A ready handler is returned immediately. Otherwise the definition is
    /// resolved and the container launched.
    ///
    /// # Errors
    ///
    /// - `DefinitionNotFound` if the chaincode is not defined (or is defined
    ///   at another version)
    /// - `LaunchFailed` wrapping the launch error
    /// - `RegistrationMissing` if the launch succeeded without a handler
    pub async fn launch(
        &self,
        channel_id: &str,
        name: &str,
        version: &str,
        query: Option<&dyn QueryExecutor>,
    ) -> ChaincodeResult<Arc<Handler>> {
        let key = ChaincodeKey::new(name, version);
        if let Some(handler) = self.inner.registry.handler(&key) {
            return Ok(handler);
        }

        let info = self
            .inner
            .lifecycle
            .chaincode_container_info(channel_id, name, query)?;
        if info.version != version {
            return Err(ChaincodeError::DefinitionNotFound {
                channel_id: channel_id.to_string(),
                name: name.to_string(),
                reason: format!(
                    "defined version is {}, requested {}",
                    info.version, version
                ),
            });
        }

        self.launch_container(channel_id, &info).await
    }

    /// Launch directly from a descriptor, without a definition lookup.
    pub async fn launch_container(
        &self,
        channel_id: &str,
        info: &ContainerInfo,
    ) -> ChaincodeResult<Arc<Handler>> {
        let key = info.key();
        if let Some(handler) = self.inner.registry.handler(&key) {
            return Ok(handler);
        }

        self.inner
            .launcher
            .launch(info)
            .await
            .map_err(|e| ChaincodeError::LaunchFailed {
                channel_id: channel_id.to_string(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        self.inner
            .registry
            .handler(&key)
            .ok_or_else(|| ChaincodeError::RegistrationMissing {
                channel_id: channel_id.to_string(),
                key: key.to_string(),
            })
    }

    /// Stop the container for `info`. Succeeds if it is not running.
    pub async fn stop(&self, info: &ContainerInfo) -> ChaincodeResult<()> {
        tracing::debug!(chaincode = %info.key(), "Stopping chaincode");
        self.inner.runtime.stop(info).await
    }

    /// Serve a stream from a chaincode that dialed in. Returns when it ends.
    pub async fn handle_incoming_connection(
        &self,
        stream: Arc<dyn ChaincodeStream>,
    ) -> ChaincodeResult<()> {
        self.inner.acceptor.handle_stream(stream).await
    }

    // ========================================================================
    // EXECUTE
    // ========================================================================

    /// Launch if needed, then send INIT.
    pub async fn invoke_init(
        &self,
        params: &TransactionParams,
        context: &ChaincodeContext,
        input: ChaincodeInput,
    ) -> ChaincodeResult<ExecutionResult> {
        let handler = self.launch_for(params, context).await?;
        self.execute(&handler, params, context, input, MessageKind::Init)
            .await
    }

    /// Launch if needed, then send TRANSACTION.
    pub async fn invoke(
        &self,
        params: &TransactionParams,
        context: &ChaincodeContext,
        input: ChaincodeInput,
    ) -> ChaincodeResult<ExecutionResult> {
        let handler = self.launch_for(params, context).await?;
        self.execute(&handler, params, context, input, MessageKind::Transaction)
            .await
    }

    /// Launch from `info` and send INIT, for chaincodes deployed without a
    /// channel definition.
    pub async fn execute_legacy_init(
        &self,
        params: &TransactionParams,
        info: &ContainerInfo,
        input: ChaincodeInput,
    ) -> ChaincodeResult<ExecutionResult> {
        let context = ChaincodeContext::new(&info.name, &info.version);
        let handler = self.launch_container(&params.channel_id, info).await?;
        self.execute(&handler, params, &context, input, MessageKind::Init)
            .await
    }

    async fn launch_for(
        &self,
        params: &TransactionParams,
        context: &ChaincodeContext,
    ) -> ChaincodeResult<Arc<Handler>> {
        self.launch(
            &params.channel_id,
            &context.name,
            &context.version,
            params.query.as_deref(),
        )
        .await
    }

    async fn execute(
        &self,
        handler: &Handler,
        params: &TransactionParams,
        context: &ChaincodeContext,
        mut input: ChaincodeInput,
        kind: MessageKind,
    ) -> ChaincodeResult<ExecutionResult> {
        input.decorations = params.proposal_decorations.clone();
        let msg = ChaincodeMessage::new(
            kind,
            &params.tx_id,
            &params.channel_id,
            input.encode_to_vec(),
        );

        let reply = handler
            .execute(params, msg, self.inner.config.execute_timeout())
            .await
            .map_err(|e| ChaincodeError::ExecutionFailed {
                txid: params.tx_id.clone(),
                source: Box::new(e),
            })?;

        process_chaincode_execution_result(&params.tx_id, &context.name, reply)
    }
}

/// Turn a chaincode's reply into a typed result.
///
/// COMPLETED decodes into a [`Response`] (with the event stamped with the
/// chaincode name and txid), ERROR becomes `RemoteExecutionError`, anything
/// else is `UnexpectedMessageKind`.
pub fn process_chaincode_execution_result(
    txid: &str,
    chaincode_name: &str,
    reply: ChaincodeMessage,
) -> ChaincodeResult<ExecutionResult> {
    match reply.message_kind()? {
        MessageKind::Completed => {
            let response = Response::decode(reply.payload.as_slice()).map_err(|e| {
                ChaincodeError::MalformedResponse {
                    txid: txid.to_string(),
                    reason: e.to_string(),
                }
            })?;
            let event = reply.chaincode_event.map(|mut event| {
                event.chaincode_id = chaincode_name.to_string();
                event.tx_id = txid.to_string();
                event
            });
            Ok(ExecutionResult { response, event })
        }
        MessageKind::Error => Err(ChaincodeError::RemoteExecutionError {
            txid: txid.to_string(),
            message: reply.payload_text(),
        }),
        other => Err(ChaincodeError::UnexpectedMessageKind {
            txid: txid.to_string(),
            kind: other.to_string(),
        }),
    }
}

// Compile-time assertion: the broker is shared across request tasks.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ChaincodeSupport>();
};
