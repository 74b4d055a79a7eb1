//! Per-chaincode protocol engine.
//!
//! A [`Handler`] owns the stream to one chaincode. Its read loop
//! ([`Handler::process_stream`]) performs registration and routes responses
//! to the callers blocked in [`Handler::execute`], correlating on
//! `(txid, channel_id)`.

mod transactions;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use ccsupport_shared::{ChaincodeId, ChaincodeKey, ChaincodeMessage, MessageKind};
use parking_lot::Mutex;
use prost::Message;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::InitPolicy;
use crate::metrics::HandlerMetricsStorage;
use crate::registry::HandlerRegistry;
use crate::transport::ChaincodeStream;
use crate::types::TransactionParams;

use transactions::{PendingGuard, TransactionContexts};

// ============================================================================
// HANDLER STATE
// ============================================================================

/// Protocol state of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Stream accepted, waiting for REGISTER.
    Created,
    /// REGISTERED sent, READY not yet sent.
    Established,
    /// Serving requests.
    Ready,
    /// Stream ended; no new work is accepted.
    Closed,
}

impl HandlerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerState::Created => "created",
            HandlerState::Established => "established",
            HandlerState::Ready => "ready",
            HandlerState::Closed => "closed",
        }
    }
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings applied to every handler built by an acceptor.
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    /// Interval between KEEPALIVE messages, `None` to disable.
    pub keepalive: Option<Duration>,
    pub init_policy: InitPolicy,
}

// ============================================================================
// HANDLER
// ============================================================================

pub struct Handler {
    stream: Arc<dyn ChaincodeStream>,
    registry: Arc<HandlerRegistry>,
    options: HandlerOptions,
    metrics: HandlerMetricsStorage,
    transactions: TransactionContexts,
    key: Mutex<Option<ChaincodeKey>>,
    state: Mutex<HandlerState>,
    /// Channels with a successful INIT, tracked under `InitPolicy::ExactlyOnce`
    initialized: Mutex<HashSet<String>>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("key", &self.key())
            .field("state", &self.state())
            .field("pending", &self.pending_transactions())
            .finish()
    }
}

impl Handler {
    pub fn new(
        stream: Arc<dyn ChaincodeStream>,
        registry: Arc<HandlerRegistry>,
        options: HandlerOptions,
        metrics: HandlerMetricsStorage,
    ) -> Arc<Self> {
        Arc::new(Self {
            stream,
            registry,
            options,
            metrics,
            transactions: TransactionContexts::new(),
            key: Mutex::new(None),
            state: Mutex::new(HandlerState::Created),
            initialized: Mutex::new(HashSet::new()),
        })
    }

    /// Identity announced by the chaincode, once registered.
    pub fn key(&self) -> Option<ChaincodeKey> {
        self.key.lock().clone()
    }

    pub fn state(&self) -> HandlerState {
        *self.state.lock()
    }

    /// Number of transactions waiting for a response.
    pub fn pending_transactions(&self) -> usize {
        self.transactions.len()
    }

    fn set_state(&self, state: HandlerState) -> HandlerState {
        std::mem::replace(&mut *self.state.lock(), state)
    }

    fn key_label(&self) -> String {
        self.key()
            .map(|key| key.to_string())
            .unwrap_or_else(|| "<unregistered>".to_string())
    }

    // ========================================================================
    // EXECUTE
    // ========================================================================

    /// Send `msg` as a request for `params` and wait for the correlated reply.
    ///
    /// The reply is returned as received; interpreting COMPLETED versus ERROR
    /// is up to the caller. The pending entry is removed on every path.
    ///
    /// # Errors
    ///
    /// - `DuplicateTransaction` if `(tx_id, channel_id)` is already pending
    /// - `StreamClosed` if the handler is not serving or the stream ends
    /// - `ExecuteTimeout` if nothing correlated arrives within `timeout`
    /// - `InitRequired` / `AlreadyInitialized` under `InitPolicy::ExactlyOnce`
    pub async fn execute(
        &self,
        params: &TransactionParams,
        mut msg: ChaincodeMessage,
        timeout: Duration,
    ) -> ChaincodeResult<ChaincodeMessage> {
        msg.txid = params.tx_id.clone();
        msg.channel_id = params.channel_id.clone();
        let kind = msg.message_kind()?;

        let state = self.state();
        if state != HandlerState::Ready {
            return Err(ChaincodeError::StreamClosed {
                reason: format!("handler for {} is {}", self.key_label(), state),
            });
        }
        self.check_init_policy(kind, &params.channel_id)?;

        let slot = self.transactions.create(&params.tx_id, &params.channel_id)?;
        let _guard = PendingGuard {
            contexts: &self.transactions,
            txid: &params.tx_id,
            channel_id: &params.channel_id,
        };

        HandlerMetricsStorage::inc(&self.metrics.executes);
        tracing::debug!(
            chaincode = %self.key_label(),
            txid = %params.tx_id,
            channel = %params.channel_id,
            kind = %kind,
            "Sending request"
        );

        // one deadline covers the send too: a chaincode that stops reading
        // must not hold the caller past `timeout`
        let exchange = async {
            self.stream.send(msg).await?;
            match slot.await {
                Ok(reply) => reply,
                Err(_) => Err(ChaincodeError::StreamClosed {
                    reason: "handler dropped the pending transaction".into(),
                }),
            }
        };
        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                HandlerMetricsStorage::inc(&self.metrics.execute_timeouts);
                return Err(ChaincodeError::ExecuteTimeout {
                    key: self.key_label(),
                    channel_id: params.channel_id.clone(),
                    txid: params.tx_id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        match &result {
            Ok(reply) => {
                if kind == MessageKind::Init
                    && reply.message_kind().ok() == Some(MessageKind::Completed)
                {
                    self.initialized.lock().insert(params.channel_id.clone());
                }
            }
            Err(e) => {
                HandlerMetricsStorage::inc(&self.metrics.execute_errors);
                tracing::debug!(txid = %params.tx_id, error = %e, "Request failed");
            }
        }
        result
    }

    fn check_init_policy(&self, kind: MessageKind, channel_id: &str) -> ChaincodeResult<()> {
        if self.options.init_policy != InitPolicy::ExactlyOnce {
            return Ok(());
        }
        let initialized = self.initialized.lock().contains(channel_id);
        match kind {
            MessageKind::Init if initialized => Err(ChaincodeError::AlreadyInitialized {
                key: self.key_label(),
                channel_id: channel_id.to_string(),
            }),
            MessageKind::Transaction if !initialized => Err(ChaincodeError::InitRequired {
                key: self.key_label(),
                channel_id: channel_id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // READ LOOP
    // ========================================================================

    /// Drive the stream until it ends.
    ///
    /// On exit every pending transaction fails with `StreamClosed`, the
    /// handler refuses new work, and its key leaves the registry.
    pub async fn process_stream(self: &Arc<Self>) -> ChaincodeResult<()> {
        let mut keepalive = self.options.keepalive.map(|period| {
            let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        // keepalives go out on their own task so a chaincode that stops
        // reading never stalls delivery of its responses
        let mut keepalive_send: Option<JoinHandle<()>> = None;

        let result = loop {
            let next = tokio::select! {
                next = self.stream.recv() => next,
                _ = tick(&mut keepalive) => {
                    if keepalive_send.as_ref().is_some_and(|task| !task.is_finished()) {
                        tracing::debug!(chaincode = %self.key_label(), "Previous keepalive still in flight, skipping");
                    } else {
                        keepalive_send = Some(self.spawn_keepalive());
                    }
                    continue;
                }
            };

            match next {
                Ok(Some(msg)) => {
                    if let Err(e) = self.handle_message(msg).await {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        if let Some(task) = keepalive_send {
            task.abort();
        }

        let reason = match &result {
            Ok(()) => "chaincode closed the stream".to_string(),
            Err(e) => e.to_string(),
        };
        self.close(reason);
        result
    }

    /// Send one KEEPALIVE, giving up after one keepalive period.
    fn spawn_keepalive(&self) -> JoinHandle<()> {
        let stream = Arc::clone(&self.stream);
        let period = self.options.keepalive.unwrap_or_default();
        let chaincode = self.key_label();
        tokio::spawn(async move {
            let send = stream.send(ChaincodeMessage::control(MessageKind::Keepalive));
            match tokio::time::timeout(period, send).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(chaincode = %chaincode, error = %e, "Failed to send keepalive");
                }
                Err(_) => {
                    tracing::warn!(chaincode = %chaincode, "Keepalive not accepted within one period");
                }
            }
        })
    }

    async fn handle_message(self: &Arc<Self>, msg: ChaincodeMessage) -> ChaincodeResult<()> {
        let state = self.state();
        if state == HandlerState::Created {
            return match msg.message_kind() {
                Ok(MessageKind::Register) => self.handle_register(msg).await,
                _ => Err(ChaincodeError::Protocol(format!(
                    "[{}] chaincode sent {} before registering",
                    msg.txid,
                    msg.kind_name()
                ))),
            };
        }

        let Some(msg) = self.transactions.deliver(msg) else {
            return Ok(());
        };

        match msg.message_kind() {
            Ok(MessageKind::Keepalive) => {
                tracing::trace!(chaincode = %self.key_label(), "Keepalive received");
            }
            Ok(kind) if kind.is_response() => {
                HandlerMetricsStorage::inc(&self.metrics.late_responses);
                tracing::debug!(
                    chaincode = %self.key_label(),
                    txid = %msg.txid,
                    channel = %msg.channel_id,
                    kind = %kind,
                    "Dropping response with no pending transaction"
                );
            }
            _ => {
                tracing::warn!(
                    chaincode = %self.key_label(),
                    txid = %msg.txid,
                    kind = %msg.kind_name(),
                    state = %state,
                    "Ignoring unsolicited message"
                );
            }
        }
        Ok(())
    }

    async fn handle_register(self: &Arc<Self>, msg: ChaincodeMessage) -> ChaincodeResult<()> {
        let id = ChaincodeId::decode(msg.payload.as_slice())?;
        let key = if id.version.is_empty() {
            id.name.parse::<ChaincodeKey>()?
        } else {
            ChaincodeKey::new(id.name, id.version)
        };

        if let Err(e) = self.registry.check_registration(&key) {
            tracing::warn!(chaincode = %key, error = %e, "Registration rejected");
            self.send_error(&e).await;
            return Err(e);
        }
        *self.key.lock() = Some(key.clone());

        if let Err(e) = self
            .stream
            .send(ChaincodeMessage::control(MessageKind::Registered))
            .await
        {
            self.registry.failed(&key, e.clone());
            return Err(e);
        }
        self.set_state(HandlerState::Established);
        tracing::debug!(chaincode = %key, "Sent REGISTERED");

        if let Err(e) = self
            .stream
            .send(ChaincodeMessage::control(MessageKind::Ready))
            .await
        {
            self.registry.failed(&key, e.clone());
            return Err(e);
        }
        self.set_state(HandlerState::Ready);

        if let Err(e) = self.registry.register_ready(&key, Arc::clone(self)) {
            tracing::warn!(chaincode = %key, error = %e, "Registration lost a race");
            self.send_error(&e).await;
            return Err(e);
        }

        HandlerMetricsStorage::inc(&self.metrics.registrations);
        tracing::info!(chaincode = %key, "Chaincode registered and ready");
        Ok(())
    }

    async fn send_error(&self, err: &ChaincodeError) {
        let reply = ChaincodeMessage::new(MessageKind::Error, "", "", err.to_string().into_bytes());
        if let Err(e) = self.stream.send(reply).await {
            tracing::debug!(error = %e, "Failed to send ERROR to chaincode");
        }
    }

    fn close(self: &Arc<Self>, reason: String) {
        let previous = self.set_state(HandlerState::Closed);
        let err = ChaincodeError::StreamClosed { reason };
        let failed = self.transactions.close(err.clone());

        if let Some(key) = self.key() {
            if previous == HandlerState::Established {
                // registered but never became ready: release the launch waiting on us
                self.registry.failed(&key, err.clone());
            }
            self.registry.remove_handler(&key, self);
        }

        tracing::info!(
            chaincode = %self.key_label(),
            pending_failed = failed,
            reason = %err,
            "Chaincode stream closed"
        );
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// Compile-time assertion: handlers are shared across tasks.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Handler>();
};
