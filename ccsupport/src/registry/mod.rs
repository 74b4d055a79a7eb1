//! Directory of launching and ready chaincodes.
//!
//! Every key is either absent, launching (an in-flight [`LaunchState`]) or
//! ready (a registered [`Handler`]). All transitions happen under one mutex,
//! which is what guarantees at most one launch attempt per key.

mod launch_state;

pub use launch_state::LaunchState;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ccsupport_shared::ChaincodeKey;
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use parking_lot::Mutex;

use crate::handler::Handler;

/// Externally visible state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Unregistered,
    Launching,
    Ready,
    /// Ready, with at least one transaction in flight.
    Executing,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Unregistered => "unregistered",
            WorkerStatus::Launching => "launching",
            WorkerStatus::Ready => "ready",
            WorkerStatus::Executing => "executing",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

enum Slot {
    Launching(LaunchState),
    Ready(Arc<Handler>),
}

/// Thread-safe registry shared by the launcher, the connection acceptor and
/// every handler.
pub struct HandlerRegistry {
    slots: Mutex<HashMap<ChaincodeKey, Slot>>,
    allow_unsolicited: bool,
}

impl HandlerRegistry {
    /// `allow_unsolicited` accepts registrations for keys with no launch in
    /// flight (development mode, chaincodes started by hand).
    pub fn new(allow_unsolicited: bool) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            allow_unsolicited,
        }
    }

    /// Atomically look up or create the launch state for `key`.
    ///
    /// Returns the state and whether a launch was already in flight (or the
    /// chaincode already ready). A ready chaincode yields a state that is
    /// already resolved successfully.
    pub fn launching(&self, key: &ChaincodeKey) -> (LaunchState, bool) {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(Slot::Launching(state)) => (state.clone(), true),
            Some(Slot::Ready(_)) => (LaunchState::resolved(Ok(())), true),
            None => {
                let state = LaunchState::new();
                tracing::debug!(chaincode = %key, "Launch state created");
                slots.insert(key.clone(), Slot::Launching(state.clone()));
                (state, false)
            }
        }
    }

    /// Check whether a registration for `key` would be admitted, without
    /// changing anything.
    pub fn check_registration(&self, key: &ChaincodeKey) -> ChaincodeResult<()> {
        let slots = self.slots.lock();
        self.admit(&slots, key)
    }

    fn admit(&self, slots: &HashMap<ChaincodeKey, Slot>, key: &ChaincodeKey) -> ChaincodeResult<()> {
        match slots.get(key) {
            Some(Slot::Ready(_)) => Err(ChaincodeError::DuplicateRegistration {
                key: key.to_string(),
            }),
            Some(Slot::Launching(state)) if !state.is_failed() => Ok(()),
            _ if self.allow_unsolicited => Ok(()),
            _ => Err(ChaincodeError::UnsolicitedRegistration {
                key: key.to_string(),
            }),
        }
    }

    /// Install `handler` as the ready handler for `key` and resolve the
    /// launch in flight, releasing every waiter.
    pub fn register_ready(&self, key: &ChaincodeKey, handler: Arc<Handler>) -> ChaincodeResult<()> {
        let mut slots = self.slots.lock();
        self.admit(&slots, key)?;

        let previous = slots.insert(key.clone(), Slot::Ready(handler));
        if let Some(Slot::Launching(state)) = previous {
            state.notify(Ok(()));
        }
        tracing::debug!(chaincode = %key, "Handler registered");
        Ok(())
    }

    /// Resolve the launch in flight for `key` with an error. The entry stays
    /// until the launcher deregisters it.
    pub fn failed(&self, key: &ChaincodeKey, err: ChaincodeError) {
        let slots = self.slots.lock();
        if let Some(Slot::Launching(state)) = slots.get(key) {
            tracing::debug!(chaincode = %key, error = %err, "Launch marked failed");
            state.notify(Err(err));
        }
    }

    /// Remove whatever entry `key` has.
    ///
    /// # Errors
    ///
    /// Returns `HandlerNotFound` if there was none.
    pub fn deregister(&self, key: &ChaincodeKey) -> ChaincodeResult<()> {
        match self.slots.lock().remove(key) {
            Some(_) => {
                tracing::debug!(chaincode = %key, "Deregistered");
                Ok(())
            }
            None => Err(ChaincodeError::HandlerNotFound {
                key: key.to_string(),
            }),
        }
    }

    /// Remove `key` only if its ready handler is `handler`.
    pub fn remove_handler(&self, key: &ChaincodeKey, handler: &Arc<Handler>) -> bool {
        let mut slots = self.slots.lock();
        let owned = matches!(slots.get(key), Some(Slot::Ready(current)) if Arc::ptr_eq(current, handler));
        if owned {
            slots.remove(key);
            tracing::debug!(chaincode = %key, "Handler removed");
        }
        owned
    }

    /// Ready handler for `key`, if any. Never blocks on a launch.
    pub fn handler(&self, key: &ChaincodeKey) -> Option<Arc<Handler>> {
        match self.slots.lock().get(key) {
            Some(Slot::Ready(handler)) => Some(Arc::clone(handler)),
            _ => None,
        }
    }

    pub fn status(&self, key: &ChaincodeKey) -> WorkerStatus {
        match self.slots.lock().get(key) {
            None => WorkerStatus::Unregistered,
            Some(Slot::Launching(_)) => WorkerStatus::Launching,
            Some(Slot::Ready(handler)) if handler.pending_transactions() > 0 => {
                WorkerStatus::Executing
            }
            Some(Slot::Ready(_)) => WorkerStatus::Ready,
        }
    }

    pub fn contains(&self, key: &ChaincodeKey) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Keys of all ready handlers.
    pub fn ready_keys(&self) -> Vec<ChaincodeKey> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ChaincodeKey {
        ChaincodeKey::new("cc1", "v1")
    }

    #[test]
    fn second_launching_call_joins_the_first() {
        let registry = HandlerRegistry::new(false);

        let (first, in_flight) = registry.launching(&key());
        assert!(!in_flight);
        let (second, in_flight) = registry.launching(&key());
        assert!(in_flight);

        first.notify(Ok(()));
        assert_eq!(second.outcome(), Some(Ok(())));
        assert_eq!(registry.status(&key()), WorkerStatus::Launching);
    }

    #[test]
    fn failed_resolves_in_flight_launch() {
        let registry = HandlerRegistry::new(false);
        let (state, _) = registry.launching(&key());

        registry.failed(&key(), ChaincodeError::Internal("boom".into()));

        assert!(state.is_failed());
        // entry survives until the launcher deregisters
        assert!(registry.contains(&key()));
        assert!(registry.deregister(&key()).is_ok());
        assert!(!registry.contains(&key()));
    }

    #[test]
    fn deregister_unknown_key_reports_not_found() {
        let registry = HandlerRegistry::new(false);
        assert!(matches!(
            registry.deregister(&key()),
            Err(ChaincodeError::HandlerNotFound { .. })
        ));
        assert_eq!(registry.status(&key()), WorkerStatus::Unregistered);
    }

    #[test]
    fn unsolicited_registration_depends_on_mode() {
        let strict = HandlerRegistry::new(false);
        assert!(matches!(
            strict.check_registration(&key()),
            Err(ChaincodeError::UnsolicitedRegistration { .. })
        ));

        let dev = HandlerRegistry::new(true);
        assert!(dev.check_registration(&key()).is_ok());
    }

    #[test]
    fn registration_after_failed_launch_is_unsolicited() {
        let registry = HandlerRegistry::new(false);
        let (state, _) = registry.launching(&key());
        assert!(registry.check_registration(&key()).is_ok());

        state.notify(Err(ChaincodeError::Internal("timed out".into())));
        assert!(matches!(
            registry.check_registration(&key()),
            Err(ChaincodeError::UnsolicitedRegistration { .. })
        ));
    }
}
