//! One-shot launch outcome shared by every caller racing on the same key.

use std::sync::Arc;

use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use tokio::sync::watch;

/// Completion signal for one launch attempt.
///
/// Starts pending and resolves exactly once, to success or to an error. Any
/// number of clones may wait on it or poll it. A new attempt for the same key
/// always gets a fresh `LaunchState`.
#[derive(Clone, Debug)]
pub struct LaunchState {
    outcome: Arc<watch::Sender<Option<ChaincodeResult<()>>>>,
}

impl LaunchState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            outcome: Arc::new(tx),
        }
    }

    /// A state that is already resolved.
    pub fn resolved(result: ChaincodeResult<()>) -> Self {
        let (tx, _rx) = watch::channel(Some(result));
        Self {
            outcome: Arc::new(tx),
        }
    }

    /// Record the outcome. Returns `false` if one was already recorded, in
    /// which case `result` is discarded.
    pub fn notify(&self, result: ChaincodeResult<()>) -> bool {
        let mut result = Some(result);
        self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = result.take();
            true
        })
    }

    /// Wait until the outcome is recorded and return it.
    pub async fn done(&self) -> ChaincodeResult<()> {
        let mut rx = self.outcome.subscribe();
        let outcome = rx.wait_for(Option::is_some).await.map(|slot| slot.clone());
        match outcome {
            Ok(Some(result)) => result,
            // the sender lives in `self`, so the channel cannot close while waiting
            _ => Err(ChaincodeError::Internal("launch state closed".into())),
        }
    }

    /// The recorded outcome, if any.
    pub fn outcome(&self) -> Option<ChaincodeResult<()>> {
        self.outcome.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.outcome.borrow(), Some(Err(_)))
    }
}

impl Default for LaunchState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_notify_wins() {
        let state = LaunchState::new();
        assert!(!state.is_done());

        assert!(state.notify(Err(ChaincodeError::Internal("first".into()))));
        assert!(!state.notify(Ok(())));

        assert_eq!(
            state.done().await,
            Err(ChaincodeError::Internal("first".into()))
        );
        assert!(state.is_failed());
    }

    #[tokio::test]
    async fn waiters_are_released_by_notify() {
        let state = LaunchState::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { state.done().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        state.notify(Ok(()));

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(()));
        }
    }

    #[tokio::test]
    async fn resolved_state_does_not_block() {
        let state = LaunchState::resolved(Ok(()));
        assert!(state.is_done());
        assert_eq!(state.outcome(), Some(Ok(())));
        assert_eq!(state.done().await, Ok(()));
    }
}
