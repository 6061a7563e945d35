//! Watch-channel backed holder for [`ConsumerState`].

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{ConsumerError, Result};
use crate::types::ConsumerState;

/// Holds the current [`ConsumerState`] and lets any number of observers wait
/// for it to change.
///
/// Final states are sticky: once a final state is stored, later transitions
/// are ignored.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ConsumerState>,
}

impl StateCell {
    pub fn new(initial: ConsumerState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> ConsumerState {
        *self.tx.borrow()
    }

    /// Move to `next` unless a final state is already stored. Returns whether
    /// the cell holds `next` afterwards.
    pub fn transition(&self, next: ConsumerState) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_final() || *state == next {
                return false;
            }
            *state = next;
            true
        });
        self.current() == next
    }

    /// Suspend until the state is something other than `from`.
    pub async fn changed_from(
        &self,
        from: ConsumerState,
        cancel: &CancellationToken,
    ) -> Result<ConsumerState> {
        self.wait_until(|state| state != from, cancel).await
    }

    /// Suspend until the state equals `to`, or a final state makes that
    /// impossible. Returns the state observed either way.
    pub async fn changed_to(
        &self,
        to: ConsumerState,
        cancel: &CancellationToken,
    ) -> Result<ConsumerState> {
        self.wait_until(|state| state == to, cancel).await
    }

    async fn wait_until(
        &self,
        predicate: impl Fn(ConsumerState) -> bool,
        cancel: &CancellationToken,
    ) -> Result<ConsumerState> {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            // Nothing follows a final state.
            if predicate(state) || state.is_final() {
                return Ok(state);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ConsumerError::OperationCancelled),
                changed = rx.changed() => {
                    // The sender lives in `self`, so this only fails if the
                    // cell itself is gone.
                    changed.map_err(|_| ConsumerError::ConsumerClosed)?;
                }
            }
        }
    }
}
