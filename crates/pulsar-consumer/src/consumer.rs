//! The consumer contract, split into the capabilities it is composed of.
//!
//! Each capability is its own trait so a partial implementation (a test
//! double that only receives, say) can satisfy exactly what it supports.
//! [`Consumer`] ties them together with the subscription identity and
//! [`unsubscribe`](Consumer::unsubscribe).
//!
//! Every suspending operation takes a [`CancellationToken`]; pass a fresh
//! token to wait without a caller-side cancellation.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{ConsumerState, Message, MessageId, SubscriptionType};

/// Single-message receive primitive.
#[async_trait]
pub trait Receive: Send + Sync {
    /// Yield the next available message, suspending until one arrives.
    ///
    /// Fails with [`OperationCancelled`](crate::ConsumerError::OperationCancelled)
    /// when `cancel` fires first, and with
    /// [`ConsumerClosed`](crate::ConsumerError::ConsumerClosed) once the
    /// handle is disposed or unsubscribed.
    async fn receive(&self, cancel: CancellationToken) -> Result<Message>;
}

/// Acknowledgment capability. All operations are idempotent.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Mark one message as processed.
    async fn acknowledge(&self, id: MessageId, cancel: &CancellationToken) -> Result<()>;

    /// Mark a batch of messages as processed. Duplicates in `ids` are harmless.
    async fn acknowledge_many(&self, ids: &[MessageId], cancel: &CancellationToken) -> Result<()>;

    /// Mark every outstanding message up to and including `id` as processed,
    /// as one unit.
    ///
    /// Only exclusive and failover subscriptions support this; other types
    /// fail with [`UnsupportedOperation`](crate::ConsumerError::UnsupportedOperation).
    async fn acknowledge_cumulative(&self, id: MessageId, cancel: &CancellationToken)
    -> Result<()>;
}

/// Redelivery of delivered-but-unacknowledged messages.
///
/// No ordering guarantee relative to other consumers of the same subscription.
#[async_trait]
pub trait Redeliver: Send + Sync {
    async fn redeliver_unacknowledged(
        &self,
        ids: &[MessageId],
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn redeliver_all_unacknowledged(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Cursor repositioning.
#[async_trait]
pub trait Seek: Send + Sync {
    /// Resume delivery from `id`. Accepts [`MessageId::EARLIEST`] and
    /// [`MessageId::LATEST`].
    async fn seek(&self, id: MessageId, cancel: &CancellationToken) -> Result<()>;

    /// Resume delivery from the first message published at or after
    /// `publish_time` (milliseconds since the Unix epoch).
    async fn seek_to_time(&self, publish_time: u64, cancel: &CancellationToken) -> Result<()>;
}

#[async_trait]
pub trait GetLastMessageIds: Send + Sync {
    /// Ids of the most recently published messages, one per partition.
    /// Empty when nothing has been published.
    async fn last_message_ids(&self, cancel: &CancellationToken) -> Result<Vec<MessageId>>;
}

/// Read-only view of a [`ConsumerState`] owned by the connection layer.
#[async_trait]
pub trait StateHolder: Send + Sync {
    fn state(&self) -> ConsumerState;

    fn is_final_state(&self) -> bool {
        self.state().is_final()
    }

    /// Suspend until the state differs from `state`, returning the new value.
    async fn state_changed_from(
        &self,
        state: ConsumerState,
        cancel: &CancellationToken,
    ) -> Result<ConsumerState>;

    /// Suspend until the state becomes `state`. Returns early with the final
    /// state if one is reached first.
    async fn state_changed_to(
        &self,
        state: ConsumerState,
        cancel: &CancellationToken,
    ) -> Result<ConsumerState>;
}

/// Scoped release of broker-side resources.
#[async_trait]
pub trait Dispose: Send + Sync {
    /// Release everything held for the subscription without deleting it.
    ///
    /// Pending and future receives fail with
    /// [`ConsumerClosed`](crate::ConsumerError::ConsumerClosed). Calling this
    /// more than once is a no-op.
    async fn dispose(&self);
}

/// A topic-subscription handle.
#[async_trait]
pub trait Consumer:
    Receive + Acknowledge + Redeliver + Seek + GetLastMessageIds + StateHolder + Dispose
{
    fn service_url(&self) -> &url::Url;
    fn subscription_name(&self) -> &str;
    fn subscription_type(&self) -> SubscriptionType;
    fn topic(&self) -> &str;

    /// Delete the subscription on the broker. Terminal: the handle is closed
    /// afterwards and every later operation fails with
    /// [`ConsumerClosed`](crate::ConsumerError::ConsumerClosed).
    async fn unsubscribe(&self, cancel: &CancellationToken) -> Result<()>;
}
