//! In-process consumer implementing the full [`Consumer`] contract.
//!
//! [`channel`] returns a [`MemoryProducer`] standing in for the broker and a
//! [`MemoryConsumer`] bound to one subscription. The consumer tracks
//! delivered-but-unacknowledged messages, an individual-ack set and a
//! cumulative ack floor the same way a broker-side cursor would.
//!
//! A receive removes its message from the backlog synchronously within a
//! single poll, so dropping or cancelling a receive never loses a message
//! here.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::consumer::{
    Acknowledge, Consumer, Dispose, GetLastMessageIds, Receive, Redeliver, Seek, StateHolder,
};
use crate::error::{ConsumerError, Result};
use crate::state::StateCell;
use crate::types::{ConsumerState, Message, MessageId, SubscriptionIdentity, SubscriptionType};

const LEDGER_ID: u64 = 1;

/// Create a connected producer/consumer pair for `identity`.
pub fn channel(identity: SubscriptionIdentity) -> (MemoryProducer, MemoryConsumer) {
    let shared = Arc::new(Shared {
        identity,
        state: StateCell::new(ConsumerState::Active),
        available: Notify::new(),
        inner: Mutex::new(Inner::default()),
    });
    (
        MemoryProducer {
            shared: Arc::clone(&shared),
        },
        MemoryConsumer { shared },
    )
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    /// Every published message, in id order.
    log: Vec<Message>,
    /// Messages waiting to be handed out.
    backlog: VecDeque<Message>,
    /// Handed out, not yet acknowledged.
    unacked: BTreeMap<MessageId, Message>,
    /// Individually acknowledged ids above `ack_floor`.
    acked: BTreeSet<MessageId>,
    /// Everything at or below this id is acknowledged.
    ack_floor: Option<MessageId>,
    /// Highest id handed out so far.
    delivered_max: Option<MessageId>,
    next_entry: u64,
    closed: bool,
}

impl Inner {
    fn is_acked(&self, id: &MessageId) -> bool {
        self.ack_floor.is_some_and(|floor| *id <= floor) || self.acked.contains(id)
    }

    /// Delivered, then handed back to the backlog for redelivery.
    fn is_redelivering(&self, id: &MessageId) -> bool {
        self.delivered_max.is_some_and(|max| *id <= max)
            && self.backlog.iter().any(|m| m.id == *id)
    }

    fn is_known(&self, id: &MessageId) -> bool {
        self.unacked.contains_key(id) || self.is_acked(id) || self.is_redelivering(id)
    }

    fn advance_floor(&mut self, id: MessageId) {
        let floor = self.ack_floor.map_or(id, |f| f.max(id));
        self.ack_floor = Some(floor);
        self.acked.retain(|acked| *acked > floor);
    }

    fn reset_cursor(&mut self, backlog: VecDeque<Message>) {
        self.backlog = backlog;
        self.unacked.clear();
        self.acked.clear();
        self.ack_floor = None;
        self.delivered_max = None;
    }
}

struct Shared {
    identity: SubscriptionIdentity,
    state: StateCell,
    available: Notify,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock, failing if the handle has been closed.
    fn lock_open(&self, cancel: &CancellationToken) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.lock();
        if inner.closed {
            return Err(ConsumerError::ConsumerClosed);
        }
        if cancel.is_cancelled() {
            return Err(ConsumerError::OperationCancelled);
        }
        Ok(inner)
    }

    fn next_message(&self) -> Result<Option<Message>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(ConsumerError::ConsumerClosed);
        }
        let Some(message) = inner.backlog.pop_front() else {
            return Ok(None);
        };
        inner.unacked.insert(message.id, message.clone());
        inner.delivered_max = Some(inner.delivered_max.map_or(message.id, |m| m.max(message.id)));
        Ok(Some(message))
    }

    /// Close the handle, moving to `final_state`. Returns `false` if it was
    /// already closed.
    fn close(&self, final_state: ConsumerState) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            inner.closed = true;
            inner.backlog.clear();
            inner.unacked.clear();
            inner.acked.clear();
        }
        self.state.transition(final_state);
        self.available.notify_waiters();
        true
    }
}

// ---------------------------------------------------------------------------
// Producer side
// ---------------------------------------------------------------------------

/// A message to publish through a [`MemoryProducer`].
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    payload: Bytes,
    key: Option<String>,
    properties: HashMap<String, String>,
    publish_time: Option<u64>,
}

impl OutgoingMessage {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Override the publish timestamp (milliseconds since the Unix epoch).
    pub fn publish_time(mut self, publish_time: u64) -> Self {
        self.publish_time = Some(publish_time);
        self
    }
}

/// Broker-side handle of an in-memory subscription.
pub struct MemoryProducer {
    shared: Arc<Shared>,
}

impl MemoryProducer {
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<MessageId> {
        self.send_message(OutgoingMessage::new(payload))
    }

    /// Append a message to the topic and make it available for delivery.
    pub fn send_message(&self, outgoing: OutgoingMessage) -> Result<MessageId> {
        let id = {
            let mut inner = self.shared.lock();
            if inner.closed {
                return Err(ConsumerError::ConsumerClosed);
            }
            let id = MessageId::new(LEDGER_ID, inner.next_entry, -1, -1);
            inner.next_entry += 1;
            let message = Message {
                id,
                payload: outgoing.payload,
                key: outgoing.key,
                properties: outgoing.properties,
                publish_time: outgoing.publish_time.unwrap_or_else(now_ms),
                redelivery_count: 0,
            };
            inner.log.push(message.clone());
            inner.backlog.push_back(message);
            id
        };
        self.shared.available.notify_waiters();
        Ok(id)
    }

    /// Drive the consumer's observable state, as a connection layer would.
    pub fn set_state(&self, state: ConsumerState) -> bool {
        self.shared.state.transition(state)
    }

    /// Messages waiting for delivery.
    pub fn backlog_len(&self) -> usize {
        self.shared.lock().backlog.len()
    }

    /// Messages delivered and not yet acknowledged.
    pub fn unacked_len(&self) -> usize {
        self.shared.lock().unacked.len()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Consumer side
// ---------------------------------------------------------------------------

/// Subscription handle backed by in-process state.
///
/// Dropping the handle disposes it.
pub struct MemoryConsumer {
    shared: Arc<Shared>,
}

impl MemoryConsumer {
    pub fn identity(&self) -> &SubscriptionIdentity {
        &self.shared.identity
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.shared.close(ConsumerState::Closed);
    }
}

#[async_trait]
impl Receive for MemoryConsumer {
    async fn receive(&self, cancel: CancellationToken) -> Result<Message> {
        loop {
            // Register interest before checking the backlog so a publish in
            // between is not missed.
            let mut notified = pin!(self.shared.available.notified());
            notified.as_mut().enable();

            if let Some(message) = self.shared.next_message()? {
                return Ok(message);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ConsumerError::OperationCancelled),
                _ = notified.as_mut() => {}
            }
        }
    }
}

#[async_trait]
impl Acknowledge for MemoryConsumer {
    async fn acknowledge(&self, id: MessageId, cancel: &CancellationToken) -> Result<()> {
        self.acknowledge_many(&[id], cancel).await
    }

    async fn acknowledge_many(&self, ids: &[MessageId], cancel: &CancellationToken) -> Result<()> {
        let mut inner = self.shared.lock_open(cancel)?;
        if let Some(unknown) = ids.iter().find(|id| !inner.is_known(id)) {
            return Err(ConsumerError::ConsumerFault(format!(
                "unknown message id {unknown}"
            )));
        }
        for id in ids {
            if inner.unacked.remove(id).is_some() {
                inner.acked.insert(*id);
            } else if inner.is_redelivering(id) {
                inner.backlog.retain(|m| m.id != *id);
                inner.acked.insert(*id);
            }
        }
        debug!(
            topic = %self.shared.identity.topic,
            subscription = %self.shared.identity.subscription_name,
            count = ids.len(),
            "acknowledged messages"
        );
        Ok(())
    }

    async fn acknowledge_cumulative(
        &self,
        id: MessageId,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let subscription_type = self.shared.identity.subscription_type;
        if !subscription_type.supports_cumulative_ack() {
            return Err(ConsumerError::UnsupportedOperation {
                operation: "acknowledge_cumulative",
                subscription_type,
            });
        }

        let mut inner = self.shared.lock_open(cancel)?;
        let within_window = inner.delivered_max.is_some_and(|max| id <= max);
        if !within_window && !inner.is_acked(&id) {
            return Err(ConsumerError::ConsumerFault(format!(
                "unknown message id {id}"
            )));
        }

        let remaining = inner.unacked.split_off(&id);
        let covered = std::mem::replace(&mut inner.unacked, remaining);
        // `split_off` keeps `id` itself in the upper half.
        let exact = inner.unacked.remove(&id).is_some();
        inner.backlog.retain(|m| m.id > id);
        inner.advance_floor(id);

        debug!(
            topic = %self.shared.identity.topic,
            subscription = %self.shared.identity.subscription_name,
            %id,
            count = covered.len() + usize::from(exact),
            "cumulatively acknowledged messages"
        );
        Ok(())
    }
}

#[async_trait]
impl Redeliver for MemoryConsumer {
    async fn redeliver_unacknowledged(
        &self,
        ids: &[MessageId],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let count = {
            let mut inner = self.shared.lock_open(cancel)?;
            let mut returned: Vec<Message> = ids
                .iter()
                .filter_map(|id| inner.unacked.remove(id))
                .collect();
            returned.sort_by_key(|m| m.id);
            requeue(&mut inner, returned)
        };
        debug!(
            topic = %self.shared.identity.topic,
            subscription = %self.shared.identity.subscription_name,
            requested = ids.len(),
            count,
            "redelivering messages"
        );
        self.shared.available.notify_waiters();
        Ok(())
    }

    async fn redeliver_all_unacknowledged(&self, cancel: &CancellationToken) -> Result<()> {
        let count = {
            let mut inner = self.shared.lock_open(cancel)?;
            let returned: Vec<Message> = std::mem::take(&mut inner.unacked).into_values().collect();
            requeue(&mut inner, returned)
        };
        debug!(
            topic = %self.shared.identity.topic,
            subscription = %self.shared.identity.subscription_name,
            count,
            "redelivering all unacknowledged messages"
        );
        self.shared.available.notify_waiters();
        Ok(())
    }
}

/// Put `returned` (sorted by id) at the head of the backlog.
fn requeue(inner: &mut Inner, returned: Vec<Message>) -> usize {
    let count = returned.len();
    for mut message in returned.into_iter().rev() {
        message.redelivery_count += 1;
        inner.backlog.push_front(message);
    }
    count
}

#[async_trait]
impl Seek for MemoryConsumer {
    async fn seek(&self, id: MessageId, cancel: &CancellationToken) -> Result<()> {
        {
            let mut inner = self.shared.lock_open(cancel)?;
            let backlog = if id == MessageId::EARLIEST {
                inner.log.iter().cloned().collect()
            } else if id == MessageId::LATEST {
                VecDeque::new()
            } else {
                inner.log.iter().filter(|m| m.id >= id).cloned().collect()
            };
            inner.reset_cursor(backlog);
        }
        debug!(
            topic = %self.shared.identity.topic,
            subscription = %self.shared.identity.subscription_name,
            %id,
            "seeked to message id"
        );
        self.shared.available.notify_waiters();
        Ok(())
    }

    async fn seek_to_time(&self, publish_time: u64, cancel: &CancellationToken) -> Result<()> {
        {
            let mut inner = self.shared.lock_open(cancel)?;
            let backlog = inner
                .log
                .iter()
                .filter(|m| m.publish_time >= publish_time)
                .cloned()
                .collect();
            inner.reset_cursor(backlog);
        }
        debug!(
            topic = %self.shared.identity.topic,
            subscription = %self.shared.identity.subscription_name,
            publish_time,
            "seeked to publish time"
        );
        self.shared.available.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl GetLastMessageIds for MemoryConsumer {
    async fn last_message_ids(&self, cancel: &CancellationToken) -> Result<Vec<MessageId>> {
        let inner = self.shared.lock_open(cancel)?;
        Ok(inner.log.last().map(|m| vec![m.id]).unwrap_or_default())
    }
}

#[async_trait]
impl StateHolder for MemoryConsumer {
    fn state(&self) -> ConsumerState {
        self.shared.state.current()
    }

    async fn state_changed_from(
        &self,
        state: ConsumerState,
        cancel: &CancellationToken,
    ) -> Result<ConsumerState> {
        self.shared.state.changed_from(state, cancel).await
    }

    async fn state_changed_to(
        &self,
        state: ConsumerState,
        cancel: &CancellationToken,
    ) -> Result<ConsumerState> {
        self.shared.state.changed_to(state, cancel).await
    }
}

#[async_trait]
impl Dispose for MemoryConsumer {
    async fn dispose(&self) {
        if self.shared.close(ConsumerState::Closed) {
            info!(
                topic = %self.shared.identity.topic,
                subscription = %self.shared.identity.subscription_name,
                "consumer disposed"
            );
        }
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    fn service_url(&self) -> &url::Url {
        &self.shared.identity.service_url
    }

    fn subscription_name(&self) -> &str {
        &self.shared.identity.subscription_name
    }

    fn subscription_type(&self) -> SubscriptionType {
        self.shared.identity.subscription_type
    }

    fn topic(&self) -> &str {
        &self.shared.identity.topic
    }

    async fn unsubscribe(&self, cancel: &CancellationToken) -> Result<()> {
        drop(self.shared.lock_open(cancel)?);
        if !self.shared.close(ConsumerState::Unsubscribed) {
            return Err(ConsumerError::ConsumerClosed);
        }
        info!(
            topic = %self.shared.identity.topic,
            subscription = %self.shared.identity.subscription_name,
            "unsubscribed"
        );
        Ok(())
    }
}
