//! Public data types shared by the consumer contract and its adapters.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Position of a message within a topic.
///
/// Ordering follows the broker's storage layout: ledger first, then entry,
/// then partition, then the index inside a batch. Ids are produced by the
/// broker layer and treated as opaque keys everywhere else.
///
/// [`EARLIEST`](Self::EARLIEST) and [`LATEST`](Self::LATEST) are seek targets,
/// not positions; they do not take part in the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    pub ledger_id: u64,
    pub entry_id: u64,
    pub partition: i32,
    pub batch_index: i32,
}

impl MessageId {
    /// Sentinel positioned before every stored message.
    pub const EARLIEST: MessageId = MessageId::new(u64::MAX, u64::MAX, -1, -1);

    /// Sentinel positioned after every stored message.
    pub const LATEST: MessageId = MessageId::new(i64::MAX as u64, i64::MAX as u64, -1, -1);

    pub const fn new(ledger_id: u64, entry_id: u64, partition: i32, batch_index: i32) -> Self {
        Self {
            ledger_id,
            entry_id,
            partition,
            batch_index,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.ledger_id, self.entry_id, self.partition, self.batch_index
        )
    }
}

/// A message handed to the caller by a receive operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Bytes,
    /// Partition routing key, if the producer set one.
    pub key: Option<String>,
    pub properties: HashMap<String, String>,
    /// Publish timestamp in milliseconds since the Unix epoch.
    pub publish_time: u64,
    /// How many times this message was handed out before the current delivery.
    pub redelivery_count: u32,
}

/// How a subscription distributes messages across its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionType {
    #[default]
    Exclusive,
    Shared,
    Failover,
    KeyShared,
}

impl SubscriptionType {
    /// Cumulative acknowledgment is only meaningful when a single consumer
    /// sees the subscription's messages in order.
    pub fn supports_cumulative_ack(self) -> bool {
        matches!(self, SubscriptionType::Exclusive | SubscriptionType::Failover)
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionType::Exclusive => "exclusive",
            SubscriptionType::Shared => "shared",
            SubscriptionType::Failover => "failover",
            SubscriptionType::KeyShared => "key-shared",
        };
        f.write_str(name)
    }
}

/// Fixed identity of a consumer handle, set at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionIdentity {
    pub service_url: url::Url,
    pub subscription_name: String,
    pub topic: String,
    pub subscription_type: SubscriptionType,
}

/// Observable state of a consumer. Owned by the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerState {
    Disconnected,
    Active,
    Inactive,
    ReachedEndOfTopic,
    Faulted,
    Closed,
    Unsubscribed,
}

impl ConsumerState {
    /// Final states are never left once entered.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            ConsumerState::Faulted | ConsumerState::Closed | ConsumerState::Unsubscribed
        )
    }
}
