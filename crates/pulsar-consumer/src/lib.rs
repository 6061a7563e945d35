//! Consumer-side surface of a Pulsar-style publish/subscribe client.
//!
//! Provides the capability traits a subscription handle implements
//! ([`Consumer`] and the smaller traits it is built from), two adapters over
//! the single-message [`Receive`] primitive, and basic-scheme authentication.
//!
//! # Features
//! - Single, batch and cumulative acknowledgment; redelivery; seek;
//!   unsubscribe; observable [`ConsumerState`]
//! - [`ReceiveExt::try_receive`]: answer "is a message ready right now?"
//!   without suspending, reusing pooled cancellation tokens
//! - [`ReceiveExt::messages`]: an unbounded [`Stream`](futures_util::Stream)
//!   of messages that ends when its cancellation token fires
//! - [`BasicAuthentication`]: `Authorization Basic {base64}` credential blob
//! - [`memory`]: an in-process implementation of the whole contract
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use futures_util::StreamExt;
//! use pulsar_consumer::{Acknowledge, ConsumerOptions, ReceiveExt};
//! use tokio_util::sync::CancellationToken;
//!
//! let identity = ConsumerOptions::new(
//!     "pulsar://localhost:6650".parse()?,
//!     "persistent://public/default/orders",
//!     "billing",
//! )
//! .into_identity()?;
//! let (producer, consumer) = pulsar_consumer::memory::channel(identity);
//! producer.send("hello")?;
//!
//! if let Some(msg) = consumer.try_receive()? {
//!     consumer.acknowledge(msg.id, &CancellationToken::new()).await?;
//! }
//!
//! let shutdown = CancellationToken::new();
//! let mut messages = consumer.messages(shutdown.clone());
//! while let Some(msg) = messages.next().await {
//!     let msg = msg?;
//!     consumer.acknowledge(msg.id, &shutdown).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod auth;
mod config;
mod consumer;
mod error;
pub mod memory;
mod pool;
mod receive;
mod state;
mod types;

pub use auth::{Authentication, BasicAuthentication};
pub use config::{AuthConfig, ConsumerOptions};
pub use consumer::{
    Acknowledge, Consumer, Dispose, GetLastMessageIds, Receive, Redeliver, Seek, StateHolder,
};
pub use error::{AuthError, ConfigError, ConsumerError, Result};
pub use pool::TokenPool;
pub use receive::{Messages, ReceiveExt};
pub use state::StateCell;
pub use types::{ConsumerState, Message, MessageId, SubscriptionIdentity, SubscriptionType};
