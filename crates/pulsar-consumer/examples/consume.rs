//! Publish a few messages into an in-memory subscription and consume them
//! through both receive adapters.
//!
//! ```sh
//! RUST_LOG=debug cargo run -p pulsar-consumer --example consume -- [COUNT]
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use pulsar_consumer::{
    Acknowledge, Authentication, BasicAuthentication, Consumer, ConsumerOptions, ReceiveExt,
    SubscriptionType,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let count: u32 = std::env::args()
        .nth(1)
        .map(|s| s.parse::<u32>())
        .transpose()?
        .unwrap_or(5);

    let auth = BasicAuthentication::new("demo", "demo-password")?;
    let blob = auth.authentication_data(&CancellationToken::new()).await?;
    println!(
        "auth method={} data={}",
        auth.method_name(),
        String::from_utf8_lossy(&blob)
    );

    let identity = ConsumerOptions::new(
        "pulsar://localhost:6650".parse()?,
        "persistent://public/default/demo",
        "demo-subscription",
    )
    .with_subscription_type(SubscriptionType::Exclusive)
    .into_identity()?;
    let (producer, consumer) = pulsar_consumer::memory::channel(identity);

    producer.send("first")?;
    if let Some(msg) = consumer.try_receive()? {
        println!("polled {} {:?}", msg.id, msg.payload);
        consumer.acknowledge(msg.id, &CancellationToken::new()).await?;
    }
    println!("poll on empty subscription: {:?}", consumer.try_receive()?);

    let shutdown = CancellationToken::new();
    let publisher = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            for i in 0..count {
                if producer.send(format!("message {i}")).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            shutdown.cancel();
        })
    };

    let mut last = None;
    let mut messages = consumer.messages(shutdown.clone());
    while let Some(outcome) = messages.next().await {
        match outcome {
            Ok(msg) => {
                println!("streamed {} {:?}", msg.id, msg.payload);
                last = Some(msg.id);
            }
            Err(e) if e.is_cancelled() => println!("stream cancelled"),
            Err(e) => return Err(e.into()),
        }
    }
    if let Some(id) = last {
        consumer
            .acknowledge_cumulative(id, &CancellationToken::new())
            .await?;
    }

    publisher.await?;
    consumer.unsubscribe(&CancellationToken::new()).await?;
    Ok(())
}
