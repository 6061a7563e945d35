//! Adapters over the [`Receive`] primitive: a non-blocking poll and an
//! unbounded message stream.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::FutureExt as _;
use futures_util::future::BoxFuture;
use futures_util::stream::{FusedStream, Stream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::consumer::Receive;
use crate::error::{ConsumerError, Result};
use crate::pool::TokenPool;
use crate::types::Message;

/// Extension methods available on every [`Receive`] implementation.
pub trait ReceiveExt: Receive {
    /// Return a message if one is available right now, without suspending.
    ///
    /// `Ok(None)` means nothing was ready. Faults other than a cancellation
    /// reported by the primitive itself are returned as errors.
    ///
    /// A receive that does not complete on its first poll is cancelled and
    /// dropped. A message whose delivery was already in flight at that
    /// instant may be dropped by the underlying layer.
    fn try_receive(&self) -> Result<Option<Message>> {
        self.try_receive_with(TokenPool::shared())
    }

    /// [`try_receive`](Self::try_receive) drawing its token from `pool`.
    fn try_receive_with(&self, pool: &TokenPool) -> Result<Option<Message>> {
        let token = pool.acquire();
        let mut receive = self.receive(token.clone());

        match receive.as_mut().now_or_never() {
            None => {
                token.cancel();
                drop(receive);
                pool.retire(token);
                Ok(None)
            }
            Some(outcome) => {
                drop(receive);
                pool.release(token);
                match outcome {
                    Ok(message) => Ok(Some(message)),
                    Err(ConsumerError::OperationCancelled) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Stream every message the primitive produces until `cancel` fires.
    fn messages(&self, cancel: CancellationToken) -> Messages<'_, Self> {
        Messages::new(self, cancel)
    }
}

impl<R: Receive + ?Sized> ReceiveExt for R {}

/// Lazy, non-restartable stream of messages from a [`Receive`] primitive.
///
/// Each item is one receive, issued only after the previous one resolved.
/// The stream:
/// - ends with no further item when `cancel` has fired before the next
///   receive starts;
/// - yields `Err(OperationCancelled)` and then ends when `cancel` fires
///   during a receive;
/// - yields any other error once and then ends.
pub struct Messages<'a, R: ?Sized> {
    receiver: &'a R,
    cancel: CancellationToken,
    in_flight: Option<BoxFuture<'a, Result<Message>>>,
    finished: bool,
}

impl<'a, R: Receive + ?Sized> Messages<'a, R> {
    pub fn new(receiver: &'a R, cancel: CancellationToken) -> Self {
        Self {
            receiver,
            cancel,
            in_flight: None,
            finished: false,
        }
    }
}

impl<R: Receive + ?Sized> Stream for Messages<'_, R> {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }

        if this.in_flight.is_none() && this.cancel.is_cancelled() {
            debug!("message stream cancelled");
            this.finished = true;
            return Poll::Ready(None);
        }

        let receiver = this.receiver;
        let cancel = &this.cancel;
        let receive = this
            .in_flight
            .get_or_insert_with(|| receiver.receive(cancel.clone()));
        let outcome = ready!(receive.as_mut().poll(cx));
        this.in_flight = None;

        if let Err(e) = &outcome {
            debug!(error = %e, "message stream ended");
            this.finished = true;
        }
        Poll::Ready(Some(outcome))
    }
}

impl<R: Receive + ?Sized> FusedStream for Messages<'_, R> {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::{FutureExt, StreamExt};

    use super::*;
    use crate::types::MessageId;

    fn message(entry: u64) -> Message {
        Message {
            id: MessageId::new(1, entry, -1, -1),
            payload: Bytes::from(format!("m{entry}")),
            key: None,
            properties: Default::default(),
            publish_time: 0,
            redelivery_count: 0,
        }
    }

    /// Primitive that serves scripted outcomes, then waits for cancellation.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<Message>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<Message>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Receive for Scripted {
        async fn receive(&self, cancel: CancellationToken) -> Result<Message> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(outcome) => outcome,
                None => {
                    cancel.cancelled().await;
                    Err(ConsumerError::OperationCancelled)
                }
            }
        }
    }

    /// Primitive that holds on to every token it is given.
    struct Recording {
        tokens: Mutex<Vec<CancellationToken>>,
    }

    #[async_trait]
    impl Receive for Recording {
        async fn receive(&self, cancel: CancellationToken) -> Result<Message> {
            self.tokens.lock().unwrap().push(cancel.clone());
            cancel.cancelled().await;
            Err(ConsumerError::OperationCancelled)
        }
    }

    #[test]
    fn try_receive_returns_ready_message() {
        let pool = TokenPool::with_capacity(4);
        let rx = Scripted::new(vec![Ok(message(1))]);
        let got = rx.try_receive_with(&pool).unwrap();
        assert_eq!(got, Some(message(1)));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn try_receive_without_message_returns_none_and_retires_token() {
        let pool = TokenPool::with_capacity(4);
        let rx = Recording {
            tokens: Mutex::new(Vec::new()),
        };
        assert_eq!(rx.try_receive_with(&pool).unwrap(), None);
        assert_eq!(pool.available(), 0);
        let tokens = rx.tokens.lock().unwrap();
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].is_cancelled());
    }

    #[test]
    fn try_receive_reuses_token_after_success() {
        let pool = TokenPool::with_capacity(4);
        let rx = Scripted::new(vec![Ok(message(1)), Ok(message(2)), Ok(message(3))]);
        for entry in 1..=3 {
            assert_eq!(rx.try_receive_with(&pool).unwrap(), Some(message(entry)));
            assert_eq!(pool.available(), 1);
        }
    }

    #[test]
    fn try_receive_absorbs_immediate_cancellation() {
        let pool = TokenPool::with_capacity(4);
        let rx = Scripted::new(vec![Err(ConsumerError::OperationCancelled)]);
        assert_eq!(rx.try_receive_with(&pool).unwrap(), None);
    }

    #[test]
    fn try_receive_propagates_faults() {
        let pool = TokenPool::with_capacity(4);
        let rx = Scripted::new(vec![
            Err(ConsumerError::ConsumerFault("broken".into())),
            Err(ConsumerError::ConsumerClosed),
        ]);
        assert_eq!(
            rx.try_receive_with(&pool).unwrap_err(),
            ConsumerError::ConsumerFault("broken".into())
        );
        assert_eq!(
            rx.try_receive_with(&pool).unwrap_err(),
            ConsumerError::ConsumerClosed
        );
    }

    #[tokio::test]
    async fn stream_yields_in_primitive_order() {
        let rx = Scripted::new(vec![Ok(message(3)), Ok(message(1)), Ok(message(2))]);
        let cancel = CancellationToken::new();
        let got: Vec<_> = rx
            .messages(cancel)
            .take(3)
            .map(|m| m.unwrap().id.entry_id)
            .collect()
            .await;
        assert_eq!(got, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn stream_ends_without_receiving_when_cancelled_up_front() {
        let rx = Scripted::new(vec![Ok(message(1))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut stream = rx.messages(cancel);
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
        assert_eq!(rx.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_reports_cancellation_during_receive() {
        let rx = Scripted::new(vec![Ok(message(1))]);
        let cancel = CancellationToken::new();
        let mut stream = rx.messages(cancel.clone());

        assert_eq!(stream.next().await.unwrap().unwrap(), message(1));

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            })
        };
        let ended = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert_eq!(ended, Some(Err(ConsumerError::OperationCancelled)));
        assert!(stream.next().await.is_none());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn stream_keeps_one_receive_in_flight_across_polls() {
        let rx = Recording {
            tokens: Mutex::new(Vec::new()),
        };
        let cancel = CancellationToken::new();
        let mut stream = rx.messages(cancel.clone());

        assert!(stream.next().now_or_never().is_none());
        assert!(stream.next().now_or_never().is_none());
        assert_eq!(rx.tokens.lock().unwrap().len(), 1);

        cancel.cancel();
        assert_eq!(
            stream.next().await,
            Some(Err(ConsumerError::OperationCancelled))
        );
        assert!(stream.next().await.is_none());
        assert_eq!(rx.tokens.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stream_surfaces_fault_then_ends() {
        let rx = Scripted::new(vec![
            Ok(message(1)),
            Err(ConsumerError::ConsumerFault("boom".into())),
            Ok(message(2)),
        ]);
        let mut stream = rx.messages(CancellationToken::new());
        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(
            stream.next().await,
            Some(Err(ConsumerError::ConsumerFault("boom".into())))
        );
        assert!(stream.next().await.is_none());
        assert_eq!(rx.calls.load(Ordering::SeqCst), 2);
    }
}
