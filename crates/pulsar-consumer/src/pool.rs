//! Free list of [`CancellationToken`]s for the non-blocking poll path.

use std::sync::{LazyLock, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::trace;

static SHARED: LazyLock<TokenPool> = LazyLock::new(TokenPool::new);

/// Reusable cancellation tokens.
///
/// A token can never be un-cancelled, so a cancelled token is retired rather
/// than returned: a reused token must start out live, and a cancelled one may
/// still be observed by the aborted operation it was handed to.
#[derive(Debug)]
pub struct TokenPool {
    tokens: Mutex<Vec<CancellationToken>>,
    max_retained: usize,
}

impl TokenPool {
    /// Pool sized at twice the available parallelism.
    pub fn new() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_capacity(parallelism * 2)
    }

    /// Pool that keeps at most `max_retained` idle tokens; surplus returns
    /// are dropped.
    pub fn with_capacity(max_retained: usize) -> Self {
        Self {
            tokens: Mutex::new(Vec::with_capacity(max_retained)),
            max_retained,
        }
    }

    /// Process-wide pool used by [`ReceiveExt::try_receive`](crate::ReceiveExt::try_receive).
    pub fn shared() -> &'static TokenPool {
        &SHARED
    }

    /// Take an idle token, or create one when the pool is empty.
    pub fn acquire(&self) -> CancellationToken {
        let pooled = self
            .tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        match pooled {
            Some(token) => token,
            None => {
                trace!("token pool miss");
                CancellationToken::new()
            }
        }
    }

    /// Hand a token back for reuse. Cancelled tokens are retired instead.
    pub fn release(&self, token: CancellationToken) {
        if token.is_cancelled() {
            self.retire(token);
            return;
        }
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if tokens.len() < self.max_retained {
            tokens.push(token);
        }
    }

    /// Drop a token that must not be reused.
    pub fn retire(&self, token: CancellationToken) {
        trace!(cancelled = token.is_cancelled(), "retiring cancellation token");
        drop(token);
    }

    /// Number of idle tokens ready for reuse.
    pub fn available(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for TokenPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn acquire_on_empty_pool_creates_live_token() {
        let pool = TokenPool::with_capacity(4);
        let token = pool.acquire();
        assert!(!token.is_cancelled());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn released_token_is_reused() {
        let pool = TokenPool::with_capacity(4);
        let token = pool.acquire();
        let probe = token.clone();
        pool.release(token);
        assert_eq!(pool.available(), 1);

        let reused = pool.acquire();
        assert_eq!(pool.available(), 0);
        // Cancelling the reused token is visible through the first clone.
        reused.cancel();
        assert!(probe.is_cancelled());
    }

    #[test]
    fn cancelled_token_is_never_pooled() {
        let pool = TokenPool::with_capacity(4);
        let token = pool.acquire();
        token.cancel();
        pool.release(token);
        assert_eq!(pool.available(), 0);
        assert!(!pool.acquire().is_cancelled());
    }

    #[test]
    fn surplus_tokens_are_dropped() {
        let pool = TokenPool::with_capacity(2);
        for _ in 0..5 {
            pool.release(CancellationToken::new());
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn zero_capacity_pool_retains_nothing() {
        let pool = TokenPool::with_capacity(0);
        pool.release(pool.acquire());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn concurrent_borrow_and_return() {
        let pool = Arc::new(TokenPool::with_capacity(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let token = pool.acquire();
                        assert!(!token.is_cancelled());
                        pool.release(token);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.available() <= 8);
        assert!(pool.available() >= 1);
    }
}
