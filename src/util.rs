// Cross-cutting concurrency primitives

use std::time::Duration;
use tokio::sync::watch;

/// A latch that counts down to zero.
///
/// The peer seeds one with the number of blocks it expects during a chain
/// download; each connected block counts it down and callers await
/// progress with a timeout. The timeout is computed once from a monotonic
/// base, so wake-ups while waiting cannot stretch the deadline.
pub struct CountDownLatch {
    count: watch::Sender<u64>,
}

impl CountDownLatch {
    pub fn new(count: u64) -> Self {
        Self {
            count: watch::channel(count).0,
        }
    }

    pub fn count(&self) -> u64 {
        *self.count.borrow()
    }

    pub fn count_down(&self) {
        self.count_down_by(1);
    }

    /// Count down by `n`, saturating at zero.
    pub fn count_down_by(&self, n: u64) {
        if n > 0 {
            self.count.send_modify(|c| *c = c.saturating_sub(n));
        }
    }

    /// Wait until the latch reaches zero, or the timeout expires. Returns
    /// true when the latch is at zero.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.count.subscribe();
        let _ = tokio::time::timeout(timeout, async move {
            loop {
                if *rx.borrow_and_update() == 0 {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        self.count() == 0
    }
}
