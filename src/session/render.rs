use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Roughly one display frame at 60 Hz.
pub const DEFAULT_FRAME: Duration = Duration::from_millis(16);

/// Coalesces content appends into at most one refresh per frame.
///
/// Writers call [`schedule`](Self::schedule) after every append; the render
/// loop awaits [`next_frame`](Self::next_frame) and re-reads state once per
/// returned tick, however many appends happened in between.
#[derive(Debug)]
pub struct RenderScheduler {
    pending: AtomicBool,
    tick: AtomicU64,
    frame: Duration,
    notify: Notify,
}

impl RenderScheduler {
    pub fn new(frame: Duration) -> Self {
        Self {
            pending: AtomicBool::new(false),
            tick: AtomicU64::new(0),
            frame,
            notify: Notify::new(),
        }
    }

    /// Request a refresh. Returns `true` only for the request that actually
    /// scheduled one; later calls within the same frame collapse into it.
    pub fn schedule(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next coalesced refresh and return its tick number.
    pub async fn next_frame(&self) -> u64 {
        loop {
            if self.pending.load(Ordering::Acquire) {
                break;
            }
            self.notify.notified().await;
        }
        tokio::time::sleep(self.frame).await;
        self.pending.store(false, Ordering::Release);
        self.tick.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_coalesces() {
        let sched = RenderScheduler::default();
        assert!(sched.schedule());
        for _ in 0..100 {
            assert!(!sched.schedule());
        }
    }

    #[tokio::test]
    async fn test_next_frame_clears_pending() {
        let sched = RenderScheduler::new(Duration::from_millis(1));
        sched.schedule();
        sched.schedule();
        assert_eq!(sched.next_frame().await, 1);
        assert!(sched.schedule());
        assert_eq!(sched.next_frame().await, 2);
    }

    #[tokio::test]
    async fn test_next_frame_waits_for_schedule() {
        let sched = std::sync::Arc::new(RenderScheduler::new(Duration::from_millis(1)));
        let waiter = {
            let sched = sched.clone();
            tokio::spawn(async move { sched.next_frame().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        sched.schedule();
        assert_eq!(waiter.await.unwrap(), 1);
    }
}
