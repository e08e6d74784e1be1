//! Periodic task facility for joined services
//!
//! Each service carries one `TimerGroup`; drivers register their
//! reporting callbacks on it and the group owns the spawned tasks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// A group of recurring tokio tasks owned by one service.
///
/// Cloning shares the underlying task list, so any clone can stop the
/// whole group.
#[derive(Clone, Default)]
pub struct TimerGroup {
    timers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TimerGroup {
    /// Create an empty timer group
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recurring callback.
    ///
    /// The first firing happens after `initial_delay`, later firings
    /// every `interval`. `interval` must be non-zero.
    pub async fn add_timer<F, Fut>(&self, interval: Duration, initial_delay: Duration, callback: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            if !initial_delay.is_zero() {
                tokio::time::sleep(initial_delay).await;
            }

            // The immediate first tick is the initial firing
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                callback().await;
            }
        });

        let mut timers = self.timers.lock().await;
        timers.push(handle);
        debug!(
            "Registered timer (interval: {:?}, initial delay: {:?}, total: {})",
            interval,
            initial_delay,
            timers.len()
        );
    }

    /// Abort every registered timer
    pub async fn stop(&self) {
        let mut timers = self.timers.lock().await;
        for handle in timers.drain(..) {
            handle.abort();
        }
        debug!("Stopped all timers");
    }

    /// Number of registered timers
    pub async fn timer_count(&self) -> usize {
        self.timers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_initial_delay_then_interval() {
        let count = Arc::new(AtomicU32::new(0));
        let group = TimerGroup::new();

        let counter = Arc::clone(&count);
        group
            .add_timer(Duration::from_secs(10), Duration::from_secs(5), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        // Before the initial delay nothing has fired
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // First firing at t=5
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Second firing at t=15
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_without_initial_delay_fires_immediately() {
        let count = Arc::new(AtomicU32::new(0));
        let group = TimerGroup::new();

        let counter = Arc::clone(&count);
        group
            .add_timer(Duration::from_secs(10), Duration::ZERO, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_timers() {
        let count = Arc::new(AtomicU32::new(0));
        let group = TimerGroup::new();

        let counter = Arc::clone(&count);
        group
            .add_timer(Duration::from_secs(10), Duration::ZERO, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        assert_eq!(group.timer_count().await, 1);

        tokio::time::sleep(Duration::from_millis(1)).await;
        let fired = count.load(Ordering::SeqCst);

        group.stop().await;
        assert_eq!(group.timer_count().await, 0);

        // No further firings after stop
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[tokio::test]
    async fn test_clones_share_the_task_list() {
        let group = TimerGroup::new();
        let clone = group.clone();

        clone
            .add_timer(Duration::from_secs(60), Duration::from_secs(60), || async {})
            .await;

        assert_eq!(group.timer_count().await, 1);
        group.stop().await;
        assert_eq!(clone.timer_count().await, 0);
    }
}
