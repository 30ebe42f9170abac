//! Process-wide request pacing
//!
//! Every source request passes through one `RateGate` shared by all workers
//! of a pipeline. Two acquires never complete closer together than the
//! configured minimum interval, whatever the worker count.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum-interval gate shared across workers
///
/// Waiters are not served in FIFO order. Acquiring never fails; it only
/// delays.
#[derive(Debug)]
pub struct RateGate {
    last_issued: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_issued: Mutex::new(None),
            min_interval,
        }
    }

    /// Convenience constructor for sharing between workers
    pub fn shared(min_interval: Duration) -> Arc<Self> {
        Arc::new(Self::new(min_interval))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until at least `min_interval` has passed since the previous acquire
    pub async fn acquire(&self) {
        // The lock is held across the sleep so waiters queue behind it
        let mut last = self.last_issued.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!(wait_ms = wait_time.as_millis() as u64, "Rate gate: waiting");
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}
