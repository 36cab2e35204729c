// Token-bucket rate limiter for player back-end calls.
//
// Each provider gets one bucket, shared by every concurrent trial using
// that provider. The bucket refills continuously at `refill_per_sec` up
// to `capacity`, so short bursts up to the capacity go through untouched
// and sustained load converges to the refill rate.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Clone)]
pub struct TokenBucket {
    inner: Arc<Mutex<BucketInner>>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketInner {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket holding up to `capacity` requests, refilling at
    /// `refill_per_sec` requests per second.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(BucketInner {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_per_sec: refill_per_sec.max(1e-6),
        }
    }

    /// Take one token, sleeping until the bucket can supply it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
                inner.tokens = (inner.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                inner.last_refill = now;

                if inner.tokens >= 1.0 {
                    inner.tokens -= 1.0;
                    return;
                }
                // Sleep outside the lock until one whole token has accrued.
                Duration::from_secs_f64((1.0 - inner.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }
}
