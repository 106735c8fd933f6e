//! Token-bucket rate limiter bounding requests/second across the whole
//! connection pool.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    capacity: f64,
    tokens: Mutex<f64>,
    refill_per_sec: f64,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        let capacity = rps.max(1) as f64;
        Self {
            capacity,
            tokens: Mutex::new(capacity),
            refill_per_sec: capacity,
            last_refill: Mutex::new(Instant::now()),
        }
    }

    fn refill(&self) {
        let mut last = self.last_refill.lock().unwrap();
        let elapsed = last.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let mut tokens = self.tokens.lock().unwrap();
        *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
        *last = Instant::now();
    }

    /// Blocks (async sleep) until a token is available, then consumes one.
    pub async fn acquire(&self) {
        loop {
            self.refill();
            {
                let mut tokens = self.tokens.lock().unwrap();
                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_and_refills() {
        let limiter = RateLimiter::new(2);
        limiter.acquire().await;
        limiter.acquire().await;
        let tokens = *limiter.tokens.lock().unwrap();
        assert!(tokens < 1.0);
    }
}
