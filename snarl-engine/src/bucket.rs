use tokio::time::Instant;

/// A leaky token bucket used by the bandwidth module.
///
/// Tokens are bytes. The bucket refills continuously at the configured rate
/// with fractional-second precision, capped at its capacity, and pays for
/// packets whole: a packet is admitted only if its full byte length is
/// covered.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Option<Instant>,
}

impl TokenBucket {
    pub fn new(capacity: f64) -> Self {
        Self { capacity, tokens: 0.0, last_refill: None }
    }

    /// Replaces the bucket capacity, clamping the current balance to it.
    pub fn set_capacity(&mut self, capacity: f64) {
        self.capacity = capacity;
        if self.tokens > capacity {
            self.tokens = capacity;
        }
    }

    /// Adds `elapsed-seconds x rate` tokens, capped at capacity. The first
    /// refill after construction or [`reset`](Self::reset) only anchors the
    /// timestamp.
    pub fn refill(&mut self, now: Instant, rate: f64) {
        if let Some(last) = self.last_refill {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * rate).min(self.capacity);
        }

        self.last_refill = Some(now);
    }

    /// Consumes `size` tokens if the balance covers them.
    pub fn try_consume(&mut self, size: usize) -> bool {
        if self.tokens >= size as f64 {
            self.tokens -= size as f64;
            true
        } else {
            false
        }
    }

    /// Empties the bucket back to its quiescent state (zero tokens).
    pub fn reset(&mut self) {
        self.tokens = 0.0;
        self.last_refill = None;
    }

    #[cfg(test)]
    pub(crate) fn tokens(&self) -> f64 {
        self.tokens
    }
}
