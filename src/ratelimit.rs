use std::time::Duration;

use rand::Rng;

use crate::config::DelayBounds;

/// A randomized pause between requests, so the source never sees a fixed
/// request cadence.
#[derive(Debug, Clone)]
pub struct RandomDelay {
    bounds: DelayBounds,
}

impl RandomDelay {
    pub fn new(bounds: DelayBounds) -> Self {
        Self { bounds }
    }

    pub fn none() -> Self {
        Self::new(DelayBounds::none())
    }

    pub fn sample(&self) -> Duration {
        if self.bounds.min >= self.bounds.max {
            return self.bounds.min;
        }
        rand::thread_rng().gen_range(self.bounds.as_range())
    }

    /// Sleeps (non-blocking) for a random duration within the bounds.
    pub async fn wait(&self) -> Duration {
        // Sampled before the await: the thread-local rng is not Send.
        let pause = self.sample();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        pause
    }
}
