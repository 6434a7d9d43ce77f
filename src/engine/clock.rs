//! Clock seam for the round scheduler.
//!
//! The scheduler only touches time through this trait, so tests can drive
//! the lifecycle on tokio's paused virtual time instead of real timers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by tokio timers. Under
/// `#[tokio::test(start_paused = true)]` the sleeps auto-advance.
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
