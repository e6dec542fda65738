//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` uses Tokio's monotonic clock, Tokio sleeps and the OS RNG.
//! Behavior is non-deterministic; tests use the harness environments instead.

use std::time::Duration;

use cablecast_core::Environment;

/// Production environment using the system clock and OS randomness.
///
/// Randomness only feeds reconnect jitter. If the OS RNG fails the buffer is
/// zeroed, which disables jitter rather than aborting the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send + 'static {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(error) = getrandom::fill(buffer) {
            tracing::warn!(%error, "OS RNG unavailable, reconnect jitter disabled");
            buffer.fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_are_random() {
        let env = SystemEnv::new();

        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        env.random_bytes(&mut a);
        env.random_bytes(&mut b);

        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_advances_clock() {
        let env = SystemEnv::new();

        let start = env.now();
        env.sleep(Duration::from_secs(3)).await;

        assert!(env.now() - start >= Duration::from_secs(3));
    }
}
