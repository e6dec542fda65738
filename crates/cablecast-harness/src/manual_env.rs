//! Manually advanced environment for synchronous client tests.
//!
//! The clock only moves when the test calls [`ManualEnv::advance`]. Sleeps
//! complete immediately; the sans-IO client never sleeps, the test delivers
//! timer events itself.

use std::{
    ops::{Add, Sub},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use cablecast_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Point on the virtual clock, measured from the environment's creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtualInstant(Duration);

impl VirtualInstant {
    /// Time since the environment was created.
    #[must_use]
    pub fn since_start(self) -> Duration {
        self.0
    }
}

impl Sub for VirtualInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for VirtualInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

/// Environment with a test-controlled clock and a seeded RNG.
///
/// Clones share the clock and the RNG.
#[derive(Clone)]
pub struct ManualEnv {
    clock: Arc<Mutex<VirtualInstant>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl ManualEnv {
    /// Environment at time zero with seed 0.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment at time zero with a specific seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            clock: Arc::new(Mutex::new(VirtualInstant::default())),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        *clock = *clock + duration;
    }

    /// Time since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.now().since_start()
    }
}

impl Default for ManualEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualEnv").field("elapsed", &self.elapsed()).finish_non_exhaustive()
    }
}

impl Environment for ManualEnv {
    type Instant = VirtualInstant;

    fn now(&self) -> Self::Instant {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send + 'static {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_moves_only_when_advanced() {
        let env = ManualEnv::new();
        let start = env.now();

        assert_eq!(env.now(), start);
        env.advance(Duration::from_secs(6));

        assert_eq!(env.now() - start, Duration::from_secs(6));
        assert_eq!(start - env.now(), Duration::ZERO);
    }

    #[test]
    fn clones_share_clock() {
        let env = ManualEnv::new();
        let clone = env.clone();

        clone.advance(Duration::from_millis(250));

        assert_eq!(env.elapsed(), Duration::from_millis(250));
    }
}
