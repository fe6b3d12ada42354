//! Reconnect delay strategies.
//!
//! The production strategy is exponential growth with jitter so that a fleet
//! of clients does not thundering-herd the endpoint after an outage. Fixed
//! and zero-delay strategies exist for tests and latency-sensitive setups.

use std::time::Duration;

/// Produces the next retry delay and decides when to give up.
///
/// `current_attempt` is 1-based and counts delays *returned*; after three
/// calls to [`next_delay`](Self::next_delay) it reads 4. `clone_box` yields
/// an independent instance with identical configuration, reset to attempt 1.
pub trait BackoffStrategy: Send {
    /// Next delay to sleep before the upcoming attempt. Advances the
    /// attempt counter.
    fn next_delay(&mut self) -> Duration;

    /// True once the configured attempt budget is exhausted.
    fn should_stop(&self) -> bool;

    /// Restore the attempt counter to 1.
    fn reset(&mut self);

    fn current_attempt(&self) -> u32;

    /// 0 means unlimited attempts.
    fn max_attempts(&self) -> u32;

    fn clone_box(&self) -> Box<dyn BackoffStrategy + Send>;
}

// =============================================================================
// EXPONENTIAL BACKOFF
// =============================================================================

/// Exponential backoff with jitter.
///
/// Delay n is `min(initial * multiplier^(n-1), max_delay)`, then scaled by
/// `1 + U(-jitter, +jitter)`. The cap applies before jitter, so jitter may
/// push the final value slightly above `max_delay`; that is intentional.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
    max_attempts: u32,
    attempt: u32,
    rng_state: u64,
}

impl ExponentialBackoff {
    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }

    /// 100ms base, 30s cap, 20 attempts. For latency-sensitive consumers.
    pub fn aggressive() -> Box<dyn BackoffStrategy + Send> {
        Self::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(30))
            .multiplier(2.0)
            .jitter(0.2)
            .max_attempts(20)
            .build_boxed()
    }

    /// 1s base, 60s cap, 10 attempts. The default.
    pub fn conservative() -> Box<dyn BackoffStrategy + Send> {
        Self::builder()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(60))
            .multiplier(2.0)
            .jitter(0.3)
            .max_attempts(10)
            .build_boxed()
    }

    /// Conservative pacing, never gives up.
    pub fn infinite() -> Box<dyn BackoffStrategy + Send> {
        Self::builder()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(60))
            .multiplier(2.0)
            .jitter(0.3)
            .max_attempts(0)
            .build_boxed()
    }

    /// Fast PRNG for jitter (xorshift64). Good enough for spreading retry
    /// times; not used for anything security relevant.
    #[inline]
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    fn seed() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.saturating_sub(1);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let unit = self.next_random() * 2.0 - 1.0; // U(-1, +1)
            capped * (1.0 + unit * self.jitter)
        } else {
            capped
        };

        self.attempt += 1;
        Duration::from_secs_f64(jittered.max(0.0))
    }

    fn should_stop(&self) -> bool {
        self.max_attempts > 0 && self.attempt > self.max_attempts
    }

    fn reset(&mut self) {
        self.attempt = 1;
    }

    fn current_attempt(&self) -> u32 {
        self.attempt
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn clone_box(&self) -> Box<dyn BackoffStrategy + Send> {
        Box::new(Self {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter: self.jitter,
            max_attempts: self.max_attempts,
            attempt: 1,
            rng_state: Self::seed(),
        })
    }
}

/// Builder for [`ExponentialBackoff`]. Defaults match the conservative
/// preset.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffBuilder {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
    max_attempts: u32,
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.3,
            max_attempts: 10,
        }
    }
}

impl ExponentialBackoffBuilder {
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Jitter fraction in `[0, 1]`; values outside are clamped.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// 0 means retry forever.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn build(self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter: self.jitter,
            max_attempts: self.max_attempts,
            attempt: 1,
            rng_state: ExponentialBackoff::seed(),
        }
    }

    pub fn build_boxed(self) -> Box<dyn BackoffStrategy + Send> {
        Box::new(self.build())
    }
}

// =============================================================================
// FIXED / NONE
// =============================================================================

/// Constant delay between attempts.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl FixedBackoff {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            attempt: 1,
        }
    }
}

impl BackoffStrategy for FixedBackoff {
    fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        self.delay
    }

    fn should_stop(&self) -> bool {
        self.max_attempts > 0 && self.attempt > self.max_attempts
    }

    fn reset(&mut self) {
        self.attempt = 1;
    }

    fn current_attempt(&self) -> u32 {
        self.attempt
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn clone_box(&self) -> Box<dyn BackoffStrategy + Send> {
        Box::new(Self::new(self.delay, self.max_attempts))
    }
}

/// Zero delay between attempts. Retries immediately; for tests and local
/// endpoints only.
#[derive(Debug, Clone)]
pub struct NoBackoff {
    max_attempts: u32,
    attempt: u32,
}

impl NoBackoff {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempt: 1,
        }
    }
}

impl BackoffStrategy for NoBackoff {
    fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        Duration::ZERO
    }

    fn should_stop(&self) -> bool {
        self.max_attempts > 0 && self.attempt > self.max_attempts
    }

    fn reset(&mut self) {
        self.attempt = 1;
    }

    fn current_attempt(&self) -> u32 {
        self.attempt
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn clone_box(&self) -> Box<dyn BackoffStrategy + Send> {
        Box::new(Self::new(self.max_attempts))
    }
}
