//! Backoff schedules for allocation handlers.

use std::time::Duration;

/// A pause schedule for a handler that waits for capacity to come back.
///
/// Policies are plain data: they compute delays but never sleep themselves.
/// [`handlers::backoff`](super::handlers::backoff) turns one into a handler.
///
/// A policy must carry a retry bound. Without one the handler would permit
/// retries forever, which the chain does not guard against.
///
/// # Examples
///
/// ```rust
/// use holdfast::retry::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::exponential(Duration::from_millis(1))
///     .with_max_retries(4)
///     .with_max_delay(Duration::from_millis(5));
///
/// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(1)));
/// assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(5)));
/// assert_eq!(policy.delay_for_attempt(4), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackoffPolicy {
    schedule: Schedule,
    max_retries: Option<u32>,
    max_delay: Option<Duration>,
    jitter: Jitter,
}

/// How the pause grows between retries.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Schedule {
    /// Same pause every time.
    Constant(Duration),
    /// base * (attempt + 1).
    Linear {
        /// Base pause.
        base: Duration,
    },
    /// base * 2^attempt.
    Exponential {
        /// Base pause.
        base: Duration,
    },
}

impl Schedule {
    /// Uncapped pause before retry number `attempt` (0-indexed).
    pub fn pause(&self, attempt: u32) -> Duration {
        match *self {
            Schedule::Constant(d) => d,
            Schedule::Linear { base } => base.saturating_mul(attempt.saturating_add(1)),
            Schedule::Exponential { base } => 1u32
                .checked_shl(attempt)
                .map_or(Duration::MAX, |factor| base.saturating_mul(factor)),
        }
    }
}

/// Randomness added to pauses so competing threads do not retry in lockstep.
///
/// Only takes effect with the `jitter` feature; otherwise pauses are exact.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Jitter {
    /// Exact pauses.
    #[default]
    None,
    /// Pause varies by ±factor.
    Proportional(f64),
    /// Pause drawn uniformly from zero to the computed value.
    Full,
}

impl BackoffPolicy {
    fn with_schedule(schedule: Schedule) -> Self {
        Self {
            schedule,
            max_retries: None,
            max_delay: None,
            jitter: Jitter::None,
        }
    }

    /// Pause for `delay` before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self::with_schedule(Schedule::Constant(delay))
    }

    /// Pause grows linearly: base, 2*base, 3*base, ...
    pub fn linear(base: Duration) -> Self {
        Self::with_schedule(Schedule::Linear { base })
    }

    /// Pause doubles: base, 2*base, 4*base, ...
    pub fn exponential(base: Duration) -> Self {
        Self::with_schedule(Schedule::Exponential { base })
    }

    /// Permit at most `n` retries before giving up.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Never pause longer than `d`.
    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = Some(d);
        self
    }

    /// Vary each pause by ±`factor` (clamped to 0..=1).
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = Jitter::Proportional(factor.clamp(0.0, 1.0));
        self
    }

    /// Draw each pause uniformly between zero and its computed value.
    pub fn with_full_jitter(mut self) -> Self {
        self.jitter = Jitter::Full;
        self
    }

    /// The retry bound.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// The pause cap.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// The schedule.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// The jitter setting.
    pub fn jitter(&self) -> &Jitter {
        &self.jitter
    }

    /// Pause before retry number `attempt` (0-indexed), or `None` once the
    /// retry bound is reached.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        let within_bound = self.max_retries.is_none_or(|max| attempt < max);
        within_bound.then(|| self.cap(self.schedule.pause(attempt)))
    }

    /// Pause with jitter applied. Used by the backoff handler.
    pub(crate) fn jittered_delay(&self, attempt: u32) -> Option<Duration> {
        let delay = self.delay_for_attempt(attempt)?;
        Some(self.cap(self.jitter.apply(delay)))
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Check that the policy bounds its retries.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self.max_retries {
            Some(_) => Ok(()),
            None => Err("BackoffPolicy must set max_retries"),
        }
    }
}

impl Jitter {
    /// Apply jitter to a computed pause.
    pub fn apply(&self, delay: Duration) -> Duration {
        match *self {
            Jitter::None => delay,
            Jitter::Proportional(factor) => scale(delay, 1.0 - factor, 1.0 + factor),
            Jitter::Full => scale(delay, 0.0, 1.0),
        }
    }
}

/// `delay` times a factor drawn from `low..=high`, saturating on overflow.
#[cfg(feature = "jitter")]
fn scale(delay: Duration, low: f64, high: f64) -> Duration {
    use rand::Rng;
    let factor = rand::rng().random_range(low.max(0.0)..=high.max(0.0));
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

#[cfg(not(feature = "jitter"))]
fn scale(delay: Duration, _low: f64, _high: f64) -> Duration {
    delay
}
