use core::ops::RangeInclusive;

use embedded_time::duration::Milliseconds;
use embedded_time::{Clock, Instant};
use rand::{Rng, SeedableRng};

/// A non-blocking timer that allows a fixed-delay or exponential-backoff
/// retry, living alongside some operation to retry.
///
/// It does not _contain_ the work to be done (e.g. `Box<fn()>`); the
/// owner asks the timer what to do and performs the retransmission
/// itself.
///
/// ```
/// use embedded_time::duration::Milliseconds;
/// use newt::retry;
///
/// # fn now_from(c: &newt::std::Clock) -> embedded_time::Instant<newt::std::Clock> {
/// #   use embedded_time::Clock;
/// #   c.try_now().unwrap()
/// # }
/// let clock = newt::std::Clock::new();
/// let strategy = retry::Strategy::Delay { min: Milliseconds(1),
///                                         max: Milliseconds(1) };
/// let mut timer = retry::RetryTimer::new(now_from(&clock), strategy, retry::Attempts(2));
///
/// match timer.what_should_i_do(now_from(&clock)) {
///   | Ok(retry::YouShould::Retry) => { /* resend the bytes */ },
///   | Ok(retry::YouShould::Cry) => { /* report Timeout */ },
///   | Err(nb::Error::WouldBlock) => { /* not yet */ },
///   | _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer<C: Clock<T = u64>> {
  start: Instant<C>,
  init: Milliseconds<u64>,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

/// A number of attempts (transmissions, counting the initial one)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attempts(pub u16);

impl core::ops::Sub for Attempts {
  type Output = Attempts;

  fn sub(self, rhs: Self) -> Self::Output {
    Attempts(self.0.saturating_sub(rhs.0))
  }
}

/// Result of [`RetryTimer::what_should_i_do`].
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted and their last timeout window has
  /// passed; the work being retried should be considered poisoned.
  Cry,
  /// A retry should be performed
  Retry,
}

impl<C: Clock<T = u64>> RetryTimer<C> {
  /// Create a new retrier.
  ///
  /// When the strategy's min and max delays differ, the initial delay
  /// is drawn uniformly from that range (seeded from the start
  /// instant), satisfying RFC 7252's
  /// `ACK_TIMEOUT × random(1.0, ACK_RANDOM_FACTOR)`.
  pub fn new(start: Instant<C>, strategy: Strategy, max_attempts: Attempts) -> Self {
    Self { start,
           strategy,
           init: if strategy.has_jitter() {
             let ms = Milliseconds::try_from(start.duration_since_epoch()).map(|Milliseconds(ms)| ms)
                                                                          .unwrap_or(0);
             let mut rand = rand_chacha::ChaCha8Rng::seed_from_u64(ms);
             Milliseconds(rand.gen_range(strategy.range()))
           } else {
             Milliseconds(*strategy.range().start())
           },
           max_attempts,
           attempts: Attempts(1) }
  }

  /// When the thing we keep trying has not succeeded yet, invoke this
  /// to ask the timer what to do about it.
  ///
  /// Returns `nb::Error::WouldBlock` when we have not yet waited the
  /// appropriate amount of time, [`YouShould::Retry`] when a
  /// retransmission is due, and [`YouShould::Cry`] when the attempts
  /// are exhausted *and* the final timeout window has elapsed.
  pub fn what_should_i_do(&mut self,
                          now: Instant<C>)
                          -> nb::Result<YouShould, core::convert::Infallible> {
    let elapsed = now.checked_duration_since(&self.start)
                     .and_then(|d| Milliseconds::try_from(d).ok())
                     .unwrap_or(Milliseconds(0));

    if !self.is_ready(elapsed, self.attempts.0) {
      Err(nb::Error::WouldBlock)
    } else if self.attempts >= self.max_attempts {
      Ok(YouShould::Cry)
    } else {
      self.attempts.0 += 1;
      Ok(YouShould::Retry)
    }
  }

  /// Check if the strategy says an appropriate time has passed for the
  /// given number of attempts already performed
  pub fn is_ready(&self, Milliseconds(time_passed): Milliseconds<u64>, attempts: u16) -> bool {
    if attempts == 0 {
      return true;
    }

    match self.strategy {
      | Strategy::Delay { .. } => time_passed >= (self.init.0 * attempts as u64),
      | Strategy::Exponential { .. } => {
        time_passed >= Strategy::total_delay_exp(self.init, attempts)
      },
    }
  }
}

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strategy {
  /// Generate a random delay between `init_min` and `init_max`,
  /// and double the delay after each failed attempt.
  ///
  /// This is the RFC 7252 section 4.2 behavior: an initial timeout of
  /// `ACK_TIMEOUT × random(1.0, ACK_RANDOM_FACTOR)`, doubled on every
  /// retransmission.
  Exponential {
    /// Minimum (inclusive) delay before the first retransmission
    init_min: Milliseconds<u64>,
    /// Maximum (inclusive) delay before the first retransmission
    init_max: Milliseconds<u64>,
  },
  /// Generate a random delay between `min` and `max`,
  /// and wait until this delay has passed between attempts.
  Delay {
    /// Minimum (inclusive) delay for attempts
    min: Milliseconds<u64>,
    /// Maximum (inclusive) delay for attempts
    max: Milliseconds<u64>,
  },
}

impl Strategy {
  /// Are min & max delays the same? If so, we skip the random number
  /// generation.
  pub fn has_jitter(&self) -> bool {
    let rng = self.range();
    rng.start() != rng.end()
  }

  /// Get the min & max delays as an inclusive range
  pub fn range(&self) -> RangeInclusive<u64> {
    match self {
      | &Self::Delay { min: Milliseconds(min),
                       max: Milliseconds(max), } => min..=max,
      | &Self::Exponential { init_min: Milliseconds(min),
                             init_max: Milliseconds(max), } => min..=max,
    }
  }

  /// Get the amount of time this strategy will take if all attempts fail
  pub fn max_time(&self, max_attempts: Attempts) -> Milliseconds<u64> {
    Milliseconds(match self {
                   | Self::Exponential { init_max, .. } => {
                     Self::total_delay_exp(*init_max, max_attempts.0)
                   },
                   | Self::Delay { max: Milliseconds(max),
                                   .. } => max * max_attempts.0 as u64,
                 })
  }

  /// Given the initial delay and number of attempts that have been
  /// performed, yields the total time after which the next retry
  /// becomes due.
  const fn total_delay_exp(Milliseconds(init): Milliseconds<u64>, attempt: u16) -> u64 {
    // | attempt | total delay      |
    // | 1       | init             |
    // | 2       | init * 2         |
    // | 3       | init * 4         |
    // | ...     | ...              |
    // | n       | init * 2^(n-1)   |
    init * 2u64.pow((attempt - 1) as u32)
  }
}
