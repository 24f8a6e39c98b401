use embedded_time::clock::Error;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = embedded_time::duration::Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Milliseconds elapsed between two instants, saturating at zero when
/// `b` is not later than `a`.
pub(crate) fn millis_between<C: Clock>(a: Instant<C>, b: Instant<C>) -> u64 {
  b.checked_duration_since(&a)
   .and_then(|dur| Millis::try_from(dur).ok())
   .map(|millis| millis.0)
   .unwrap_or(0)
}

/// Milliseconds since the clock's epoch
pub(crate) fn millis_since_epoch<C: Clock>(now: Instant<C>) -> u64 {
  Millis::try_from(now.duration_since_epoch()).map(|millis| millis.0)
                                              .unwrap_or(0)
}

/// Data associated with a timestamp
#[derive(Debug)]
pub struct Stamped<C: Clock, T>(pub T, pub Instant<C>);

impl<C: Clock, T: PartialEq> PartialEq for Stamped<C, T> {
  fn eq(&self, other: &Self) -> bool {
    self.0 == other.0 && self.1 == other.1
  }
}

impl<C: Clock, T: Eq> Eq for Stamped<C, T> {}

impl<C: Clock, T: Clone> Clone for Stamped<C, T> {
  fn clone(&self) -> Self {
    Self(self.0.clone(), self.1)
  }
}

impl<C: Clock, T: Copy> Copy for Stamped<C, T> {}

impl<C: Clock, T> Stamped<C, T> {
  /// Stamp `t` with the clock's current time
  pub fn new(clock: &C, t: T) -> Result<Self, Error> {
    clock.try_now().map(|now| Self(t, now))
  }

  /// Borrow the data
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the data
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Copy the timestamp
  pub fn time(&self) -> Instant<C> {
    self.1
  }

  /// Discard the timestamp
  pub fn discard_timestamp(self) -> T {
    self.0
  }
}
