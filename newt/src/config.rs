use embedded_time::duration::Milliseconds;

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Configuration options related to handling outbound CON messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Con {
  /// Retry strategy for CON messages that have not been ACKed.
  ///
  /// Defaults to the RFC 7252 section 4.8 timing: an initial timeout
  /// of `ACK_TIMEOUT (2 s) × random(1.0, ACK_RANDOM_FACTOR (1.5))`,
  /// doubled on each retransmission.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Con;
  /// use newt::retry::Strategy;
  ///
  /// assert_eq!(Con::default().retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(2_000),
  ///                                    init_max: Milliseconds(3_000) });
  /// ```
  pub retry_strategy: Strategy,
  /// Total number of transmissions allowed for a CON message before
  /// its exchange fails with a timeout.
  ///
  /// Defaults to 5: the initial transmission plus `MAX_RETRANSMIT`
  /// (4) retransmissions.
  ///
  /// ```
  /// use newt::config::Con;
  /// use newt::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_attempts, Attempts(5));
  /// ```
  pub max_attempts: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con { retry_strategy: Strategy::Exponential { init_min: Milliseconds(2_000),
                                                  init_max: Milliseconds(3_000) },
          max_attempts: Attempts(5) }
  }
}

/// Configuration options related to building messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msg {
  /// Seed mixed into generated message [`Token`](newt_msg::Token)s,
  /// customizable to make tokens less guessable across endpoint
  /// restarts.
  ///
  /// The default value is 0, although it is best practice to set this
  /// to something else (random integer, machine identifier).
  ///
  /// ```
  /// use newt::config::Msg;
  ///
  /// assert_eq!(Msg::default().token_seed, 0);
  /// ```
  pub token_seed: u16,

  /// See [`Con`]
  pub con: Con,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { token_seed: 0,
          con: Con::default() }
  }
}

/// Runtime config
///
/// The durations here are the protocol parameters of RFC 7252
/// section 4.8 and RFC 7641, surfaced as one explicit record passed at
/// endpoint construction rather than process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Config {
  /// See [`Msg`]
  pub msg: Msg,

  /// How long a server waits for the application to produce a
  /// response to a CON request before giving up on piggy-backing and
  /// sending an empty ACK (promising a separate response later).
  ///
  /// Must be comfortably below the peer's `ACK_TIMEOUT` or the peer
  /// will retransmit while we are still thinking.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().separate_response_threshold,
  ///            Milliseconds(1_800u64));
  /// ```
  pub separate_response_threshold: Millis,

  /// How long state about an exchange outlives its last activity:
  /// the retention window for inbound message-id de-duplication and
  /// the patience for a response to a pending request.
  ///
  /// The RFC derives `EXCHANGE_LIFETIME` (~247 s) from
  /// `MAX_TRANSMIT_SPAN + 2 × MAX_LATENCY + PROCESSING_DELAY`.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().exchange_lifetime,
  ///            Milliseconds(247_000u64));
  /// ```
  pub exchange_lifetime: Millis,

  /// The RFC 7641 section 3.4 freshness window: a notification is
  /// accepted regardless of its sequence number when the last one was
  /// received longer ago than this, and a server may reseed an
  /// observer's sequence from its clock after the same period of
  /// silence.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().notification_freshness_window,
  ///            Milliseconds(128_000u64));
  /// ```
  pub notification_freshness_window: Millis,

  /// Every n-th update notification to an observer is sent CON so
  /// that dead observers are eventually detected; the rest are NON.
  ///
  /// `1` makes every notification confirmable.
  ///
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().con_notification_interval, 8);
  /// ```
  pub con_notification_interval: u16,
}

impl Default for Config {
  fn default() -> Self {
    Config { msg: Msg::default(),
             separate_response_threshold: Milliseconds(1_800),
             exchange_lifetime: Milliseconds(247_000),
             notification_freshness_window: Milliseconds(128_000),
             con_notification_interval: 8 }
  }
}

impl Config {
  /// The maximum time from the first transmission of a CON to the
  /// last retransmission, for this config's retry strategy
  /// (the role `MAX_TRANSMIT_SPAN` plays in RFC 7252; 24 s with
  /// defaults, against the RFC's 45 s worst case).
  pub fn max_transmit_span_millis(&self) -> u64 {
    self.msg
        .con
        .retry_strategy
        .max_time(self.msg.con.max_attempts - Attempts(1))
        .0
  }

  /// The maximum time from the first transmission of a CON to the
  /// moment its sender gives up (the role `MAX_TRANSMIT_WAIT` plays
  /// in RFC 7252; 48 s with defaults).
  pub fn max_transmit_wait_millis(&self) -> u64 {
    self.msg
        .con
        .retry_strategy
        .max_time(self.msg.con.max_attempts)
        .0
  }
}
