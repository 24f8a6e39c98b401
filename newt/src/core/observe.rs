use embedded_time::Instant;
use newt_msg::known::observe::{fresher, SEQ_MODULUS};
use newt_msg::{Id, Token};
use no_std_net::SocketAddr;

use crate::time::{millis_between, millis_since_epoch, Clock, Millis};

/// The server half of an observe relation: one client that asked to
/// watch one resource.
///
/// Relations are stored flat, keyed by `(path, addr, token)`; the
/// resource itself only ever refers to its path, there are no
/// back-pointers.
#[derive(Debug, Clone)]
pub(crate) struct Observer<C: Clock> {
  pub(crate) path: String,
  pub(crate) addr: SocketAddr,
  pub(crate) token: Token,
  /// Sequence number of the last notification (or of the
  /// registration response when nothing was notified yet)
  pub(crate) seq: u32,
  /// When the last notification (or the registration) went out
  pub(crate) last_emit: Instant<C>,
  /// Notifications sent to this observer so far
  pub(crate) notification_count: u32,
  /// Message id of the most recent notification, for matching RSTs
  pub(crate) last_notification_id: Option<Id>,
  /// Consecutive CON notifications that ran out of retransmissions
  pub(crate) failed_cons: u16,
}

impl<C: Clock> Observer<C> {
  /// The sequence number for the next notification.
  ///
  /// Normally the successor of the previous number (mod 2^24), which
  /// is always strictly fresher by the RFC 7641 section 3.4 rule.
  /// After `freshness_window` (128 s) of silence the client will
  /// accept any number, and we reseed from the clock so sequence
  /// numbers survive service restarts.
  pub(crate) fn next_seq(&mut self, now: Instant<C>, freshness_window: Millis) -> u32 {
    let silent_for = millis_between(self.last_emit, now);

    let next = if silent_for > freshness_window.0 {
      (millis_since_epoch(now) % SEQ_MODULUS as u64) as u32
    } else {
      (self.seq + 1) % SEQ_MODULUS
    };

    debug_assert!(silent_for > freshness_window.0 || fresher(next, self.seq));

    self.seq = next;
    self.last_emit = now;
    self.notification_count += 1;
    next
  }
}

/// All observe relations of a server endpoint
#[derive(Debug, Default)]
pub(crate) struct Registry<C: Clock> {
  observers: Vec<Observer<C>>,
}

impl<C: Clock> Registry<C> {
  pub(crate) fn new() -> Self {
    Self { observers: Vec::new() }
  }

  /// Add `(addr, token)` to the observers of `path`, seeding the
  /// sequence number from the clock (`now_millis mod 2^24`).
  ///
  /// Registering an existing relation again resets it, per RFC 7641
  /// ("adds the entry to the list, if not present").
  ///
  /// Returns the initial sequence number, to be set on the
  /// registration response.
  pub(crate) fn register(&mut self,
                         path: impl Into<String>,
                         addr: SocketAddr,
                         token: Token,
                         now: Instant<C>)
                         -> u32 {
    self.deregister(addr, token);

    let seq = (millis_since_epoch(now) % SEQ_MODULUS as u64) as u32;
    self.observers.push(Observer { path: path.into(),
                                   addr,
                                   token,
                                   seq,
                                   last_emit: now,
                                   notification_count: 0,
                                   last_notification_id: None,
                                   failed_cons: 0 });
    seq
  }

  /// Remove the relation `(addr, token)`, returning whether one
  /// existed
  pub(crate) fn deregister(&mut self, addr: SocketAddr, token: Token) -> bool {
    let before = self.observers.len();
    self.observers
        .retain(|o| !(o.addr == addr && o.token == token));
    before != self.observers.len()
  }

  /// The observer registered as `(addr, token)`, if any
  pub(crate) fn get_mut(&mut self, addr: SocketAddr, token: Token) -> Option<&mut Observer<C>> {
    self.observers
        .iter_mut()
        .find(|o| o.addr == addr && o.token == token)
  }

  /// Remove the observer whose most recent notification carried
  /// message id `id`, returning whether one existed.
  ///
  /// This is how an RST answering a notification ends the relation.
  pub(crate) fn remove_by_notification_id(&mut self, addr: SocketAddr, id: Id) -> bool {
    let before = self.observers.len();
    self.observers
        .retain(|o| !(o.addr == addr && o.last_notification_id == Some(id)));
    before != self.observers.len()
  }

  /// A CON notification to the observer `(addr, token)` was
  /// acknowledged; the observer is alive.
  pub(crate) fn con_acked(&mut self, addr: SocketAddr, token: Token) {
    if let Some(o) = self.get_mut(addr, token) {
      o.failed_cons = 0;
    }
  }

  /// A CON notification to the observer `(addr, token)` ran out of
  /// retransmissions.
  ///
  /// After `max_failures` consecutive such timeouts the observer is
  /// considered gone and removed; returns whether it was.
  pub(crate) fn con_timed_out(&mut self, addr: SocketAddr, token: Token, max_failures: u16) -> bool {
    match self.observers
              .iter_mut()
              .position(|o| o.addr == addr && o.token == token)
    {
      | Some(ix) => {
        self.observers[ix].failed_cons += 1;
        if self.observers[ix].failed_cons >= max_failures {
          self.observers.remove(ix);
          true
        } else {
          false
        }
      },
      | None => false,
    }
  }

  /// All observers of `path`, oldest registration first (the
  /// fan-out emission order).
  pub(crate) fn observers_of_mut(&mut self,
                                 path: &str)
                                 -> impl Iterator<Item = &mut Observer<C>> {
    let path = path.to_string();
    self.observers.iter_mut().filter(move |o| o.path == path)
  }

  /// Remove every observer of `path`, returning them (so a
  /// cancellation notification can be sent to each).
  pub(crate) fn remove_path(&mut self, path: &str) -> Vec<Observer<C>> {
    let (removed, kept) = std::mem::take(&mut self.observers).into_iter()
                                                             .partition(|o| o.path == path);
    self.observers = kept;
    removed
  }

  /// Remove every observer, returning them
  pub(crate) fn drain(&mut self) -> Vec<Observer<C>> {
    std::mem::take(&mut self.observers)
  }

  /// Number of live relations
  pub(crate) fn len(&self) -> usize {
    self.observers.len()
  }
}
