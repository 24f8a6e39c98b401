/// When included in a GET request, the Observe Option extends the GET
/// method so it does not only retrieve a current representation of the
/// target resource, but also requests the server to add or remove an
/// entry in the list of observers of the resource depending on the
/// option value. The list entry consists of the client endpoint and the
/// token specified by the client in the request. Possible values are:
///
///    `0` (register) adds the entry to the list, if not present;
///
///    `1` (deregister) removes the entry from the list, if present
#[derive(Hash, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Action {
  /// Tells the resource owner we would like to observe updates to
  /// the resource we've issued a GET request for.
  Register,
  /// Tells the resource owner we would no longer like to observe updates to
  /// the resource we've issued a GET request for.
  Deregister,
}

impl Action {
  /// Try to parse from an option value
  pub fn from_uint(n: u64) -> Option<Self> {
    match n {
      | 0 => Some(Action::Register),
      | 1 => Some(Action::Deregister),
      | _ => None,
    }
  }
}

impl From<Action> for u64 {
  fn from(a: Action) -> Self {
    match a {
      | Action::Register => 0,
      | Action::Deregister => 1,
    }
  }
}

/// Sequence numbers in update notifications wrap at 2^24 (they occupy
/// at most 3 option value bytes).
pub const SEQ_MODULUS: u32 = 1 << 24;

/// The RFC 7641 section 3.4 freshness rule, modular half.
///
/// `v1` is fresher than `v2` iff
/// `(v1 < v2 and v2 - v1 < 2^23) or (v1 > v2 and v1 - v2 > 2^23)`
/// (note the inverted operand order relative to the RFC text: this
/// compares the *newly received* value `v1` against the *last seen*
/// value `v2`).
///
/// The other half of the rule - "or v2 was received more than 128
/// seconds ago" - needs a clock and lives with the observe managers.
///
/// ```
/// use newt_msg::opt::known::observe::fresher;
///
/// assert!(fresher(2, 1));
/// assert!(!fresher(1, 2));
/// // wrap-around: 3 is fresher than (2^24 - 2)
/// assert!(fresher(3, (1 << 24) - 2));
/// ```
pub fn fresher(v1: u32, v2: u32) -> bool {
  let (v1, v2) = (v1 % SEQ_MODULUS, v2 % SEQ_MODULUS);
  const HALF: u32 = 1 << 23;

  (v1 > v2 && v1 - v2 < HALF) || (v1 < v2 && v2 - v1 > HALF)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn freshness() {
    assert!(fresher(1, 0));
    assert!(fresher(100, 99));
    assert!(!fresher(99, 100));
    assert!(!fresher(42, 42));

    // serial arithmetic near the wrap point
    assert!(fresher(0, SEQ_MODULUS - 1));
    assert!(!fresher(SEQ_MODULUS - 1, 0));

    // a jump of exactly 2^23 is not fresher in either direction
    assert!(!fresher(1 << 23, 0));
    assert!(!fresher(0, 1 << 23));
  }

  #[test]
  fn action_round_trip() {
    assert_eq!(Action::from_uint(0), Some(Action::Register));
    assert_eq!(Action::from_uint(1), Some(Action::Deregister));
    assert_eq!(Action::from_uint(2), None);
    assert_eq!(u64::from(Action::Register), 0);
  }
}
