use crate::msg::parse_error::MessageParseError;

/// # Message Type
///
/// The two header bits that decide what the reliability layer owes
/// (or is owed) for a message.
///
/// |                 | reliability meaning |
/// |-----------------|---------------------|
/// | [`Type::Con`]   | retransmitted with backoff until the peer answers ACK or RST |
/// | [`Type::Non`]   | sent once; a lost frame is the application's problem |
/// | [`Type::Ack`]   | settles a CON by message id, possibly carrying a piggy-backed response |
/// | [`Type::Reset`] | rejects a message the receiver has no context for; also the "pong" of a CoAP ping, and how observers are shed |
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub enum Type {
  /// Confirmable; the sender keeps retransmitting until an
  /// Acknowledgement (or Reset) with the same message id arrives.
  Con,
  /// Non-confirmable; no acknowledgement, no retransmission.
  Non,
  /// Acknowledges receipt of a specific Confirmable message. May be
  /// Empty (the "separate response is coming" promise) or carry a
  /// piggy-backed response.
  Ack,
  /// The receiver could not process the message, or wants whatever
  /// relation it answers (e.g. an observation) to end.
  Reset,
}

impl Type {
  /// The 2-bit wire encoding (bits 2-3 of the header's first byte)
  pub const fn bits(self) -> u8 {
    match self {
      | Type::Con => 0,
      | Type::Non => 1,
      | Type::Ack => 2,
      | Type::Reset => 3,
    }
  }

  /// Parse the 2-bit wire encoding
  pub fn from_bits(bits: u8) -> Result<Self, MessageParseError> {
    match bits {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | b => Err(MessageParseError::InvalidType(b)),
    }
  }

  /// Whether the reliability layer will retransmit a message of this
  /// type until the peer acknowledges it
  pub fn is_confirmable(self) -> bool {
    self == Type::Con
  }
}

impl TryFrom<u8> for Type {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    Type::from_bits(b)
  }
}

impl From<Type> for u8 {
  fn from(t: Type) -> u8 {
    t.bits()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bits_round_trip() {
    for ty in [Type::Con, Type::Non, Type::Ack, Type::Reset] {
      assert_eq!(Type::from_bits(ty.bits()).unwrap(), ty);
    }

    assert_eq!(Type::from_bits(4), Err(MessageParseError::InvalidType(4)));
  }

  #[test]
  fn confirmability() {
    assert!(Type::Con.is_confirmable());
    assert!(!Type::Non.is_confirmable());
    assert!(!Type::Ack.is_confirmable());
    assert!(!Type::Reset.is_confirmable());
  }
}
