use crate::cursor::Cursor;
use crate::from_bytes::TryConsumeBytes;
use crate::msg::parse_error::MessageParseError;

/// # Message ID
///
/// 16-bit identifier scoped to a pair of endpoints, in network byte
/// order on the wire.
///
/// The message id exists for the reliability layer and the
/// reliability layer only: de-duplicating inbound CONs, and pairing a
/// CON with the ACK or RST that settles it. Correlating a *request*
/// with its *response* is the [`Token`](crate::Token)'s job - a
/// separate response deliberately arrives under a fresh id and is
/// matched by token alone.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Id(pub u16);

impl Id {
  /// The next id in sequence, wrapping at the end of the 16-bit space.
  ///
  /// Id generators hand these out one past the largest id seen on a
  /// conversation, so a fresh id is never mistaken for the
  /// retransmission of a recent one.
  pub fn next(self) -> Id {
    Id(self.0.wrapping_add(1))
  }
}

impl From<Id> for [u8; 2] {
  fn from(id: Id) -> [u8; 2] {
    id.0.to_be_bytes()
  }
}

impl<B: AsRef<[u8]>> TryConsumeBytes<B> for Id {
  type Error = MessageParseError;

  fn try_consume_bytes(bytes: &mut Cursor<B>) -> Result<Self, Self::Error> {
    bytes.take_exact(2)
         .map(|bs| Id(u16::from_be_bytes([bs[0], bs[1]])))
         .ok_or_else(MessageParseError::eof)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn next_wraps() {
    assert_eq!(Id(41).next(), Id(42));
    assert_eq!(Id(u16::MAX).next(), Id(0));
  }

  #[test]
  fn byte_order() {
    assert_eq!(<[u8; 2]>::from(Id(0x1234)), [0x12, 0x34]);
  }
}
