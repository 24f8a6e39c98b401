use crate::cursor::Cursor;

/// Trait for fallible conversion from a buffer of bytes
pub trait TryFromBytes<B>: Sized {
  /// Error produced when conversion fails
  type Error;

  /// Try to convert a buffer of bytes into Self
  fn try_from_bytes(bytes: B) -> Result<Self, Self::Error>;
}

/// Trait for fallible conversion from some bytes taken from the
/// middle of a buffer being parsed.
pub(crate) trait TryConsumeBytes<B>: Sized {
  type Error;

  /// Try to parse Self out of the cursor, advancing it past the
  /// bytes consumed.
  fn try_consume_bytes(bytes: &mut Cursor<B>) -> Result<Self, Self::Error>;
}
