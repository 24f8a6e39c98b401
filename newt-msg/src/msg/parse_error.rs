use crate::msg::opt::parse_error::OptParseError;

/// Errors that can occur during parsing a message from bytes
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MessageParseError {
  /// Reached end of stream before finding expected data
  UnexpectedEndOfStream,
  /// Token length was > 8
  InvalidTokenLength(u8),
  /// Error parsing option
  OptParseError(OptParseError),
  /// The rest of the message contained more bytes than there was
  /// capacity for
  UnexpectedPayloadMarker,
  /// Protocol version was not 1
  InvalidVersion(u8),
  /// The type indicator was not CON, NON, ACK or RESET
  InvalidType(u8),
  /// A message with code 0.00 (Empty) carried a token, options,
  /// or a payload.
  ///
  /// RFC 7252 section 4.1 requires such frames to be treated as
  /// format errors.
  InvalidEmptyMessage,
}

impl MessageParseError {
  /// Shorthand for [`MessageParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}

impl From<OptParseError> for MessageParseError {
  fn from(e: OptParseError) -> Self {
    Self::OptParseError(e)
  }
}
