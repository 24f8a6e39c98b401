use tinyvec::ArrayVec;

use crate::cursor::Cursor;
use crate::from_bytes::{TryConsumeBytes, TryFromBytes};

/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

/// The message body; opaque bytes following the `0xFF` marker,
/// or empty when the marker is absent.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Payload(pub Vec<u8>);

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (CON, NON, ACK, RESET)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ver = b >> 6; // bits 0 & 1
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    if ver != 1 {
      return Err(MessageParseError::InvalidVersion(ver));
    }

    Ok(Byte1 { ver: Version(ver),
               ty: Type::try_from(ty)?,
               tkl })
  }
}

/// # `Message` struct
/// Low-level representation of a CoAP message, close to the actual
/// byte layout.
///
/// Options live in a multimap (see [`Opts`]) whose iteration order is
/// the canonical ascending-by-number order required on the wire, with
/// per-number values kept in insertion order.
///
/// Supports serializing to and parsing from bytes via the
/// [`TryIntoBytes`](crate::TryIntoBytes) and [`TryFromBytes`] traits.
///
/// ```
/// use newt_msg::{Message, TryFromBytes, TryIntoBytes};
///
/// # let (msg, bytes) = newt_msg::test_msg();
/// let parsed = Message::try_from_bytes(&bytes).unwrap();
/// assert_eq!(parsed, msg);
/// assert_eq!(parsed.try_into_bytes().unwrap(), bytes);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`Opts`] for details
  pub opts: Opts,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create a new message with no options or payload
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           ty,
           ver: Version::default(),
           token,
           code,
           opts: Opts::default(),
           payload: Payload(Vec::new()) }
  }

  /// Create the empty ACK that acknowledges message `id`.
  ///
  /// Empty messages carry code 0.00 and, per RFC 7252 section 4.1, no
  /// token, no options and no payload; this constructor is the only
  /// supported way to build one and upholds that invariant.
  pub fn empty_ack(id: Id) -> Self {
    Self::new(Type::Ack, Code::EMPTY, id, Token::default())
  }

  /// Create the RST that rejects message `id`.
  ///
  /// Same invariants as [`Message::empty_ack`].
  pub fn empty_reset(id: Id) -> Self {
    Self::new(Type::Reset, Code::EMPTY, id, Token::default())
  }

  /// Create a CoAP ping: an Empty message of type CON, which the
  /// receiver answers with RST.
  pub fn ping(id: Id) -> Self {
    Self::new(Type::Con, Code::EMPTY, id, Token::default())
  }

  /// The number of bytes this message will occupy when serialized,
  /// used to reserve buffer capacity.
  pub fn get_size(&self) -> usize {
    let opts: usize = self.opts
                          .iter()
                          .flat_map(|(_, vs)| vs.iter())
                          .map(|v| 5 + v.0.len())
                          .sum();

    4 + self.token.0.len() + opts + 1 + self.payload.0.len()
  }

  /// Replace all values of option `n` with `value`.
  ///
  /// Errors when `value` violates the registered length bounds for
  /// `n`; the message is unchanged in that case.
  pub fn set(&mut self, n: OptNumber, value: OptValue) -> Result<(), SetError> {
    opt::check_len(n, &value)?;
    self.opts.insert(n, vec![value]);
    Ok(())
  }

  /// Append a value for the repeatable option `n`.
  ///
  /// Errors when `n` is registered non-repeatable and already present,
  /// or when `value` violates the length bounds; the message is
  /// unchanged in either case.
  pub fn add(&mut self, n: OptNumber, value: OptValue) -> Result<(), SetError> {
    opt::check_len(n, &value)?;

    match known::meta(n) {
      | Some(meta) if !meta.repeatable && self.opts.contains_key(&n) => {
        Err(SetError::Repeated(n))
      },
      | _ => {
        self.opts.entry(n).or_default().push(value);
        Ok(())
      },
    }
  }

  /// The first value of option `n`, if present
  pub fn get(&self, n: OptNumber) -> Option<&OptValue> {
    self.opts.get(&n).and_then(|vs| vs.first())
  }

  /// All values of option `n`, in insertion order.
  ///
  /// An absent option yields an empty slice, never an error.
  pub fn get_all(&self, n: OptNumber) -> &[OptValue] {
    self.opts.get(&n).map(|vs| vs.as_slice()).unwrap_or(&[])
  }

  /// Remove all values of option `n`, returning them
  pub fn remove(&mut self, n: OptNumber) -> Vec<OptValue> {
    self.opts.remove(&n).unwrap_or_default()
  }

  /// The full path reconstructed from the Uri-Path options, or None
  /// when no such option is present.
  ///
  /// ```
  /// use newt_msg::{Code, Id, Message, Token, Type};
  ///
  /// let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token::default());
  /// msg.set_path("who/is/newt").unwrap();
  /// assert_eq!(msg.path().unwrap(), "who/is/newt");
  /// ```
  pub fn path(&self) -> Option<String> {
    let segs = self.get_all(known::repeat::PATH);
    if segs.is_empty() {
      return None;
    }

    Some(segs.iter()
             .map(|v| String::from_utf8_lossy(&v.0))
             .collect::<Vec<_>>()
             .join("/"))
  }

  /// Set the Uri-Path options from a `/`-separated path.
  ///
  /// A leading `/` is dropped. Existing Uri-Path options are replaced;
  /// on a length violation the previous path is restored.
  pub fn set_path(&mut self, path: impl AsRef<str>) -> Result<(), SetError> {
    let path = path.as_ref();
    let path = path.strip_prefix('/').unwrap_or(path);

    let old = self.remove(known::repeat::PATH);

    if path.is_empty() {
      return Ok(());
    }

    for seg in path.split('/') {
      if let Err(e) = self.add(known::repeat::PATH, OptValue::string(seg)) {
        self.opts.insert(known::repeat::PATH, old);
        return Err(e);
      }
    }

    Ok(())
  }

  /// All Uri-Query values, in insertion order
  pub fn queries(&self) -> &[OptValue] {
    self.get_all(known::repeat::QUERY)
  }

  /// Append one `key=value` component to the Uri-Query options
  pub fn add_query(&mut self, query: impl AsRef<str>) -> Result<(), SetError> {
    self.add(known::repeat::QUERY, OptValue::string(query))
  }

  /// The Observe option's sequence number, or None when absent
  pub fn observe(&self) -> Option<u32> {
    self.get(known::no_repeat::OBSERVE)
        .and_then(|v| v.as_uint())
        .map(|n| n as u32)
  }

  /// The Observe option interpreted as a register/deregister request
  pub fn observe_action(&self) -> Option<known::observe::Action> {
    self.observe()
        .and_then(|n| known::observe::Action::from_uint(n as u64))
  }

  /// Set the Observe option to a sequence number (taken modulo 2^24)
  pub fn set_observe(&mut self, seq: u32) -> Result<(), SetError> {
    self.set(known::no_repeat::OBSERVE,
             OptValue::uint((seq % known::observe::SEQ_MODULUS) as u64))
  }

  /// The Content-Format option, or None when absent
  pub fn content_format(&self) -> Option<known::ContentFormat> {
    self.get(known::no_repeat::CONTENT_FORMAT)
        .and_then(|v| v.as_uint())
        .map(|n| known::ContentFormat::from(n as u16))
  }

  /// Set the Content-Format option
  pub fn set_content_format(&mut self, format: known::ContentFormat) -> Result<(), SetError> {
    self.set(known::no_repeat::CONTENT_FORMAT,
             OptValue::uint(format.value() as u64))
  }

  /// The content formats the sender accepts.
  ///
  /// An absent option yields an empty vec, never an error.
  pub fn accept(&self) -> Vec<known::ContentFormat> {
    self.get_all(known::repeat::ACCEPT)
        .iter()
        .filter_map(|v| v.as_uint())
        .map(|n| known::ContentFormat::from(n as u16))
        .collect()
  }

  /// Replace the Accept options. On a length violation all Accept
  /// options are removed before the error is returned.
  pub fn set_accept(&mut self,
                    formats: impl IntoIterator<Item = known::ContentFormat>)
                    -> Result<(), SetError> {
    self.remove(known::repeat::ACCEPT);

    for f in formats {
      if let Err(e) = self.add(known::repeat::ACCEPT, OptValue::uint(f.value() as u64)) {
        self.remove(known::repeat::ACCEPT);
        return Err(e);
      }
    }

    Ok(())
  }

  /// Max-Age in seconds; the option's absence encodes the default of 60
  pub fn max_age(&self) -> u64 {
    self.get(known::no_repeat::MAX_AGE)
        .and_then(|v| v.as_uint())
        .unwrap_or(known::MAX_AGE_DEFAULT)
  }

  /// All ETag option values.
  ///
  /// An absent option yields an empty slice, never an error.
  pub fn etags(&self) -> &[OptValue] {
    self.get_all(known::repeat::ETAG)
  }

  /// Parse just enough of a frame to identify it: type, code,
  /// message id and token.
  ///
  /// Used to construct protocol-level replies (RST, 4.02 Bad Option)
  /// to frames whose full decode failed.
  pub fn try_parse_header(bytes: &[u8]) -> Option<(Type, Code, Id, Token)> {
    let mut bytes = Cursor::new(bytes);

    let Byte1 { ty, tkl, .. } = bytes.next()?.try_into().ok()?;
    if tkl > 8 {
      return None;
    }

    let code: Code = bytes.next()?.into();
    let id = Id::try_consume_bytes(&mut bytes).ok()?;
    let token = Token(bytes.take_exact(tkl as usize)?
                           .iter()
                           .copied()
                           .collect());

    Some((ty, code, id, token))
  }
}

impl<B: AsRef<[u8]>> TryFromBytes<B> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: B) -> Result<Self, Self::Error> {
    let mut bytes = Cursor::new(bytes);

    let Byte1 { tkl, ty, ver } = bytes.next()
                                      .ok_or_else(MessageParseError::eof)?
                                      .try_into()?;

    if tkl > 8 {
      return Err(Self::Error::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();
    let id: Id = Id::try_consume_bytes(&mut bytes)?;

    let token = bytes.take_exact(tkl as usize)
                     .ok_or_else(MessageParseError::eof)?;
    let token = Token(ArrayVec::try_from(token).expect("tkl was checked to be <= 8"));

    let (opts, saw_marker) =
      opt::try_consume_opts(&mut bytes).map_err(Self::Error::OptParseError)?;

    if saw_marker && bytes.remaining() == 0 {
      return Err(Self::Error::UnexpectedPayloadMarker);
    }

    let payload = Payload(bytes.take_until_end().to_vec());

    if code.kind() == CodeKind::Empty
       && (tkl != 0 || !opts.is_empty() || !payload.0.is_empty())
    {
      return Err(Self::Error::InvalidEmptyMessage);
    }

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_msg;

  #[test]
  fn parse_msg() {
    let (expect, bytes) = test_msg();
    assert_eq!(Message::try_from_bytes(&bytes).unwrap(), expect)
  }

  #[test]
  fn parse_byte1() {
    let byte = 0b_01_10_0011u8;
    let byte = Byte1::try_from(byte).unwrap();
    assert_eq!(byte,
               Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 })
  }

  #[test]
  fn parse_rejects_bad_version() {
    assert_eq!(Byte1::try_from(0b_11_00_0000u8),
               Err(MessageParseError::InvalidVersion(3)));
  }

  #[test]
  fn parse_id() {
    let mut id_bytes = Cursor::new(34u16.to_be_bytes());
    let id = Id::try_consume_bytes(&mut id_bytes).unwrap();
    assert_eq!(id, Id(34));
  }

  #[test]
  fn parse_rejects_empty_message_with_token() {
    // CON 0.00 with tkl = 1
    let bytes = [0b0100_0001u8, 0, 0, 1, 0xAA];
    assert_eq!(Message::try_from_bytes(&bytes[..]),
               Err(MessageParseError::InvalidEmptyMessage));
  }

  #[test]
  fn parse_rejects_marker_without_payload() {
    // CON GET, no token, 0xFF then nothing
    let bytes = [0b0100_0000u8, 1, 0, 1, 0xFF];
    assert_eq!(Message::try_from_bytes(&bytes[..]),
               Err(MessageParseError::UnexpectedPayloadMarker));
  }

  #[test]
  fn empty_ack_invariants() {
    let ack = Message::empty_ack(Id(9));
    assert_eq!(ack.ty, Type::Ack);
    assert_eq!(ack.code, Code::EMPTY);
    assert_eq!(ack.token.0.len(), 0);
    assert!(ack.opts.is_empty());
    assert!(ack.payload.0.is_empty());

    let rst = Message::empty_reset(Id(9));
    assert_eq!(rst.ty, Type::Reset);
    assert_eq!(rst.code, Code::EMPTY);
  }

  #[test]
  fn header_peek() {
    let (msg, bytes) = test_msg();
    let (ty, code, id, token) = Message::try_parse_header(&bytes).unwrap();
    assert_eq!((ty, code, id, token), (msg.ty, msg.code, msg.id, msg.token));
  }

  #[test]
  fn non_repeatable_add_errors() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token::default());
    msg.add(known::no_repeat::OBSERVE, OptValue::uint(0)).unwrap();
    assert_eq!(msg.add(known::no_repeat::OBSERVE, OptValue::uint(1)),
               Err(SetError::Repeated(known::no_repeat::OBSERVE)));
  }

  #[test]
  fn set_path_rolls_back() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token::default());
    msg.set_path("a/b").unwrap();

    let too_long = "x".repeat(300);
    assert!(msg.set_path(format!("ok/{}", too_long)).is_err());
    assert_eq!(msg.path().unwrap(), "a/b");
  }

  #[test]
  fn accessors_absent_options() {
    let msg = Message::new(Type::Con, Code::GET, Id(1), Token::default());
    assert_eq!(msg.path(), None);
    assert_eq!(msg.observe(), None);
    assert_eq!(msg.accept(), vec![]);
    assert_eq!(msg.queries(), &[] as &[OptValue]);
    assert_eq!(msg.max_age(), 60);
  }
}
