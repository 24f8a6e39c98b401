use tinyvec::ArrayVec;

/// # Token
///
/// 0 to 8 bytes of opaque data chosen by the client, echoed by the
/// server in every response to the request that carried it. The token
/// is the sole correlator between a request and its response(s) - the
/// message ID is not used for this.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// Take an arbitrary-length sequence of bytes and turn it into an
  /// opaque 8-byte message token, using the BLAKE2 hashing algorithm.
  ///
  /// ```
  /// use newt_msg::Token;
  ///
  /// let token = Token::opaque(&[0, 1, 2]);
  /// assert_eq!(token.0.len(), 8);
  /// ```
  pub fn opaque(data: &[u8]) -> Token {
    use blake2::digest::consts::U8;
    use blake2::{Blake2b, Digest};

    let mut digest = Blake2b::<U8>::new();
    digest.update(data);
    Token(Into::<[u8; 8]>::into(digest.finalize()).into())
  }

  /// Encode an unsigned counter value as a token in its minimal
  /// big-endian form; zero becomes the empty token.
  ///
  /// ```
  /// use newt_msg::Token;
  ///
  /// assert_eq!(Token::counter(0).0.as_ref(), &[] as &[u8]);
  /// assert_eq!(Token::counter(0x0102).0.as_ref(), &[1, 2]);
  /// ```
  pub fn counter(n: u64) -> Token {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    Token(bytes[skip..].iter().copied().collect())
  }
}
