/// # Message Code
///
/// 8-bit value split into a 3-bit class and 5-bit detail,
/// written `class.detail` (e.g. `2.05` Content, `4.04` Not Found).
///
/// The class indicates whether the message is a request (0.01-0.31),
/// a success response (2.xx), a client error response (4.xx), a server
/// error response (5.xx), or Empty (0.00).
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Code {
  /// The "class" of message codes identify it as a request or response, and provides the class of response status:
  ///
  /// |class|meaning|
  /// |---|---|
  /// |`0`|Message is a request|
  /// |`2`|Message is a success response|
  /// |`4`|Message is a client error response|
  /// |`5`|Message is a server error response|
  pub class: u8,
  /// 2nd level of detail for the code (e.g. the `04` of `4.04 NOT FOUND`)
  pub detail: u8,
}

impl Default for Code {
  fn default() -> Self {
    Code::EMPTY
  }
}

/// Whether a code is for a request, response, or empty message
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum CodeKind {
  /// A request code (0.01-0.31)
  Request,
  /// A response code (2.xx, 4.xx, 5.xx)
  Response,
  /// EMPTY (0.00)
  Empty,
}

impl Code {
  /// `0.00`, the code of Empty messages (ping, empty ACK, RST)
  pub const EMPTY: Code = Code::new(0, 0);
  /// `0.01` GET
  pub const GET: Code = Code::new(0, 1);
  /// `0.02` POST
  pub const POST: Code = Code::new(0, 2);
  /// `0.03` PUT
  pub const PUT: Code = Code::new(0, 3);
  /// `0.04` DELETE
  pub const DELETE: Code = Code::new(0, 4);

  /// Create a new Code from a class and detail
  ///
  /// ```
  /// use newt_msg::Code;
  ///
  /// let content = Code::new(2, 05);
  /// ```
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// Whether this code is for a request, response, or empty message
  ///
  /// ```
  /// use newt_msg::{Code, CodeKind};
  ///
  /// assert_eq!(Code::new(0, 1).kind(), CodeKind::Request);
  /// assert_eq!(Code::new(2, 5).kind(), CodeKind::Response);
  /// assert_eq!(Code::new(0, 0).kind(), CodeKind::Empty);
  /// ```
  pub fn kind(&self) -> CodeKind {
    match (self.class, self.detail) {
      | (0, 0) => CodeKind::Empty,
      | (0, _) => CodeKind::Request,
      | _ => CodeKind::Response,
    }
  }

  /// Whether this code is a client (4.xx) or server (5.xx) error
  pub fn is_error(&self) -> bool {
    matches!(self.class, 4 | 5)
  }
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    // class is the top 3 bits, detail the bottom 5
    Code { class: b >> 5,
           detail: b & 0b0001_1111 }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    (code.class << 5) | code.detail
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn byte_conversion() {
    let content = Code::new(2, 5);
    assert_eq!(u8::from(content), 0b0100_0101);
    assert_eq!(Code::from(0b0100_0101), content);

    let empty = Code::from(0);
    assert_eq!(empty, Code::EMPTY);
    assert_eq!(empty.kind(), CodeKind::Empty);
  }

  #[test]
  fn error_codes() {
    assert!(Code::new(4, 4).is_error());
    assert!(Code::new(5, 0).is_error());
    assert!(!Code::new(2, 5).is_error());
    assert!(!Code::GET.is_error());
  }
}
