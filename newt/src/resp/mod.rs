use newt_msg::known::observe::SEQ_MODULUS;
use newt_msg::known::{repeat, ContentFormat};
use newt_msg::{Code, CodeKind, Id, Message, OptValue, Payload, SetError, Token, Type};

use crate::core::InvariantViolation;
use crate::req::Req;

/// Response codes
pub mod code;

/// A CoAP response
///
/// A typed view over [`Message`] for messages carrying a response
/// code.
///
/// Note that the message type chosen here may be changed by the
/// runtime before the response hits the wire: a response to a CON
/// request that has not been acknowledged yet is always converted to a
/// piggy-backed ACK, and one produced after the empty ACK went out is
/// always sent as a fresh CON (the separate response).
#[derive(Debug, Clone, PartialEq)]
pub struct Resp {
  pub(crate) msg: Message,
}

impl Resp {
  /// Create a new response for a given request.
  ///
  /// If the request is CONfirmable, this will return an ACK
  /// (the piggy-backed shape).
  ///
  /// If the request is NONconfirmable, this will return a NON.
  ///
  /// If the request is EMPTY or RESET, this returns None.
  pub fn for_request(req: &Req) -> Option<Self> {
    match req.msg_type() {
      | Type::Con => Some(Self::ack(req)),
      | Type::Non => Some(Self::non(req)),
      | _ => None,
    }
  }

  /// Create a response ACKnowledging an incoming request.
  ///
  /// An ack response must be used when you receive a CON request and
  /// respond before the runtime's separate-response threshold passes.
  pub fn ack(req: &Req) -> Self {
    let msg = Message::new(Type::Ack, code::CONTENT, req.msg_id(), req.msg_token());
    Self { msg }
  }

  /// Create a CONfirmable response for an incoming request.
  ///
  /// The runtime will continually retry sending this until an
  /// ACKnowledgement from the client is received.
  pub fn con(req: &Req) -> Self {
    let msg = Message::new(Type::Con, code::CONTENT, Id(0), req.msg_token());
    Self { msg }
  }

  /// Create a NONconfirmable response for an incoming request.
  ///
  /// A non-confirmable response should be used when you receive a NON
  /// request and don't need to ensure the client received the
  /// response.
  pub fn non(req: &Req) -> Self {
    let msg = Message::new(Type::Non, code::CONTENT, Id(0), req.msg_token());
    Self { msg }
  }

  /// Shortcut for building error responses: requires `code` to be a
  /// 4.xx or 5.xx code and sets the given text as a
  /// `text/plain; charset=utf-8` payload.
  ///
  /// ```
  /// use newt::resp::{code, Resp};
  /// use newt_msg::Type;
  ///
  /// let resp = Resp::error(Type::Non, code::NOT_FOUND, "no such resource").unwrap();
  /// assert_eq!(resp.payload_str().unwrap(), "no such resource");
  ///
  /// assert!(Resp::error(Type::Non, code::CONTENT, "not an error").is_err());
  /// ```
  pub fn error(ty: Type,
               code: Code,
               text: impl AsRef<str>)
               -> Result<Self, InvariantViolation> {
    if !code.is_error() {
      return Err(InvariantViolation::NotAnErrorCode);
    }

    if !matches!(ty, Type::Con | Type::Non | Type::Ack) {
      return Err(InvariantViolation::BadMessageTypeForCode);
    }

    let mut msg = Message::new(ty, code, Id(0), Token::default());
    msg.set_content_format(ContentFormat::Text).ok();
    msg.payload = Payload(text.as_ref().as_bytes().to_vec());

    Ok(Self { msg })
  }

  /// Get the response code
  pub fn code(&self) -> Code {
    self.msg.code
  }

  /// Change the response code
  pub fn set_code(&mut self, code: Code) -> () {
    self.msg.code = code;
  }

  /// Get the message type
  pub fn msg_type(&self) -> Type {
    self.msg.ty
  }

  /// Get a copy of the message id
  pub fn msg_id(&self) -> Id {
    self.msg.id
  }

  /// Get a copy of the token
  pub fn msg_token(&self) -> Token {
    self.msg.token
  }

  /// Add a payload to this response
  pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
    self.msg.payload = Payload(payload.into());
  }

  /// Get the payload's raw bytes
  pub fn payload(&self) -> &[u8] {
    &self.msg.payload.0
  }

  /// Get the payload and attempt to interpret it as a UTF-8 string
  pub fn payload_str(&self) -> Result<&str, core::str::Utf8Error> {
    core::str::from_utf8(self.payload())
  }

  /// Set the Content-Format of the payload
  pub fn set_content_format(&mut self, format: ContentFormat) -> () {
    self.msg.set_content_format(format).ok();
  }

  /// Set the location of a freshly created resource, one
  /// Location-Path option per path segment and one Location-Query
  /// option per query parameter.
  ///
  /// The leading `/` of the path is dropped; scheme, authority and
  /// port do not belong in these options and are not accepted here.
  /// On any length violation the previously present location options
  /// are restored and the error returned.
  ///
  /// ```
  /// use newt::req::Req;
  /// use newt::resp::Resp;
  ///
  /// let req = Req::post("10.0.0.1:5683".parse().unwrap(), "things");
  /// let mut resp = Resp::for_request(&req).unwrap();
  ///
  /// resp.set_location_uri("/things/42", Some("rev=1")).unwrap();
  /// assert_eq!(resp.location_uri().unwrap(), "/things/42?rev=1");
  /// ```
  pub fn set_location_uri(&mut self,
                          path: impl AsRef<str>,
                          query: Option<&str>)
                          -> Result<(), SetError> {
    let old_path = self.msg.remove(repeat::LOCATION_PATH);
    let old_query = self.msg.remove(repeat::LOCATION_QUERY);

    let rollback = |msg: &mut Message, e: SetError| {
      msg.remove(repeat::LOCATION_PATH);
      msg.remove(repeat::LOCATION_QUERY);
      if !old_path.is_empty() {
        msg.opts.insert(repeat::LOCATION_PATH, old_path.clone());
      }
      if !old_query.is_empty() {
        msg.opts.insert(repeat::LOCATION_QUERY, old_query.clone());
      }
      Err(e)
    };

    let path = path.as_ref();
    let path = path.strip_prefix('/').unwrap_or(path);

    for seg in path.split('/').filter(|s| !s.is_empty()) {
      if let Err(e) = self.msg.add(repeat::LOCATION_PATH, OptValue::string(seg)) {
        return rollback(&mut self.msg, e);
      }
    }

    for param in query.iter().flat_map(|q| q.split('&')) {
      if let Err(e) = self.msg
                          .add(repeat::LOCATION_QUERY, OptValue::string(param))
      {
        return rollback(&mut self.msg, e);
      }
    }

    Ok(())
  }

  /// The location URI reconstructed from the Location-Path and
  /// Location-Query options, or None when neither option is present
  pub fn location_uri(&self) -> Option<String> {
    let path = self.msg
                   .get_all(repeat::LOCATION_PATH)
                   .iter()
                   .filter_map(|v| v.as_str())
                   .fold(String::new(), |acc, seg| format!("{}/{}", acc, seg));

    let query = self.msg
                    .get_all(repeat::LOCATION_QUERY)
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join("&");

    match (path.is_empty(), query.is_empty()) {
      | (true, true) => None,
      | (false, true) => Some(path),
      | (true, false) => Some(format!("?{}", query)),
      | (false, false) => Some(format!("{}?{}", path, query)),
    }
  }

  /// Set the Observe option to a sequence number (taken modulo 2^24)
  pub fn set_observe(&mut self, seq: u32) -> () {
    self.msg.set_observe(seq % SEQ_MODULUS).ok();
  }

  /// The Observe option's sequence number, or None when absent
  pub fn observe(&self) -> Option<u32> {
    self.msg.observe()
  }

  /// Whether this response is an update notification, i.e. carries
  /// the Observe option
  pub fn is_update_notification(&self) -> bool {
    self.observe().is_some()
  }

  /// Borrow the underlying message
  pub fn msg(&self) -> &Message {
    &self.msg
  }

  /// Mutably borrow the underlying message
  pub fn msg_mut(&mut self) -> &mut Message {
    &mut self.msg
  }
}

/// Check that a message's type and code are allowed to travel
/// together in a response.
pub(crate) fn check_response_invariants(ty: Type, code: Code) -> Result<(), InvariantViolation> {
  match (ty, code.kind()) {
    | (Type::Con | Type::Non | Type::Ack, CodeKind::Response) => Ok(()),
    | _ => Err(InvariantViolation::BadMessageTypeForCode),
  }
}

impl From<Resp> for Message {
  fn from(resp: Resp) -> Self {
    resp.msg
  }
}

impl From<Message> for Resp {
  fn from(msg: Message) -> Self {
    Self { msg }
  }
}
