use core::fmt::Write;

use newt_msg::known::observe::Action;
use newt_msg::known::no_repeat;
use newt_msg::{Code, Id, Message, OptNumber, OptValue, Payload, SetError, Token, Type};
use no_std_net::{IpAddr, SocketAddr};

use crate::core::InvariantViolation;
use crate::net::Addrd;

/// Request methods
pub mod method;

#[doc(inline)]
pub use method::Method;

/// A CoAP request
///
/// A typed view over [`Message`] whose constructors only allow
/// type CON or NON and a request code.
///
/// The message id and token are provisioned by the runtime when the
/// request is sent; converting a `Req` into a [`Message`] before the
/// runtime has done so (or [`Req::set_msg_id`] / [`Req::set_msg_token`]
/// were called manually) panics.
#[derive(Debug, Clone, PartialEq)]
pub struct Req {
  pub(crate) msg: Message,
  pub(crate) id: Option<Id>,
  pub(crate) token: Option<Token>,
}

impl Req {
  /// Create a request
  ///
  /// The request is CONfirmable by default; see [`Req::non`].
  pub fn new(method: Method, host: SocketAddr, path: impl AsRef<str>) -> Self {
    let msg = Message::new(Type::Con, method.0, Id(0), Token::default());
    let mut me = Self { msg,
                        id: None,
                        token: None };

    let mut host_str = String::new();
    write!(host_str, "{}", host.ip()).ok();

    me.msg
      .set(no_repeat::HOST, OptValue::string(host_str))
      .ok();
    me.msg
      .set(no_repeat::PORT, OptValue::uint(host.port() as u64))
      .ok();
    me.msg.set_path(path).ok();

    me
  }

  /// Creates a new GET request
  pub fn get(host: SocketAddr, path: impl AsRef<str>) -> Self {
    Self::new(Method::GET, host, path)
  }

  /// Creates a new POST request
  pub fn post(host: SocketAddr, path: impl AsRef<str>) -> Self {
    Self::new(Method::POST, host, path)
  }

  /// Creates a new PUT request
  pub fn put(host: SocketAddr, path: impl AsRef<str>) -> Self {
    Self::new(Method::PUT, host, path)
  }

  /// Creates a new DELETE request
  pub fn delete(host: SocketAddr, path: impl AsRef<str>) -> Self {
    Self::new(Method::DELETE, host, path)
  }

  /// Create a request from an absolute `coap://` URI, decomposing it
  /// into the target-URI options.
  ///
  /// Rules applied (RFC 7252 section 6.4):
  ///  - the scheme must be `coap` and the URI must not have a fragment;
  ///  - the host must be an IP literal (this library does not resolve
  ///    names), and since a literal equal to the destination address
  ///    carries no information, no Uri-Host option is emitted;
  ///  - Uri-Port is emitted only when the port is not 5683;
  ///  - one Uri-Path option per `/`-separated segment (leading `/`
  ///    dropped), one Uri-Query option per `&`-separated parameter.
  ///
  /// With `use_proxy`, none of that happens: the URI goes into the
  /// Proxy-Uri option verbatim for the proxy to take apart.
  ///
  /// ```
  /// use newt::req::{Method, Req};
  ///
  /// let req = Req::from_uri(Method::GET, "coap://127.0.0.1/temp?unit=c", false).unwrap();
  /// assert_eq!(req.addr().port(), 5683);
  /// assert_eq!(req.data().uri_query_parameter("unit").unwrap(), "c");
  /// ```
  pub fn from_uri(method: Method,
                  uri: impl AsRef<str>,
                  use_proxy: bool)
                  -> Result<Addrd<Self>, InvariantViolation> {
    let uri = uri.as_ref();

    let rest = uri.strip_prefix("coap://")
                  .ok_or(InvariantViolation::UriBadScheme)?;

    if rest.contains('#') {
      return Err(InvariantViolation::UriHasFragment);
    }

    let (authority, path_and_query) = match rest.find(|c| c == '/' || c == '?') {
      | Some(ix) => (&rest[..ix], &rest[ix..]),
      | None => (rest, ""),
    };

    let (path, query) = match path_and_query.find('?') {
      | Some(ix) => (&path_and_query[..ix], Some(&path_and_query[ix + 1..])),
      | None => (path_and_query, None),
    };

    let (host, port) = Self::split_authority(authority)?;

    let ip = host.parse::<IpAddr>()
                 .map_err(|_| InvariantViolation::UriHostNotAnAddress)?;
    let addr = SocketAddr::new(ip, port);

    let mut req = Self { msg: Message::new(Type::Con, method.0, Id(0), Token::default()),
                         id: None,
                         token: None };

    if use_proxy {
      req.msg
         .set(no_repeat::PROXY_URI, OptValue::string(uri))
         .map_err(|_| InvariantViolation::UriTooLong)?;
    } else {
      // the host is the destination's literal address; Uri-Host
      // would say nothing the datagram doesn't already
      if port != newt_msg::known::URI_PORT_DEFAULT as u16 {
        req.msg
           .set(no_repeat::PORT, OptValue::uint(port as u64))
           .ok();
      }

      req.msg
         .set_path(path)
         .map_err(|_| InvariantViolation::UriTooLong)?;

      if let Some(query) = query {
        for param in query.split('&').filter(|q| !q.is_empty()) {
          req.msg
             .add_query(param)
             .map_err(|_| InvariantViolation::UriTooLong)?;
        }
      }
    }

    Ok(Addrd(req, addr))
  }

  fn split_authority(authority: &str) -> Result<(&str, u16), InvariantViolation> {
    if authority.is_empty() {
      return Err(InvariantViolation::UriMissingHost);
    }

    let default_port = newt_msg::known::URI_PORT_DEFAULT as u16;

    // bracketed IPv6 literal
    if let Some(rest) = authority.strip_prefix('[') {
      let end = rest.find(']').ok_or(InvariantViolation::UriMissingHost)?;
      let host = &rest[..end];
      return match rest[end + 1..].strip_prefix(':') {
        | Some(port) => port.parse()
                            .map(|p| (host, p))
                            .map_err(|_| InvariantViolation::UriInvalidPort),
        | None => Ok((host, default_port)),
      };
    }

    match authority.split_once(':') {
      | Some((host, port)) => port.parse()
                                  .map(|p| (host, p))
                                  .map_err(|_| InvariantViolation::UriInvalidPort),
      | None => Ok((authority, default_port)),
    }
  }

  /// Updates the message ID for this request.
  ///
  /// The runtime will always invoke this for you before sending.
  pub fn set_msg_id(&mut self, id: Id) {
    self.id = Some(id);
  }

  /// Updates the token for this request.
  ///
  /// The runtime will always invoke this for you before sending.
  pub fn set_msg_token(&mut self, token: Token) {
    self.token = Some(token);
  }

  /// Get the request method
  pub fn method(&self) -> Method {
    Method(self.msg.code)
  }

  /// Get the request type (confirmable, non-confirmable)
  pub fn msg_type(&self) -> Type {
    self.msg.ty
  }

  /// Set this request to be non-confirmable.
  ///
  /// Some messages do not require an acknowledgement. This is
  /// particularly true for messages that are repeated regularly for
  /// application requirements, such as repeated readings from a
  /// sensor.
  pub fn non(&mut self) -> () {
    self.msg.ty = Type::Non;
  }

  /// Get a copy of the message id for this request
  pub fn msg_id(&self) -> Id {
    self.id.unwrap_or(self.msg.id)
  }

  /// Get a copy of the token for this request
  pub fn msg_token(&self) -> Token {
    self.token.unwrap_or(self.msg.token)
  }

  /// Get the request path (Uri-Path options joined with `/`)
  pub fn path(&self) -> Option<String> {
    self.msg.path()
  }

  /// The full path of the request URI, reconstructed from the
  /// Uri-Path options. "/" when no such option is present.
  pub fn uri_path(&self) -> String {
    format!("/{}", self.msg.path().unwrap_or_default())
  }

  /// The value of the Uri-Host option, or None when absent (in which
  /// case the destination address stands in for it)
  pub fn uri_host(&self) -> Option<String> {
    self.msg
        .get(no_repeat::HOST)
        .and_then(|v| v.as_str())
        .map(String::from)
  }

  /// The value of the Uri-Port option; its absence encodes the
  /// default port 5683
  pub fn uri_port(&self) -> u64 {
    self.msg
        .get(no_repeat::PORT)
        .and_then(|v| v.as_uint())
        .unwrap_or(newt_msg::known::URI_PORT_DEFAULT)
  }

  /// The full query of the request URI, reconstructed from the
  /// Uri-Query options; empty when no such option is present
  pub fn uri_query(&self) -> String {
    self.msg
        .queries()
        .iter()
        .filter_map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join("&")
  }

  /// The value of the given query parameter, or None when no
  /// Uri-Query option carries it.
  ///
  /// A Uri-Query value `param1=example` makes
  /// `uri_query_parameter("param1")` (and `"param1="`) yield
  /// `"example"`.
  pub fn uri_query_parameter(&self, parameter: impl AsRef<str>) -> Option<String> {
    let mut parameter = parameter.as_ref().to_string();
    if !parameter.ends_with('=') {
      parameter.push('=');
    }

    self.msg
        .queries()
        .iter()
        .filter_map(|v| v.as_str())
        .find(|v| v.starts_with(&parameter))
        .map(|v| v[parameter.len()..].to_string())
  }

  /// Ask to be registered with (or deregistered from) the list of
  /// observers of the resource this request targets
  pub fn set_observe(&mut self, action: Action) -> () {
    self.msg
        .set(no_repeat::OBSERVE, OptValue::uint(u64::from(action)))
        .ok();
  }

  /// The Observe option interpreted as a register/deregister request
  pub fn observe_action(&self) -> Option<Action> {
    self.msg.observe_action()
  }

  /// Add a payload to this request
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

  /// Replace an option's values on this request
  pub fn set_option(&mut self, number: u32, value: OptValue) -> Result<(), SetError> {
    self.msg.set(OptNumber(number), value)
  }

  /// Add an instance of a repeatable option to this request
  pub fn add_option(&mut self, number: u32, value: OptValue) -> Result<(), SetError> {
    self.msg.add(OptNumber(number), value)
  }

  /// Read an option's first value by its number
  pub fn get_option(&self, number: u32) -> Option<&OptValue> {
    self.msg.get(OptNumber(number))
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
/// together in a request.
pub(crate) fn check_request_invariants(ty: Type, code: Code) -> Result<(), InvariantViolation> {
  use newt_msg::CodeKind;

  match (ty, code.kind()) {
    | (Type::Con | Type::Non, CodeKind::Request) => Ok(()),
    | _ => Err(InvariantViolation::BadMessageTypeForCode),
  }
}

impl From<Req> for Message {
  fn from(req: Req) -> Self {
    let mut msg = req.msg;
    msg.id = req.id.expect("Request ID was None");
    msg.token = req.token.expect("Request Token was None");
    msg
  }
}

impl From<Message> for Req {
  fn from(msg: Message) -> Self {
    let (id, token) = (msg.id, msg.token);

    Self { msg,
           id: Some(id),
           token: Some(token) }
  }
}
