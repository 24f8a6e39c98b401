use newt_msg::{Id, MessageParseError, MessageToBytesError, Token};
use no_std_net::SocketAddr;

use crate::net::Socket;
use crate::platform::Platform;

/// The context that an error occurred in
#[derive(Debug, Clone, Copy)]
pub enum When {
  /// We were polling for a message when the error occurred
  Polling,
  /// We were sending a message
  SendingMessage(Option<SocketAddr>, Id, Token),
  /// No context more specific than "inside the runtime"
  None,
}

impl When {
  /// Construct a specific error from the context the error occurred in
  pub fn what<P: Platform>(self, what: What<P>) -> Error<P> {
    Error { when: self, what }
  }
}

/// An error encounterable from within [`Core`](crate::core::Core)
#[derive(Debug)]
pub struct Error<P: Platform> {
  /// What happened?
  pub what: What<P>,
  /// What were we doing when it happened?
  pub when: When,
}

/// Which endpoint ended an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationEnd {
  /// The remote endpoint ended the observation (RST or an error-coded
  /// notification)
  Remote,
  /// We ended the observation (deregistration or dropped handle)
  Local,
}

/// A contextless error with some additional debug data attached.
#[derive(Debug)]
pub enum What<P: Platform> {
  /// Some socket operation (e.g. binding to an address) failed
  SockError(<<P as Platform>::Socket as Socket>::Error),
  /// Parsing a message from bytes failed
  FromBytes(MessageParseError),
  /// Serializing a message to bytes failed
  ToBytes(MessageToBytesError),
  /// Uri-Host in request was not a utf8 string
  HostInvalidUtf8(core::str::Utf8Error),
  /// Uri-Host in request was not a valid IP address
  HostInvalidIpAddress,
  /// A CONfirmable message was transmitted the maximum number of
  /// times without an ACKnowledgement.
  Timeout,
  /// The remote endpoint rejected a message of ours with RST.
  Rejected,
  /// No response arrived within the exchange lifetime, or the
  /// exchange polled for does not exist (anymore).
  ExchangeExpired,
  /// The observation this token belonged to ended.
  ObservationCancelled(ObservationEnd),
  /// A message constructor was asked to violate a protocol invariant.
  InvariantViolation(InvariantViolation),
  /// The clock failed to provide timing.
  ///
  /// See [`embedded_time::clock::Error`]
  ClockError,
}

impl<P: Platform> Error<P> {
  /// Is this error `FromBytes`?
  pub fn message_parse_error(&self) -> Option<&MessageParseError> {
    match self.what {
      | What::FromBytes(ref e) => Some(e),
      | _ => None,
    }
  }
}

impl<P: Platform> From<InvariantViolation> for Error<P> {
  fn from(iv: InvariantViolation) -> Self {
    When::None.what(What::InvariantViolation(iv))
  }
}

/// A protocol invariant a message constructor refused to violate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
  /// The message type may not carry the message code (e.g. an ACK
  /// carrying a request code, or a RST carrying a response)
  BadMessageTypeForCode,
  /// [`Resp::error`](crate::resp::Resp::error) was given a code that
  /// is not 4.xx or 5.xx
  NotAnErrorCode,
  /// A request URI's scheme was missing or not `coap`
  UriBadScheme,
  /// A request URI had a fragment part
  UriHasFragment,
  /// A request URI had no host
  UriMissingHost,
  /// A request URI's host was not an IP literal
  UriHostNotAnAddress,
  /// A request URI's port was not a number in range
  UriInvalidPort,
  /// A request URI was too long for the option that carries it
  UriTooLong,
}
