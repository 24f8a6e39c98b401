/// Content-Format values
pub mod content_format;
pub use content_format::*;

/// Observe
pub mod observe;
pub use observe::*;

use crate::msg::opt::OptNumber;

macro_rules! opt {
  (#[doc = $doc:expr] $name:ident = $n:literal) => {
    #[doc = $doc]
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: crate::msg::opt::OptNumber = crate::msg::opt::OptNumber($n);
  };
}

pub(crate) use opt;

/// Non-repeatable options
pub mod no_repeat {
  use super::opt;

  opt!(#[doc = "Uri-Host <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.1>"]
       HOST = 3);
  opt!(#[doc = "If-None-Match <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.8.2>"]
       IF_NONE_MATCH = 5);
  opt!(#[doc = "Observe <https://www.rfc-editor.org/rfc/rfc7641#section-2>"]
       OBSERVE = 6);
  opt!(#[doc = "Uri-Port; see [`HOST`]"]
       PORT = 7);
  opt!(#[doc = "Content-Format <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.3>"]
       CONTENT_FORMAT = 12);
  opt!(#[doc = "Max-Age <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.5>"]
       MAX_AGE = 14);
  opt!(#[doc = "Block2 <https://datatracker.ietf.org/doc/html/rfc7959#section-2.2>"]
       BLOCK2 = 23);
  opt!(#[doc = "Block1; see [`BLOCK2`]"]
       BLOCK1 = 27);
  opt!(#[doc = "Size2 <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.9>"]
       SIZE2 = 28);
  opt!(#[doc = "Proxy-Uri <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.2>"]
       PROXY_URI = 35);
  opt!(#[doc = "Proxy-Scheme; see [`PROXY_URI`]"]
       PROXY_SCHEME = 39);
  opt!(#[doc = "Size1 <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.9>"]
       SIZE1 = 60);
}

/// Repeatable options
pub mod repeat {
  use super::opt;

  opt!(#[doc = "If-Match <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.8.1>"]
       IF_MATCH = 1);
  opt!(#[doc = "ETag <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.6>"]
       ETAG = 4);
  opt!(#[doc = "Location-Path <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.7>"]
       LOCATION_PATH = 8);
  opt!(#[doc = "Uri-Path; see [`super::no_repeat::HOST`]"]
       PATH = 11);
  opt!(#[doc = "Uri-Query; see [`super::no_repeat::HOST`]"]
       QUERY = 15);
  opt!(#[doc = "Accept <https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.4>"]
       ACCEPT = 17);
  opt!(#[doc = "Location-Query; see [`LOCATION_PATH`]"]
       LOCATION_QUERY = 20);
}

/// Default Uri-Port when the option is absent (the CoAP UDP port)
pub const URI_PORT_DEFAULT: u64 = 5683;

/// Default Max-Age when the option is absent, in seconds
pub const MAX_AGE_DEFAULT: u64 = 60;

/// Value format of a known option
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Format {
  /// Zero-length value; presence of the option is the information
  Empty,
  /// Opaque sequence of bytes
  Opaque,
  /// UTF-8 string
  String,
  /// Non-negative integer, shortest-form big-endian encoding
  Uint,
}

/// What the option registry knows about an option number
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct OptMeta {
  /// Value format
  pub format: Format,
  /// May the option occur more than once in a message?
  pub repeatable: bool,
  /// Smallest allowed value length, in bytes
  pub min_len: usize,
  /// Largest allowed value length, in bytes
  pub max_len: usize,
  /// Value encoded by the option's absence, if any
  pub default: Option<u64>,
}

/// Look an option number up in the registry of options this endpoint
/// understands (RFC 7252 section 12.2, RFC 7641, RFC 7959).
///
/// Returns None for numbers we do not recognize; whether that is an
/// error depends on [the number's criticality](OptNumber::must_be_processed).
pub fn meta(n: OptNumber) -> Option<OptMeta> {
  use Format::*;

  let m = |format, repeatable, min_len, max_len, default| OptMeta { format,
                                                                    repeatable,
                                                                    min_len,
                                                                    max_len,
                                                                    default };

  match n {
    | repeat::IF_MATCH => Some(m(Opaque, true, 0, 8, None)),
    | no_repeat::HOST => Some(m(String, false, 1, 255, None)),
    | repeat::ETAG => Some(m(Opaque, true, 1, 8, None)),
    | no_repeat::IF_NONE_MATCH => Some(m(Empty, false, 0, 0, None)),
    | no_repeat::OBSERVE => Some(m(Uint, false, 0, 3, None)),
    | no_repeat::PORT => Some(m(Uint, false, 0, 2, Some(URI_PORT_DEFAULT))),
    | repeat::LOCATION_PATH => Some(m(String, true, 0, 255, None)),
    | repeat::PATH => Some(m(String, true, 0, 255, None)),
    | no_repeat::CONTENT_FORMAT => Some(m(Uint, false, 0, 2, None)),
    | no_repeat::MAX_AGE => Some(m(Uint, false, 0, 4, Some(MAX_AGE_DEFAULT))),
    | repeat::QUERY => Some(m(String, true, 0, 255, None)),
    | repeat::ACCEPT => Some(m(Uint, true, 0, 2, None)),
    | repeat::LOCATION_QUERY => Some(m(String, true, 0, 255, None)),
    | no_repeat::BLOCK2 => Some(m(Uint, false, 0, 3, None)),
    | no_repeat::BLOCK1 => Some(m(Uint, false, 0, 3, None)),
    | no_repeat::SIZE2 => Some(m(Uint, false, 0, 4, None)),
    | no_repeat::PROXY_URI => Some(m(String, false, 1, 1034, None)),
    | no_repeat::PROXY_SCHEME => Some(m(String, false, 1, 255, None)),
    | no_repeat::SIZE1 => Some(m(Uint, false, 0, 4, None)),
    | _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn registry_repeatability() {
    [repeat::IF_MATCH,
     repeat::ETAG,
     repeat::LOCATION_PATH,
     repeat::PATH,
     repeat::QUERY,
     repeat::ACCEPT,
     repeat::LOCATION_QUERY].into_iter()
                            .for_each(|n| {
                              assert!(meta(n).unwrap().repeatable, "{:?} should repeat", n)
                            });

    [no_repeat::HOST,
     no_repeat::IF_NONE_MATCH,
     no_repeat::OBSERVE,
     no_repeat::PORT,
     no_repeat::CONTENT_FORMAT,
     no_repeat::MAX_AGE,
     no_repeat::BLOCK1,
     no_repeat::BLOCK2,
     no_repeat::PROXY_URI,
     no_repeat::PROXY_SCHEME,
     no_repeat::SIZE1,
     no_repeat::SIZE2].into_iter()
                      .for_each(|n| {
                        assert!(!meta(n).unwrap().repeatable, "{:?} should not repeat", n)
                      });
  }

  #[test]
  fn registry_defaults() {
    assert_eq!(meta(no_repeat::PORT).unwrap().default, Some(5683));
    assert_eq!(meta(no_repeat::MAX_AGE).unwrap().default, Some(60));
    assert_eq!(meta(repeat::PATH).unwrap().default, None);
  }

  #[test]
  fn unknown_numbers() {
    assert_eq!(meta(OptNumber(1234)), None);
  }
}
