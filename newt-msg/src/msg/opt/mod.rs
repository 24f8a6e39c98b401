use std::collections::BTreeMap;

use crate::cursor::Cursor;

/// Error types produced while parsing CoAP options.
pub mod parse_error;
pub use parse_error::*;

/// The option registry: numbers, formats, length bounds, defaults
pub mod known;

/// # Option Number
///
/// Identifies which option an option entry is (e.g. Content-Format has
/// a Number of 12). On the wire, numbers are delta-encoded relative to
/// the previous option in the message; in memory we always store the
/// absolute number.
///
/// The number is not an arbitrary id; its bits encode how endpoints
/// and proxies that do not recognize the option must behave. See the
/// methods on this struct.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptNumber(pub u32);

/// Whether or not this option must be processed by the receiving endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptionMustBeProcessed {
  /// This option must be processed, and a message that contains it
  /// and is not understood will be rejected.
  ///
  /// Corresponds to the option being "critical" in strict CoAP terms
  Yes,
  /// This option may be ignored when not understood.
  ///
  /// Corresponds to the option being "elective" in strict CoAP terms
  No,
}

/// Whether a proxy that does not understand this option may forward it
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WhenOptionUnsupportedByProxy {
  /// Must be understood to be forwarded ("UnSafe" to forward)
  Error,
  /// May be forwarded blindly ("SafeToForward")
  Forward,
}

/// Whether this option is part of a forwarding proxy's cache key
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WhenOptionChanges {
  /// Distinct values for this option yield distinct cached responses
  ResponseChanges,
  /// Distinct values for this option yield the same cached response
  /// ("NoCacheKey")
  ResponseDoesNotChange,
}

impl OptNumber {
  /// Whether or not this option may be ignored by an endpoint
  /// (bit 0 of the number)
  pub fn must_be_processed(&self) -> OptionMustBeProcessed {
    match self.0 & 0b1 {
      | 1 => OptionMustBeProcessed::Yes,
      | _ => OptionMustBeProcessed::No,
    }
  }

  /// Whether or not this option may be forwarded blindly by
  /// a proxy that does not support processing it (bit 1)
  pub fn when_unsupported_by_proxy(&self) -> WhenOptionUnsupportedByProxy {
    match (self.0 & 0b10) >> 1 {
      | 1 => WhenOptionUnsupportedByProxy::Error,
      | _ => WhenOptionUnsupportedByProxy::Forward,
    }
  }

  /// Whether or not different values for this option should
  /// yield a proxy's cached response (bits 1-4 == 0x1c)
  pub fn when_option_changes(&self) -> WhenOptionChanges {
    match (self.0 & 0b11100) >> 2 {
      | 0b111 => WhenOptionChanges::ResponseDoesNotChange,
      | _ => WhenOptionChanges::ResponseChanges,
    }
  }
}

/// # Option Value
///
/// The raw bytes of an option's value as stored in a message.
///
/// Use the constructors to build values in the correct wire format for
/// the option's registered [`known::Format`]; notably
/// [`OptValue::uint`] produces the shortest-form big-endian encoding
/// with zero encoding as the empty value.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// An empty value, for options of [`known::Format::Empty`]
  pub fn empty() -> Self {
    Self(Vec::new())
  }

  /// A value holding opaque bytes
  pub fn opaque(bytes: impl Into<Vec<u8>>) -> Self {
    Self(bytes.into())
  }

  /// A value holding the bytes of a UTF-8 string
  pub fn string(s: impl AsRef<str>) -> Self {
    Self(s.as_ref().as_bytes().to_vec())
  }

  /// A value holding an unsigned integer in its minimal big-endian
  /// form: no leading zero bytes, zero encodes as the empty value.
  ///
  /// ```
  /// use newt_msg::OptValue;
  ///
  /// assert_eq!(OptValue::uint(0).0, Vec::<u8>::new());
  /// assert_eq!(OptValue::uint(5683).0, vec![0x16, 0x33]);
  /// ```
  pub fn uint(n: u64) -> Self {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    Self(bytes[skip..].to_vec())
  }

  /// Interpret the value bytes as an unsigned integer.
  ///
  /// Returns None when the value is longer than 8 bytes.
  pub fn as_uint(&self) -> Option<u64> {
    if self.0.len() > 8 {
      return None;
    }

    Some(self.0
             .iter()
             .fold(0u64, |acc, b| (acc << 8) | (*b as u64)))
  }

  /// Interpret the value bytes as a UTF-8 string
  pub fn as_str(&self) -> Option<&str> {
    std::str::from_utf8(&self.0).ok()
  }
}

/// The options in a message: a multimap from option number to the
/// ordered list of values for that number.
///
/// BTreeMap iteration yields numbers in ascending order, which is
/// exactly the canonical order the codec must emit; the per-number Vec
/// preserves insertion order, which is semantically meaningful for
/// e.g. Uri-Path segments.
pub type Opts = BTreeMap<OptNumber, Vec<OptValue>>;

/// Errors encounterable while building options in a message
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SetError {
  /// The value's length is outside the bounds the registry allows
  /// for this option
  ValueLength {
    /// The option in question
    number: OptNumber,
    /// The offered value's length
    len: usize,
    /// Smallest allowed length
    min: usize,
    /// Largest allowed length
    max: usize,
  },
  /// A second value was added for an option that may only occur once
  Repeated(OptNumber),
}

/// Validate a value against the registry before storing it.
///
/// Unknown numbers pass - we only constrain options we have metadata
/// for, the rest are the embedder's business.
pub(crate) fn check_len(number: OptNumber, value: &OptValue) -> Result<(), SetError> {
  match known::meta(number) {
    | Some(meta) if value.0.len() < meta.min_len || value.0.len() > meta.max_len => {
      Err(SetError::ValueLength { number,
                                  len: value.0.len(),
                                  min: meta.min_len,
                                  max: meta.max_len })
    },
    | _ => Ok(()),
  }
}

pub(crate) fn parse_opt_len_or_delta<B: AsRef<[u8]>>(head: u8,
                                                     bytes: &mut Cursor<B>,
                                                     reserved_err: OptParseError)
                                                     -> Result<u32, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok((n as u32) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u16::from_be_bytes([a, b]) as u32 + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u32),
  }
}

/// Parse the option stream of a message, validating each option
/// against the registry.
///
/// Consumes the cursor up to (and including) the payload marker `0xFF`
/// or the end of the buffer, whichever comes first; the returned flag
/// says whether the marker was seen.
///
/// Per RFC 7252 section 5.4:
///  - unknown critical options, malformed critical options, and
///    repeated non-repeatable critical options are errors;
///  - the same conditions on *elective* options cause the offending
///    option to be dropped silently.
pub(crate) fn try_consume_opts<B: AsRef<[u8]>>(bytes: &mut Cursor<B>)
                                               -> Result<(Opts, bool), OptParseError> {
  let mut opts = Opts::new();
  let mut number = 0u32;

  loop {
    let head = match bytes.next() {
      | None => return Ok((opts, false)),
      | Some(0b1111_1111) => return Ok((opts, true)),
      | Some(b) => b,
    };

    let delta = parse_opt_len_or_delta(head >> 4, bytes, OptParseError::OptionDeltaReservedValue)?;
    let len = parse_opt_len_or_delta(head & 0b1111, bytes, OptParseError::ValueLengthReservedValue)?
              as usize;

    number += delta;
    let n = OptNumber(number);

    let value = match bytes.take_exact(len) {
      | Some(v) => OptValue(v.to_vec()),
      | None => return Err(OptParseError::eof()),
    };

    let critical = n.must_be_processed() == OptionMustBeProcessed::Yes;

    match known::meta(n) {
      | None if critical => return Err(OptParseError::UnknownCriticalOption(n)),
      | None => continue,
      | Some(meta) => {
        if len < meta.min_len || len > meta.max_len {
          if critical {
            return Err(OptParseError::OptionValueLength { number: n,
                                                          len,
                                                          min: meta.min_len,
                                                          max: meta.max_len });
          }
          continue;
        }

        if !meta.repeatable && opts.contains_key(&n) {
          if critical {
            return Err(OptParseError::RepeatedCriticalOption(n));
          }
          continue;
        }

        opts.entry(n).or_default().push(value);
      },
    }
  }
}
