//! Low-level representation of CoAP (RFC 7252) messages.
//!
//! The most notable item in `newt-msg` is [`Message`]: a CoAP message
//! very close to the actual byte layout.
//!
//! ## Options
//! Message options are stored in a multimap from option number to an
//! ordered list of values ([`Opts`]). Serializing emits options in
//! ascending number order no matter how they were inserted, and the
//! per-number value order is preserved (it is semantically meaningful:
//! Uri-Path segments are one value each).
//!
//! Options this crate recognizes are described by a registry
//! ([`opt::known`]) carrying each number's value format, repeatability
//! and length bounds; both the decoder and the option setters enforce
//! the registry's rules. Unknown *elective* options are silently
//! dropped when parsing, while unknown *critical* options fail the
//! parse so the endpoint can reject the message with 4.02 Bad Option.
//!
//! ## Codec
//! [`TryFromBytes`] and [`TryIntoBytes`] convert between [`Message`]
//! and raw datagrams:
//!
//! ```
//! use newt_msg::{Code, Id, Message, Token, TryFromBytes, TryIntoBytes, Type};
//!
//! let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token::counter(7));
//! msg.set_path("sensors/temperature").unwrap();
//!
//! let bytes = msg.clone().try_into_bytes().unwrap();
//! assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
//! ```

#![doc(html_root_url = "https://docs.rs/newt-msg/0.1.0")]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]

mod cursor;

#[doc(hidden)]
pub mod from_bytes;

/// Message structs
pub mod msg;

#[doc(hidden)]
pub mod to_bytes;

#[doc(inline)]
pub use from_bytes::TryFromBytes;
#[doc(inline)]
pub use msg::*;
#[doc(inline)]
pub use to_bytes::{MessageToBytesError, TryIntoBytes};

/// A well-formed message and its exact wire encoding, shared by the
/// codec tests.
#[doc(hidden)]
pub fn test_msg() -> (Message, Vec<u8>) {
  let header: [u8; 4] = 0b0100_0001_0100_0101_0000_0000_0000_0001_u32.to_be_bytes();
  let token: [u8; 1] = [254u8];
  // Content-Format: 50 (application/json)
  let options: [u8; 2] = [0b1100_0001, 50];
  let payload: [&[u8]; 2] = [&[0b1111_1111u8], b"hello, world!"];
  let bytes = [header.as_ref(),
               token.as_ref(),
               options.as_ref(),
               payload.concat().as_ref()].concat();

  let mut msg = Message::new(Type::Con,
                             Code { class: 2,
                                    detail: 5 },
                             Id(1),
                             Token(tinyvec::array_vec!([u8; 8] => 254)));
  msg.set_content_format(known::ContentFormat::Json).unwrap();
  msg.payload = Payload(b"hello, world!".to_vec());

  (msg, bytes)
}
