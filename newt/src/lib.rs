//! `newt` is a Rust CoAP endpoint library built around the three
//! subsystems that make CoAP more than "HTTP over UDP":
//!
//! - a **reliability engine**: confirmable-message retransmission with
//!   RFC 7252 backoff, duplicate suppression with reply replay, and
//!   the piggy-backed/separate response machinery;
//! - an **exchange table** correlating requests to responses by
//!   `(remote, token)`, with cancellation-on-drop token handles;
//! - an **observe manager** (RFC 7641): server-side observer
//!   relations with monotonically fresher sequence numbers and
//!   notification fan-out, and client-side notification streams with
//!   staleness filtering.
//!
//! The wire codec lives in the sibling crate
//! [`newt_msg`](https://docs.rs/newt-msg).
//!
//! ## Blocking client
//!
//! ```no_run
//! use newt::blocking::Client;
//! use newt::req::Req;
//!
//! let mut client = Client::new_std(1111).unwrap();
//! let rep = client.send(Req::get("127.0.0.1:5683".parse().unwrap(), "hello"))
//!                 .unwrap();
//!
//! println!("{}", rep.payload_str().unwrap());
//! ```
//!
//! ## Blocking server
//!
//! ```no_run
//! use newt::blocking::server::{Server, Service};
//! use newt::net::Addrd;
//! use newt::platform::Std;
//! use newt::req::Req;
//! use newt::resp::Resp;
//!
//! struct Hello;
//!
//! impl Service<Std> for Hello {
//!   fn path(&self) -> &str {
//!     "hello"
//!   }
//!
//!   fn poll(&mut self, req: &Addrd<Req>) -> Option<Resp> {
//!     let mut resp = Resp::for_request(req.data())?;
//!     resp.set_payload("hi there");
//!     Some(resp)
//!   }
//! }
//!
//! let mut server = Server::try_new([127, 0, 0, 1], 5683).unwrap();
//! server.register_service(Box::new(Hello));
//! server.run();
//! ```
//!
//! ## Non-blocking use
//!
//! The blocking layer is sugar; everything it does goes through the
//! non-blocking [`core::Core`], whose `poll_*` methods speak
//! [`nb`](https://docs.rs/nb) and can be driven from any event loop.

#![doc(html_root_url = "https://docs.rs/newt/0.1.0")]
// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]

#[cfg(test)]
pub(crate) mod test;

pub(crate) mod logging;

/// Blocking CoAP client & server
pub mod blocking;

/// customizable retrying of fallible operations
pub mod retry;

/// responses
pub mod resp;

/// requests
pub mod req;

/// low-level CoAP behavior: the dispatcher, reliability engine,
/// exchange table, and observe manager
pub mod core;

/// platform configuration
pub mod platform;

/// network abstractions
pub mod net;

/// time abstractions
pub mod time;

/// configuring runtime behavior
pub mod config;

/// `std` implementations of the platform pieces
pub mod std;

/// Helper constants and functions for creating multicast addresses
pub mod multicast {
  use no_std_net::{Ipv4Addr, SocketAddr, SocketAddrV4};

  /// IPv4 "All CoAP devices" multicast address.
  ///
  /// If using multicast to discover devices, it's recommended
  /// that you use this address with a port specific to your
  /// application.
  pub const ALL_COAP_DEVICES_IP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);

  /// Create a SocketAddr (IP + port) with the [`ALL_COAP_DEVICES_IP`]
  /// address
  pub const fn all_coap_devices(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(ALL_COAP_DEVICES_IP, port))
  }
}
